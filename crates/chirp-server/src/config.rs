//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WS API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file. When unset the platform data directory is
    /// used.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Filesystem path where uploaded media is stored.
    /// Env: `MEDIA_STORAGE_PATH`
    /// Default: `./media`
    pub media_storage_path: PathBuf,

    /// Maximum media upload size in bytes (50 MiB).
    /// Env: `MAX_MEDIA_SIZE`
    pub max_media_size: usize,

    /// Seconds between ghost-message sweep runs.
    /// Env: `GHOST_SWEEP_INTERVAL_SECS`
    /// Default: `60`
    pub ghost_sweep_interval_secs: u64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Chirp Messaging Node"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: None,
            media_storage_path: PathBuf::from("./media"),
            max_media_size: 50 * 1024 * 1024, // 50 MiB
            ghost_sweep_interval_secs: 60,
            instance_name: "Chirp Messaging Node".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("MEDIA_STORAGE_PATH") {
            config.media_storage_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("MAX_MEDIA_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_media_size = n;
            }
        }

        if let Ok(val) = std::env::var("GHOST_SWEEP_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.ghost_sweep_interval_secs = n,
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid GHOST_SWEEP_INTERVAL_SECS, using default"
                    );
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_media_size, 50 * 1024 * 1024);
        assert_eq!(config.ghost_sweep_interval_secs, 60);
        assert!(config.db_path.is_none());
    }
}
