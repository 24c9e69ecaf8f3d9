//! Principal resolution.
//!
//! Authentication itself is an external collaborator: something upstream
//! verifies identity and this core only maps an opaque bearer token to a
//! [`PrincipalId`]. The default [`BearerResolver`] trusts the token as the
//! principal id, which is what local development and the test suite use.

use async_trait::async_trait;
use axum::http::HeaderMap;

use chirp_shared::PrincipalId;

use crate::error::ServerError;

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Map an opaque credential to the principal it identifies, or `None`
    /// if the credential is invalid.
    async fn resolve(&self, token: &str) -> Option<PrincipalId>;
}

/// Pass-through resolver: the bearer token *is* the principal id.
#[derive(Debug, Default, Clone)]
pub struct BearerResolver;

#[async_trait]
impl PrincipalResolver for BearerResolver {
    async fn resolve(&self, token: &str) -> Option<PrincipalId> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(PrincipalId::new(token))
    }
}

/// Extract the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    Some(auth.strip_prefix("Bearer ").unwrap_or(auth))
}

/// Resolve the calling principal or fail the request.
pub async fn require_principal(
    headers: &HeaderMap,
    resolver: &dyn PrincipalResolver,
) -> Result<PrincipalId, ServerError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ServerError::Forbidden("missing credentials".to_string()))?;

    resolver
        .resolve(token)
        .await
        .ok_or_else(|| ServerError::Forbidden("invalid credentials".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn bearer_resolver_passes_token_through() {
        let resolver = BearerResolver;
        assert_eq!(
            resolver.resolve("alice").await,
            Some(PrincipalId::new("alice"))
        );
        assert_eq!(resolver.resolve("   ").await, None);
    }

    #[tokio::test]
    async fn require_principal_strips_bearer_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer alice"));

        let principal = require_principal(&headers, &BearerResolver).await.unwrap();
        assert_eq!(principal, PrincipalId::new("alice"));
    }

    #[tokio::test]
    async fn missing_header_is_forbidden() {
        let headers = HeaderMap::new();
        let err = require_principal(&headers, &BearerResolver)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }
}
