//! CRUD operations for [`MessagingSettings`] records.
//!
//! Settings rows are created lazily with defaults the first time a
//! principal is looked up, and mutated only through the explicit
//! [`SettingsUpdate`] contract.

use chrono::{DateTime, Utc};
use rusqlite::params;

use chirp_shared::{ConversationId, PrincipalId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    AutoDeleteConfig, BlockedPrincipal, MessagingSettings, MutedConversation, NotificationPrefs,
    SettingsUpdate, Theme, WhoCanMessage,
};
use crate::rows::{opt_ts_field, ts_field, uuid_field};

const SETTINGS_COLUMNS: &str = "principal, who_can_message, allow_message_requests, \
     read_receipts, show_online_status, show_typing_indicator, notify_messages, \
     notify_message_requests, notify_group_messages, notify_reactions, \
     auto_delete_enabled, auto_delete_days, theme, chat_wallpaper, updated_at";

impl Database {
    /// Fetch a principal's settings, if a row exists.
    pub fn get_settings(&self, principal: &PrincipalId) -> Result<Option<MessagingSettings>> {
        let settings = self
            .conn()
            .query_row(
                &format!("SELECT {SETTINGS_COLUMNS} FROM messaging_settings WHERE principal = ?1"),
                params![principal.as_str()],
                row_to_settings,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match settings {
            Some(mut s) => {
                s.blocked_users = self.blocked_by(principal)?;
                s.muted_conversations = self.muted_by(principal)?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    /// Fetch a principal's settings, creating the default row on first
    /// access.
    pub fn get_or_create_settings(
        &self,
        principal: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<MessagingSettings> {
        if let Some(settings) = self.get_settings(principal)? {
            return Ok(settings);
        }

        self.conn().execute(
            "INSERT OR IGNORE INTO messaging_settings (principal, updated_at) VALUES (?1, ?2)",
            params![principal.as_str(), now.to_rfc3339()],
        )?;

        self.get_settings(principal)?.ok_or(StoreError::NotFound)
    }

    /// Apply an explicit settings update. Every field is validated before
    /// the merge; nothing outside the enumerated contract can change.
    pub fn update_settings(
        &self,
        principal: &PrincipalId,
        update: &SettingsUpdate,
        now: DateTime<Utc>,
    ) -> Result<MessagingSettings> {
        if let Some(ref auto_delete) = update.auto_delete {
            if let Some(days) = auto_delete.duration_days {
                if !(1..=365).contains(&days) {
                    return Err(StoreError::InvalidSettingsUpdate(format!(
                        "auto-delete duration must be 1..=365 days, got {days}"
                    )));
                }
            }
        }

        let mut settings = self.get_or_create_settings(principal, now)?;

        if let Some(v) = update.who_can_message {
            settings.who_can_message = v;
        }
        if let Some(v) = update.allow_message_requests {
            settings.allow_message_requests = v;
        }
        if let Some(v) = update.read_receipts {
            settings.read_receipts = v;
        }
        if let Some(v) = update.show_online_status {
            settings.show_online_status = v;
        }
        if let Some(v) = update.show_typing_indicator {
            settings.show_typing_indicator = v;
        }
        if let Some(ref n) = update.notifications {
            if let Some(v) = n.messages {
                settings.notifications.messages = v;
            }
            if let Some(v) = n.message_requests {
                settings.notifications.message_requests = v;
            }
            if let Some(v) = n.group_messages {
                settings.notifications.group_messages = v;
            }
            if let Some(v) = n.reactions {
                settings.notifications.reactions = v;
            }
        }
        if let Some(ref a) = update.auto_delete {
            if let Some(v) = a.enabled {
                settings.auto_delete.enabled = v;
            }
            if let Some(v) = a.duration_days {
                settings.auto_delete.duration_days = v;
            }
        }
        if let Some(v) = update.theme {
            settings.theme = v;
        }
        if let Some(ref v) = update.chat_wallpaper {
            settings.chat_wallpaper = Some(v.clone());
        }
        settings.updated_at = now;

        self.conn().execute(
            "UPDATE messaging_settings SET
                 who_can_message = ?2, allow_message_requests = ?3, read_receipts = ?4,
                 show_online_status = ?5, show_typing_indicator = ?6, notify_messages = ?7,
                 notify_message_requests = ?8, notify_group_messages = ?9, notify_reactions = ?10,
                 auto_delete_enabled = ?11, auto_delete_days = ?12, theme = ?13,
                 chat_wallpaper = ?14, updated_at = ?15
             WHERE principal = ?1",
            params![
                principal.as_str(),
                settings.who_can_message.as_str(),
                settings.allow_message_requests,
                settings.read_receipts,
                settings.show_online_status,
                settings.show_typing_indicator,
                settings.notifications.messages,
                settings.notifications.message_requests,
                settings.notifications.group_messages,
                settings.notifications.reactions,
                settings.auto_delete.enabled,
                settings.auto_delete.duration_days,
                settings.theme.as_str(),
                settings.chat_wallpaper,
                now.to_rfc3339(),
            ],
        )?;

        Ok(settings)
    }

    // ------------------------------------------------------------------
    // Block list
    // ------------------------------------------------------------------

    /// Add `target` to `owner`'s block list. Re-blocking refreshes the
    /// timestamp and reason.
    pub fn block_principal(
        &self,
        owner: &PrincipalId,
        target: &PrincipalId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if owner == target {
            return Err(StoreError::InvalidSettingsUpdate(
                "cannot block yourself".to_string(),
            ));
        }

        self.conn().execute(
            "INSERT OR REPLACE INTO blocked_users (principal, blocked, blocked_at, reason)
             VALUES (?1, ?2, ?3, ?4)",
            params![owner.as_str(), target.as_str(), now.to_rfc3339(), reason],
        )?;
        Ok(())
    }

    /// Remove `target` from `owner`'s block list.  Returns `true` if a
    /// block was present.
    pub fn unblock_principal(&self, owner: &PrincipalId, target: &PrincipalId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM blocked_users WHERE principal = ?1 AND blocked = ?2",
            params![owner.as_str(), target.as_str()],
        )?;
        Ok(affected > 0)
    }

    fn blocked_by(&self, owner: &PrincipalId) -> Result<Vec<BlockedPrincipal>> {
        let mut stmt = self.conn().prepare(
            "SELECT blocked, blocked_at, reason FROM blocked_users
             WHERE principal = ?1 ORDER BY blocked_at ASC",
        )?;

        let rows = stmt.query_map(params![owner.as_str()], |row| {
            let blocked: String = row.get(0)?;
            let ts_str: String = row.get(1)?;
            let reason: Option<String> = row.get(2)?;
            Ok(BlockedPrincipal {
                principal: PrincipalId::new(blocked),
                blocked_at: ts_field(1, &ts_str)?,
                reason,
            })
        })?;

        let mut blocked = Vec::new();
        for row in rows {
            blocked.push(row?);
        }
        Ok(blocked)
    }

    // ------------------------------------------------------------------
    // Muted conversations
    // ------------------------------------------------------------------

    /// Mute a conversation for `owner`, optionally until a deadline.
    pub fn mute_conversation(
        &self,
        owner: &PrincipalId,
        conversation: &ConversationId,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO muted_conversations
                 (principal, conversation_id, muted_at, muted_until)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                owner.as_str(),
                conversation.to_string(),
                now.to_rfc3339(),
                until.map(|u| u.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Unmute.  Returns `true` if a mute was present.
    pub fn unmute_conversation(
        &self,
        owner: &PrincipalId,
        conversation: &ConversationId,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM muted_conversations WHERE principal = ?1 AND conversation_id = ?2",
            params![owner.as_str(), conversation.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Whether `owner` currently has the conversation muted. A mute whose
    /// `muted_until` has elapsed no longer counts.
    pub fn is_conversation_muted(
        &self,
        owner: &PrincipalId,
        conversation: &ConversationId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM muted_conversations
             WHERE principal = ?1 AND conversation_id = ?2
               AND (muted_until IS NULL OR muted_until > ?3)",
            params![
                owner.as_str(),
                conversation.to_string(),
                now.to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn muted_by(&self, owner: &PrincipalId) -> Result<Vec<MutedConversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, muted_at, muted_until FROM muted_conversations
             WHERE principal = ?1 ORDER BY muted_at ASC",
        )?;

        let rows = stmt.query_map(params![owner.as_str()], |row| {
            let conv_str: String = row.get(0)?;
            let at_str: String = row.get(1)?;
            let until_str: Option<String> = row.get(2)?;
            Ok(MutedConversation {
                conversation_id: ConversationId(uuid_field(0, &conv_str)?),
                muted_at: ts_field(1, &at_str)?,
                muted_until: opt_ts_field(2, until_str)?,
            })
        })?;

        let mut muted = Vec::new();
        for row in rows {
            muted.push(row?);
        }
        Ok(muted)
    }
}

/// Map a `rusqlite::Row` to [`MessagingSettings`] (block list and mutes
/// loaded separately).
fn row_to_settings(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessagingSettings> {
    let principal: String = row.get(0)?;
    let who_str: String = row.get(1)?;
    let allow_message_requests: bool = row.get(2)?;
    let read_receipts: bool = row.get(3)?;
    let show_online_status: bool = row.get(4)?;
    let show_typing_indicator: bool = row.get(5)?;
    let notify_messages: bool = row.get(6)?;
    let notify_message_requests: bool = row.get(7)?;
    let notify_group_messages: bool = row.get(8)?;
    let notify_reactions: bool = row.get(9)?;
    let auto_delete_enabled: bool = row.get(10)?;
    let auto_delete_days: i64 = row.get(11)?;
    let theme_str: String = row.get(12)?;
    let chat_wallpaper: Option<String> = row.get(13)?;
    let updated_str: String = row.get(14)?;

    Ok(MessagingSettings {
        principal: PrincipalId::new(principal),
        who_can_message: WhoCanMessage::parse_lossy(&who_str),
        allow_message_requests,
        read_receipts,
        show_online_status,
        show_typing_indicator,
        notifications: NotificationPrefs {
            messages: notify_messages,
            message_requests: notify_message_requests,
            group_messages: notify_group_messages,
            reactions: notify_reactions,
        },
        auto_delete: AutoDeleteConfig {
            enabled: auto_delete_enabled,
            duration_days: auto_delete_days,
        },
        theme: Theme::parse(&theme_str).unwrap_or(Theme::Auto),
        chat_wallpaper,
        blocked_users: Vec::new(),
        muted_conversations: Vec::new(),
        updated_at: ts_field(14, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AutoDeleteUpdate;
    use chrono::Duration;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s)
    }

    #[test]
    fn settings_created_lazily_with_defaults() {
        let db = test_db();
        assert!(db.get_settings(&p("alice")).unwrap().is_none());

        let settings = db.get_or_create_settings(&p("alice"), Utc::now()).unwrap();
        assert_eq!(settings.who_can_message, WhoCanMessage::Everyone);
        assert!(settings.allow_message_requests);
        assert!(settings.read_receipts);
        assert!(settings.notifications.messages);
        assert_eq!(settings.theme, Theme::Auto);
        assert!(settings.blocked_users.is_empty());

        // Second access reuses the row.
        assert!(db.get_settings(&p("alice")).unwrap().is_some());
    }

    #[test]
    fn update_merges_only_listed_fields() {
        let db = test_db();
        let update = SettingsUpdate {
            who_can_message: Some(WhoCanMessage::Followers),
            read_receipts: Some(false),
            ..Default::default()
        };

        let settings = db
            .update_settings(&p("alice"), &update, Utc::now())
            .unwrap();
        assert_eq!(settings.who_can_message, WhoCanMessage::Followers);
        assert!(!settings.read_receipts);
        // Untouched fields keep their defaults.
        assert!(settings.show_online_status);
        assert!(settings.notifications.group_messages);
    }

    #[test]
    fn auto_delete_duration_is_validated_before_merge() {
        let db = test_db();
        let update = SettingsUpdate {
            auto_delete: Some(AutoDeleteUpdate {
                enabled: Some(true),
                duration_days: Some(0),
            }),
            ..Default::default()
        };

        let err = db
            .update_settings(&p("alice"), &update, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSettingsUpdate(_)));
        // The rejected update must not have created or changed anything.
        assert!(db.get_settings(&p("alice")).unwrap().is_none());
    }

    #[test]
    fn block_unblock_round_trip() {
        let db = test_db();
        db.block_principal(&p("alice"), &p("spammer"), Some("spam"), Utc::now())
            .unwrap();

        let settings = db.get_or_create_settings(&p("alice"), Utc::now()).unwrap();
        assert!(settings.has_blocked(&p("spammer")));
        assert_eq!(settings.blocked_users[0].reason.as_deref(), Some("spam"));

        assert!(db.unblock_principal(&p("alice"), &p("spammer")).unwrap());
        assert!(!db.unblock_principal(&p("alice"), &p("spammer")).unwrap());
    }

    #[test]
    fn mute_honors_deadline() {
        let db = test_db();
        let conv = ConversationId::new();
        let now = Utc::now();

        db.mute_conversation(&p("alice"), &conv, Some(now + Duration::hours(1)), now)
            .unwrap();
        assert!(db.is_conversation_muted(&p("alice"), &conv, now).unwrap());
        assert!(!db
            .is_conversation_muted(&p("alice"), &conv, now + Duration::hours(2))
            .unwrap());

        // An open-ended mute never lapses on its own.
        db.mute_conversation(&p("alice"), &conv, None, now).unwrap();
        assert!(db
            .is_conversation_muted(&p("alice"), &conv, now + Duration::days(365))
            .unwrap());
    }
}
