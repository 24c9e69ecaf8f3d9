//! CRUD operations for [`Notification`] records.
//!
//! Notifications are an append-only side effect of message fan-out; they
//! carry awareness for offline principals and are never consulted for
//! delivery correctness.

use chrono::{DateTime, Utc};
use rusqlite::params;

use chirp_shared::{ConversationId, MessageId, NotificationId, PrincipalId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewNotification, Notification, NotificationKind};
use crate::rows::{opt_uuid_field, ts_field, uuid_field};

const NOTIFICATION_COLUMNS: &str =
    "id, from_principal, to_principal, kind, message_id, conversation_id, read, created_at";

impl Database {
    /// Append a notification record.
    pub fn insert_notification(
        &self,
        new: NewNotification,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        let id = NotificationId::new();

        self.conn().execute(
            "INSERT INTO notifications
                 (id, from_principal, to_principal, kind, message_id, conversation_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                new.from.as_str(),
                new.to.as_str(),
                new.kind.as_str(),
                new.message_id.map(|m| m.to_string()),
                new.conversation_id.map(|c| c.to_string()),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Notification {
            id,
            from: new.from,
            to: new.to,
            kind: new.kind,
            message_id: new.message_id,
            conversation_id: new.conversation_id,
            read: false,
            created_at: now,
        })
    }

    /// Notifications addressed to `principal`, newest first.
    pub fn list_notifications_for(
        &self,
        principal: &PrincipalId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE to_principal = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![principal.as_str(), limit, offset],
            row_to_notification,
        )?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Count of unread notifications for a principal.
    pub fn unread_notification_count(&self, principal: &PrincipalId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE to_principal = ?1 AND read = 0",
            params![principal.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Mark one notification read. Only the addressee may do so.
    pub fn mark_notification_read(
        &self,
        id: &NotificationId,
        principal: &PrincipalId,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND to_principal = ?2",
            params![id.to_string(), principal.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Mark everything addressed to `principal` read. Returns how many
    /// rows changed.
    pub fn mark_all_notifications_read(&self, principal: &PrincipalId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE to_principal = ?1 AND read = 0",
            params![principal.as_str()],
        )?;
        Ok(affected)
    }

    /// Delete a notification. Only the addressee may do so. Returns
    /// `true` if a row was removed.
    pub fn delete_notification(&self, id: &NotificationId, principal: &PrincipalId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE id = ?1 AND to_principal = ?2",
            params![id.to_string(), principal.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id_str: String = row.get(0)?;
    let from: String = row.get(1)?;
    let to: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let message_str: Option<String> = row.get(4)?;
    let conversation_str: Option<String> = row.get(5)?;
    let read: bool = row.get(6)?;
    let created_str: String = row.get(7)?;

    Ok(Notification {
        id: NotificationId(uuid_field(0, &id_str)?),
        from: PrincipalId::new(from),
        to: PrincipalId::new(to),
        kind: NotificationKind::parse(&kind_str).unwrap_or(NotificationKind::Message),
        message_id: opt_uuid_field(4, message_str)?.map(MessageId),
        conversation_id: opt_uuid_field(5, conversation_str)?.map(ConversationId),
        read,
        created_at: ts_field(7, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s)
    }

    fn notify(db: &Database, from: &str, to: &str) -> Notification {
        db.insert_notification(
            NewNotification {
                from: p(from),
                to: p(to),
                kind: NotificationKind::Message,
                message_id: Some(MessageId::new()),
                conversation_id: Some(ConversationId::new()),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn list_and_unread_count() {
        let db = test_db();
        notify(&db, "alice", "bob");
        notify(&db, "carol", "bob");
        notify(&db, "bob", "alice");

        let bobs = db.list_notifications_for(&p("bob"), 50, 0).unwrap();
        assert_eq!(bobs.len(), 2);
        assert_eq!(db.unread_notification_count(&p("bob")).unwrap(), 2);
        assert_eq!(db.unread_notification_count(&p("alice")).unwrap(), 1);
    }

    #[test]
    fn mark_read_is_owner_scoped() {
        let db = test_db();
        let n = notify(&db, "alice", "bob");

        // Alice is not the addressee.
        let err = db.mark_notification_read(&n.id, &p("alice")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));

        db.mark_notification_read(&n.id, &p("bob")).unwrap();
        assert_eq!(db.unread_notification_count(&p("bob")).unwrap(), 0);
    }

    #[test]
    fn mark_all_read() {
        let db = test_db();
        notify(&db, "alice", "bob");
        notify(&db, "carol", "bob");

        assert_eq!(db.mark_all_notifications_read(&p("bob")).unwrap(), 2);
        assert_eq!(db.mark_all_notifications_read(&p("bob")).unwrap(), 0);
    }

    #[test]
    fn delete_is_owner_scoped() {
        let db = test_db();
        let n = notify(&db, "alice", "bob");

        assert!(!db.delete_notification(&n.id, &p("alice")).unwrap());
        assert!(db.delete_notification(&n.id, &p("bob")).unwrap());
        assert!(db.list_notifications_for(&p("bob"), 50, 0).unwrap().is_empty());
    }
}
