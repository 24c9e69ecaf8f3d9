//! CRUD operations for [`Message`] records: creation, paged history,
//! reactions, read/delivery receipts, soft deletion, edits, and ghost
//! expiry.
//!
//! Reads never return expired ghosts; the periodic sweep only reclaims
//! rows the lazy filters already hide, so it is safe to run concurrently
//! with any read.

use chrono::{DateTime, Utc};
use rusqlite::params;

use chirp_shared::{ConversationId, MessageId, PostId, PrincipalId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    MediaAttachment, Message, MessageEdit, MessagePage, MessageType, NewMessage, Reaction,
    ReactionAction, ReadReceipt,
};
use crate::rows::{opt_ts_field, opt_uuid_field, ts_field, uuid_field};

/// Content shown in place of a message deleted for everyone.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, receiver, content, message_type, \
     media_url, media_kind, media_thumbnail, media_duration_secs, media_size, media_filename, \
     shared_post_id, reply_to, forwarded_from, edited, edited_at, deleted, deleted_at, \
     is_ghost, expires_at, created_at";

/// Rows a given viewer may see: not deleted for everyone, not hidden for
/// the viewer, and not an expired ghost. Bound as `:viewer` and `:now`.
const VISIBLE_CLAUSE: &str = "m.deleted = 0
       AND (m.is_ghost = 0 OR m.expires_at > :now)
       AND NOT EXISTS (
           SELECT 1 FROM message_hidden h
           WHERE h.message_id = m.id AND h.principal = :viewer)";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Persist a new message.
    ///
    /// Validates the content-kind invariant (at least one of content,
    /// media, shared post; media and shared post are mutually exclusive)
    /// and that a ghost carries an expiry. For direct conversations the
    /// `receiver` column is filled with the other participant; it exists
    /// for simpler querying, not authorization.
    pub fn insert_message(&self, new: NewMessage, now: DateTime<Utc>) -> Result<Message> {
        validate_payload(&new)?;

        let conversation = self.get_conversation(&new.conversation_id)?;
        let receiver = if conversation.is_group {
            None
        } else {
            conversation
                .other_participants(&new.sender)
                .into_iter()
                .next()
        };

        let id = MessageId::new();
        let media = new.media.as_ref();

        self.conn().execute(
            "INSERT INTO messages
                 (id, conversation_id, sender, receiver, content, message_type,
                  media_url, media_kind, media_thumbnail, media_duration_secs,
                  media_size, media_filename, shared_post_id, reply_to,
                  forwarded_from, is_ghost, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18)",
            params![
                id.to_string(),
                new.conversation_id.to_string(),
                new.sender.as_str(),
                receiver.as_ref().map(|r| r.as_str().to_string()),
                new.content.trim(),
                new.message_type.as_str(),
                media.map(|m| m.url.clone()),
                media.map(|m| m.kind.clone()),
                media.and_then(|m| m.thumbnail.clone()),
                media.and_then(|m| m.duration_secs),
                media.and_then(|m| m.size_bytes),
                media.and_then(|m| m.filename.clone()),
                new.shared_post_id.as_ref().map(|p| p.as_str().to_string()),
                new.reply_to.map(|r| r.to_string()),
                new.forwarded_from.as_ref().map(|f| f.as_str().to_string()),
                new.is_ghost,
                new.expires_at.map(|e| e.to_rfc3339()),
                now.to_rfc3339(),
            ],
        )?;

        self.get_message(&id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message with reactions and receipts, regardless of
    /// visibility filters. Internal callers need the row even when a
    /// viewer would not see it.
    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        self.hydrate_message(message)
    }

    /// One page of conversation history as seen by `viewer`.
    ///
    /// Internally ordered newest-first for pagination efficiency, then the
    /// page is reversed so callers receive oldest-first. `page` is
    /// 1-based.
    pub fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        viewer: &PrincipalId,
        page: u32,
        page_size: u32,
        now: DateTime<Utc>,
    ) -> Result<MessagePage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = (page - 1) as u64 * page_size as u64;

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.conversation_id = :conversation AND {VISIBLE_CLAUSE}
             ORDER BY m.created_at DESC
             LIMIT :limit OFFSET :offset"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::named_params! {
                ":conversation": conversation_id.to_string(),
                ":viewer": viewer.as_str(),
                ":now": now.to_rfc3339(),
                ":limit": page_size as i64,
                ":offset": offset as i64,
            },
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(self.hydrate_message(row?)?);
        }
        // Newest-first from the engine; oldest-first for the caller.
        messages.reverse();

        let total: i64 = self.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = :conversation AND {VISIBLE_CLAUSE}"
            ),
            rusqlite::named_params! {
                ":conversation": conversation_id.to_string(),
                ":viewer": viewer.as_str(),
                ":now": now.to_rfc3339(),
            },
            |row| row.get(0),
        )?;
        let total = total.max(0) as u64;

        let has_more = offset + (messages.len() as u64) < total;

        Ok(MessagePage {
            messages,
            total,
            has_more,
        })
    }

    /// Catch-up read: everything visible to `viewer` created after
    /// `since`, oldest-first. The pull-based fallback for clients that
    /// missed live pushes.
    pub fn list_since(
        &self,
        conversation_id: &ConversationId,
        viewer: &PrincipalId,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.conversation_id = :conversation AND m.created_at > :since
               AND {VISIBLE_CLAUSE}
             ORDER BY m.created_at ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::named_params! {
                ":conversation": conversation_id.to_string(),
                ":since": since.to_rfc3339(),
                ":viewer": viewer.as_str(),
                ":now": now.to_rfc3339(),
            },
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(self.hydrate_message(row?)?);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    /// Toggle `principal`'s `emoji` reaction on a message.
    ///
    /// Returns the resulting reaction set plus which action occurred, for
    /// the broadcast payload. Reacting twice with the same emoji removes
    /// the reaction rather than duplicating it.
    pub fn toggle_reaction(
        &self,
        message_id: &MessageId,
        principal: &PrincipalId,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Reaction>, ReactionAction)> {
        self.ensure_message_exists(message_id)?;

        let removed = self.conn().execute(
            "DELETE FROM message_reactions
             WHERE message_id = ?1 AND principal = ?2 AND emoji = ?3",
            params![message_id.to_string(), principal.as_str(), emoji],
        )?;

        let action = if removed > 0 {
            ReactionAction::Removed
        } else {
            self.conn().execute(
                "INSERT INTO message_reactions (message_id, principal, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    message_id.to_string(),
                    principal.as_str(),
                    emoji,
                    now.to_rfc3339(),
                ],
            )?;
            ReactionAction::Added
        };

        Ok((self.reactions_for(message_id)?, action))
    }

    /// All reactions on a message, oldest first.
    pub fn reactions_for(&self, message_id: &MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT principal, emoji, created_at FROM message_reactions
             WHERE message_id = ?1 ORDER BY created_at ASC, principal ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let principal: String = row.get(0)?;
            let emoji: String = row.get(1)?;
            let ts_str: String = row.get(2)?;
            Ok(Reaction {
                principal: PrincipalId::new(principal),
                emoji,
                created_at: ts_field(2, &ts_str)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }

    // ------------------------------------------------------------------
    // Receipts
    // ------------------------------------------------------------------

    /// Record that `principal` has read the conversation.
    ///
    /// Appends a receipt for every message authored by someone else that
    /// lacks one; repeat calls are no-ops. Returns how many receipts were
    /// added.
    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        principal: &PrincipalId,
        read_at: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "INSERT INTO message_reads (message_id, principal, read_at)
             SELECT m.id, ?2, ?3 FROM messages m
             WHERE m.conversation_id = ?1
               AND m.sender != ?2
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = m.id AND r.principal = ?2)",
            params![
                conversation_id.to_string(),
                principal.as_str(),
                read_at.to_rfc3339(),
            ],
        )?;
        Ok(affected)
    }

    /// Record live delivery to a connected principal. Idempotent.
    pub fn mark_delivered(
        &self,
        message_id: &MessageId,
        principal: &PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO message_deliveries (message_id, principal, delivered_at)
             VALUES (?1, ?2, ?3)",
            params![message_id.to_string(), principal.as_str(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Hide a message for `principal` only. Idempotent; the row and every
    /// other participant's view are untouched.
    pub fn delete_for_me(
        &self,
        message_id: &MessageId,
        principal: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_message_exists(message_id)?;

        self.conn().execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, principal, hidden_at)
             VALUES (?1, ?2, ?3)",
            params![message_id.to_string(), principal.as_str(), now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete a message for everyone: sender only.
    ///
    /// The row keeps its identity but loses its content; what remains is
    /// the tombstone.
    pub fn delete_for_everyone(
        &self,
        message_id: &MessageId,
        principal: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        let message = self.get_message(message_id)?;
        if &message.sender != principal {
            return Err(StoreError::Unauthorized(
                "only the sender may delete a message for everyone".to_string(),
            ));
        }

        self.conn().execute(
            "UPDATE messages
             SET deleted = 1, deleted_at = ?1, content = ?2,
                 media_url = NULL, media_kind = NULL, media_thumbnail = NULL,
                 media_duration_secs = NULL, media_size = NULL, media_filename = NULL,
                 shared_post_id = NULL
             WHERE id = ?3",
            params![
                now.to_rfc3339(),
                DELETED_PLACEHOLDER,
                message_id.to_string(),
            ],
        )?;

        self.get_message(message_id)
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Replace a message's content, keeping the superseded revision.
    /// Sender only; deleted messages cannot be edited.
    pub fn edit_message(
        &self,
        message_id: &MessageId,
        principal: &PrincipalId,
        new_content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        let message = self.get_message(message_id)?;
        if &message.sender != principal {
            return Err(StoreError::Unauthorized(
                "only the sender may edit a message".to_string(),
            ));
        }
        if message.deleted {
            return Err(StoreError::InvalidMessagePayload(
                "cannot edit a deleted message".to_string(),
            ));
        }
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(StoreError::InvalidMessagePayload(
                "edited content cannot be empty".to_string(),
            ));
        }

        self.conn().execute(
            "INSERT INTO message_edits (message_id, previous_content, edited_at)
             VALUES (?1, ?2, ?3)",
            params![message_id.to_string(), message.content, now.to_rfc3339()],
        )?;
        self.conn().execute(
            "UPDATE messages SET content = ?1, edited = 1, edited_at = ?2 WHERE id = ?3",
            params![new_content, now.to_rfc3339(), message_id.to_string()],
        )?;

        self.get_message(message_id)
    }

    /// Superseded revisions of a message, oldest first.
    pub fn edit_history(&self, message_id: &MessageId) -> Result<Vec<MessageEdit>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, previous_content, edited_at FROM message_edits
             WHERE message_id = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let previous_content: String = row.get(1)?;
            let ts_str: String = row.get(2)?;
            Ok(MessageEdit {
                message_id: MessageId(uuid_field(0, &id_str)?),
                previous_content,
                edited_at: ts_field(2, &ts_str)?,
            })
        })?;

        let mut edits = Vec::new();
        for row in rows {
            edits.push(row?);
        }
        Ok(edits)
    }

    // ------------------------------------------------------------------
    // Ghost expiry
    // ------------------------------------------------------------------

    /// Physically reclaim expired ghost messages.
    ///
    /// Reads already filter them out, so running this concurrently with
    /// reads cannot change what any viewer sees. Returns the number of
    /// rows reclaimed.
    pub fn expire_ghosts(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages
             WHERE is_ghost = 1 AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_message_exists(&self, id: &MessageId) -> Result<()> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn hydrate_message(&self, mut message: Message) -> Result<Message> {
        message.reactions = self.reactions_for(&message.id)?;
        message.read_by = self.receipts_for(&message.id, "message_reads", "read_at")?;
        message.delivered_to =
            self.receipts_for(&message.id, "message_deliveries", "delivered_at")?;
        Ok(message)
    }

    fn receipts_for(
        &self,
        message_id: &MessageId,
        table: &str,
        ts_column: &str,
    ) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT principal, {ts_column} FROM {table}
             WHERE message_id = ?1 ORDER BY {ts_column} ASC, principal ASC"
        ))?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let principal: String = row.get(0)?;
            let ts_str: String = row.get(1)?;
            Ok(ReadReceipt {
                principal: PrincipalId::new(principal),
                at: ts_field(1, &ts_str)?,
            })
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }
}

/// Map a `rusqlite::Row` to a [`Message`] (reactions and receipts loaded
/// separately).
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let receiver: Option<String> = row.get(3)?;
    let content: String = row.get(4)?;
    let type_str: String = row.get(5)?;
    let media_url: Option<String> = row.get(6)?;
    let media_kind: Option<String> = row.get(7)?;
    let media_thumbnail: Option<String> = row.get(8)?;
    let media_duration_secs: Option<f64> = row.get(9)?;
    let media_size: Option<i64> = row.get(10)?;
    let media_filename: Option<String> = row.get(11)?;
    let shared_post_id: Option<String> = row.get(12)?;
    let reply_to: Option<String> = row.get(13)?;
    let forwarded_from: Option<String> = row.get(14)?;
    let edited: bool = row.get(15)?;
    let edited_at: Option<String> = row.get(16)?;
    let deleted: bool = row.get(17)?;
    let deleted_at: Option<String> = row.get(18)?;
    let is_ghost: bool = row.get(19)?;
    let expires_at: Option<String> = row.get(20)?;
    let created_str: String = row.get(21)?;

    let media = media_url.map(|url| MediaAttachment {
        url,
        kind: media_kind.unwrap_or_else(|| "file".to_string()),
        thumbnail: media_thumbnail,
        duration_secs: media_duration_secs,
        size_bytes: media_size,
        filename: media_filename,
    });

    Ok(Message {
        id: MessageId(uuid_field(0, &id_str)?),
        conversation_id: ConversationId(uuid_field(1, &conversation_str)?),
        sender: PrincipalId::new(sender),
        receiver: receiver.map(PrincipalId::new),
        content,
        message_type: MessageType::parse(&type_str).unwrap_or(MessageType::Text),
        media,
        shared_post_id: shared_post_id.map(PostId::new),
        reply_to: opt_uuid_field(13, reply_to)?.map(MessageId),
        forwarded_from: forwarded_from.map(PrincipalId::new),
        reactions: Vec::new(),
        read_by: Vec::new(),
        delivered_to: Vec::new(),
        edited,
        edited_at: opt_ts_field(16, edited_at)?,
        deleted,
        deleted_at: opt_ts_field(18, deleted_at)?,
        is_ghost,
        expires_at: opt_ts_field(20, expires_at)?,
        created_at: ts_field(21, &created_str)?,
    })
}

fn validate_payload(new: &NewMessage) -> Result<()> {
    let has_content = !new.content.trim().is_empty();
    let has_media = new.media.is_some();
    let has_post = new.shared_post_id.is_some();

    if !has_content && !has_media && !has_post {
        return Err(StoreError::InvalidMessagePayload(
            "message needs content, media, or a shared post".to_string(),
        ));
    }
    if has_media && has_post {
        return Err(StoreError::InvalidMessagePayload(
            "media and a shared post cannot be combined".to_string(),
        ));
    }
    if new.is_ghost && new.expires_at.is_none() {
        return Err(StoreError::InvalidMessagePayload(
            "ghost messages need an expiry".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use chrono::Duration;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s)
    }

    fn direct(db: &Database, a: &str, b: &str) -> Conversation {
        db.insert_direct_conversation(&p(a), &p(b), false, Utc::now())
            .unwrap()
    }

    fn text(conversation: &Conversation, sender: &str, content: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation.id,
            sender: p(sender),
            content: content.to_string(),
            message_type: MessageType::Text,
            media: None,
            shared_post_id: None,
            reply_to: None,
            forwarded_from: None,
            is_ghost: false,
            expires_at: None,
        }
    }

    fn media() -> MediaAttachment {
        MediaAttachment {
            url: "media/image/abc".to_string(),
            kind: "image".to_string(),
            thumbnail: None,
            duration_secs: None,
            size_bytes: Some(1024),
            filename: Some("photo.jpg".to_string()),
        }
    }

    #[test]
    fn payload_must_carry_exactly_one_kind() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");

        // Nothing at all.
        let err = db
            .insert_message(text(&conv, "alice", "   "), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessagePayload(_)));

        // Media and shared post together are ambiguous.
        let mut both = text(&conv, "alice", "");
        both.media = Some(media());
        both.shared_post_id = Some(PostId::new("post-1"));
        let err = db.insert_message(both, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessagePayload(_)));

        // A ghost without an expiry is malformed.
        let mut ghost = text(&conv, "alice", "boo");
        ghost.is_ghost = true;
        let err = db.insert_message(ghost, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessagePayload(_)));
    }

    #[test]
    fn receiver_is_computed_for_direct_only() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let msg = db
            .insert_message(text(&conv, "alice", "hi"), Utc::now())
            .unwrap();
        assert_eq!(msg.receiver, Some(p("bob")));

        let group = db
            .insert_group_conversation(&p("alice"), &[p("bob"), p("carol")], None, None, Utc::now())
            .unwrap();
        let msg = db
            .insert_message(text(&group, "alice", "hi all"), Utc::now())
            .unwrap();
        assert_eq!(msg.receiver, None);
    }

    #[test]
    fn pagination_is_newest_first_reversed_per_page() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let base = Utc::now();
        for i in 0..5 {
            db.insert_message(
                text(&conv, "alice", &format!("m{i}")),
                base + Duration::seconds(i),
            )
            .unwrap();
        }

        let now = base + Duration::seconds(10);
        let page1 = db
            .list_for_conversation(&conv.id, &p("bob"), 1, 2, now)
            .unwrap();
        let contents: Vec<_> = page1.messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
        assert_eq!(page1.total, 5);
        assert!(page1.has_more);

        let page3 = db
            .list_for_conversation(&conv.id, &p("bob"), 3, 2, now)
            .unwrap();
        let contents: Vec<_> = page3.messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["m0"]);
        assert!(!page3.has_more);
    }

    #[test]
    fn ghost_visible_until_expiry_then_reclaimed() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let now = Utc::now();

        let mut ghost = text(&conv, "alice", "vanishes");
        ghost.is_ghost = true;
        ghost.expires_at = Some(now + Duration::seconds(5));
        db.insert_message(ghost, now).unwrap();

        // Present immediately after creation.
        let page = db
            .list_for_conversation(&conv.id, &p("bob"), 1, 50, now + Duration::seconds(1))
            .unwrap();
        assert_eq!(page.messages.len(), 1);

        // Excluded once the clock passes the expiry, before any sweep.
        let page = db
            .list_for_conversation(&conv.id, &p("bob"), 1, 50, now + Duration::seconds(6))
            .unwrap();
        assert!(page.messages.is_empty());

        // The sweep physically reclaims it.
        let swept = db.expire_ghosts(now + Duration::seconds(6)).unwrap();
        assert_eq!(swept, 1);
        assert_eq!(db.expire_ghosts(now + Duration::seconds(7)).unwrap(), 0);
    }

    #[test]
    fn reaction_toggle_round_trips() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let msg = db
            .insert_message(text(&conv, "alice", "hi"), Utc::now())
            .unwrap();

        let (reactions, action) = db
            .toggle_reaction(&msg.id, &p("bob"), "❤️", Utc::now())
            .unwrap();
        assert_eq!(action, ReactionAction::Added);
        assert_eq!(reactions.len(), 1);

        let (reactions, action) = db
            .toggle_reaction(&msg.id, &p("bob"), "❤️", Utc::now())
            .unwrap();
        assert_eq!(action, ReactionAction::Removed);
        assert!(reactions.is_empty());
    }

    #[test]
    fn concurrent_reactions_from_different_principals_both_survive() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let msg = db
            .insert_message(text(&conv, "alice", "hi"), Utc::now())
            .unwrap();

        db.toggle_reaction(&msg.id, &p("alice"), "❤️", Utc::now())
            .unwrap();
        let (reactions, _) = db
            .toggle_reaction(&msg.id, &p("bob"), "❤️", Utc::now())
            .unwrap();
        assert_eq!(reactions.len(), 2);
    }

    #[test]
    fn reacting_to_missing_message_is_not_found() {
        let db = test_db();
        let err = db
            .toggle_reaction(&MessageId::new(), &p("bob"), "❤️", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn mark_read_is_idempotent_and_skips_own_messages() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        db.insert_message(text(&conv, "alice", "one"), Utc::now())
            .unwrap();
        db.insert_message(text(&conv, "alice", "two"), Utc::now())
            .unwrap();
        db.insert_message(text(&conv, "bob", "reply"), Utc::now())
            .unwrap();

        // Bob reads alice's two messages, not his own.
        assert_eq!(db.mark_read(&conv.id, &p("bob"), Utc::now()).unwrap(), 2);
        // Second pass adds nothing.
        assert_eq!(db.mark_read(&conv.id, &p("bob"), Utc::now()).unwrap(), 0);
    }

    #[test]
    fn delete_for_me_hides_only_for_that_principal() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let msg = db
            .insert_message(text(&conv, "alice", "hi"), Utc::now())
            .unwrap();

        db.delete_for_me(&msg.id, &p("bob"), Utc::now()).unwrap();
        // Idempotent.
        db.delete_for_me(&msg.id, &p("bob"), Utc::now()).unwrap();

        let bobs = db
            .list_for_conversation(&conv.id, &p("bob"), 1, 50, Utc::now())
            .unwrap();
        assert!(bobs.messages.is_empty());

        let alices = db
            .list_for_conversation(&conv.id, &p("alice"), 1, 50, Utc::now())
            .unwrap();
        assert_eq!(alices.messages.len(), 1);
        assert_eq!(alices.messages[0].content, "hi");
    }

    #[test]
    fn delete_for_everyone_leaves_a_tombstone() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let msg = db
            .insert_message(text(&conv, "alice", "secret"), Utc::now())
            .unwrap();

        let deleted = db
            .delete_for_everyone(&msg.id, &p("alice"), Utc::now())
            .unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.content, DELETED_PLACEHOLDER);
        assert!(deleted.deleted_at.is_some());
        assert_eq!(deleted.id, msg.id);
    }

    #[test]
    fn delete_for_everyone_rejects_non_sender() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let msg = db
            .insert_message(text(&conv, "alice", "mine"), Utc::now())
            .unwrap();

        let err = db
            .delete_for_everyone(&msg.id, &p("bob"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        // Unchanged.
        let reloaded = db.get_message(&msg.id).unwrap();
        assert!(!reloaded.deleted);
        assert_eq!(reloaded.content, "mine");
    }

    #[test]
    fn edit_keeps_history_and_is_sender_only() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let msg = db
            .insert_message(text(&conv, "alice", "first"), Utc::now())
            .unwrap();

        let err = db
            .edit_message(&msg.id, &p("bob"), "hijack", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let edited = db
            .edit_message(&msg.id, &p("alice"), "second", Utc::now())
            .unwrap();
        assert!(edited.edited);
        assert_eq!(edited.content, "second");

        let history = db.edit_history(&msg.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_content, "first");
    }

    #[test]
    fn list_since_returns_only_newer_messages() {
        let db = test_db();
        let conv = direct(&db, "alice", "bob");
        let base = Utc::now();
        db.insert_message(text(&conv, "alice", "old"), base).unwrap();
        db.insert_message(text(&conv, "alice", "new"), base + Duration::seconds(2))
            .unwrap();

        let caught_up = db
            .list_since(
                &conv.id,
                &p("bob"),
                base + Duration::seconds(1),
                base + Duration::seconds(3),
            )
            .unwrap();
        assert_eq!(caught_up.len(), 1);
        assert_eq!(caught_up[0].content, "new");
    }
}
