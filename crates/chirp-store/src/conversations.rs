//! CRUD operations for [`Conversation`] records.
//!
//! Direct-pair uniqueness is enforced by the UNIQUE `direct_key` column
//! (the sorted participant pair), so a racing second insert fails at the
//! engine rather than producing a duplicate.

use chrono::{DateTime, Utc};
use rusqlite::params;

use chirp_shared::{ConversationId, MessageId, PrincipalId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    Conversation, ConversationFilter, DisappearingConfig, MarkKind, Participant, RequestStatus,
};
use crate::rows::{opt_uuid_field, ts_field, uuid_field};

/// Canonical key for a direct conversation: the sorted pair.
fn direct_key(a: &PrincipalId, b: &PrincipalId) -> String {
    if a.as_str() <= b.as_str() {
        format!("{}|{}", a, b)
    } else {
        format!("{}|{}", b, a)
    }
}

const CONVERSATION_COLUMNS: &str = "id, is_group, group_name, group_description, created_by, \
     last_message_id, last_activity, is_message_request, requested_by, request_status, \
     disappearing_enabled, disappearing_duration_secs, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a direct conversation between `initiator` and `other`.
    ///
    /// The caller has already run the permission evaluator against
    /// `other`'s settings; `is_request` is its classification. The request
    /// is attributed to `initiator`.
    pub fn insert_direct_conversation(
        &self,
        initiator: &PrincipalId,
        other: &PrincipalId,
        is_request: bool,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        if initiator == other {
            return Err(StoreError::InvalidConversationShape(
                "cannot create a conversation with yourself".to_string(),
            ));
        }

        let id = ConversationId::new();
        let status = if is_request {
            RequestStatus::Pending
        } else {
            RequestStatus::Accepted
        };

        self.conn().execute(
            "INSERT INTO conversations
                 (id, is_group, direct_key, created_by, last_activity,
                  is_message_request, requested_by, request_status, created_at)
             VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?4)",
            params![
                id.to_string(),
                direct_key(initiator, other),
                initiator.as_str(),
                now.to_rfc3339(),
                is_request,
                is_request.then(|| initiator.as_str().to_string()),
                status.as_str(),
            ],
        )?;

        for p in [initiator, other] {
            self.insert_participant(&id, p, false, now)?;
        }

        self.get_conversation(&id)
    }

    /// Insert a group conversation.
    ///
    /// The participant set is `{creator} ∪ members` after deduplication and
    /// must hold 2..=50 principals; anything else is a terminal
    /// [`StoreError::InvalidConversationShape`]. The creator is the sole
    /// initial admin.
    pub fn insert_group_conversation(
        &self,
        creator: &PrincipalId,
        members: &[PrincipalId],
        group_name: Option<&str>,
        group_description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut participants: Vec<&PrincipalId> = vec![creator];
        for m in members {
            if !participants.contains(&m) {
                participants.push(m);
            }
        }

        if participants.len() < 2 || participants.len() > 50 {
            return Err(StoreError::InvalidConversationShape(format!(
                "group conversations must have 2..=50 participants, got {}",
                participants.len()
            )));
        }

        let id = ConversationId::new();

        self.conn().execute(
            "INSERT INTO conversations
                 (id, is_group, group_name, group_description, created_by,
                  last_activity, request_status, created_at)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, 'accepted', ?5)",
            params![
                id.to_string(),
                group_name,
                group_description,
                creator.as_str(),
                now.to_rfc3339(),
            ],
        )?;

        for p in &participants {
            self.insert_participant(&id, p, *p == creator, now)?;
        }

        self.get_conversation(&id)
    }

    fn insert_participant(
        &self,
        conversation: &ConversationId,
        principal: &PrincipalId,
        is_admin: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversation_participants (conversation_id, principal, is_admin, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.to_string(),
                principal.as_str(),
                is_admin,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation with its participant set.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let mut conversation = self
            .conn()
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        conversation.participants = self.participants_of(id)?;
        Ok(conversation)
    }

    /// Find the direct (non-group) conversation whose participant set is
    /// exactly `{a, b}`, in either order.
    pub fn find_direct_conversation(
        &self,
        a: &PrincipalId,
        b: &PrincipalId,
    ) -> Result<Option<Conversation>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                params![direct_key(a, b)],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match id {
            Some(id) => {
                let id = ConversationId::parse(&id)?;
                Ok(Some(self.get_conversation(&id)?))
            }
            None => Ok(None),
        }
    }

    /// List the conversations `principal` participates in, newest activity
    /// first.
    ///
    /// `All` excludes still-pending message requests (they live behind the
    /// `Requests` filter until accepted); `archived` toggles between the
    /// principal's archived and non-archived sets.
    pub fn list_conversations_for(
        &self,
        principal: &PrincipalId,
        filter: ConversationFilter,
        archived: bool,
    ) -> Result<Vec<Conversation>> {
        let filter_clause = match filter {
            ConversationFilter::All => {
                "NOT (c.is_message_request = 1 AND c.request_status = 'pending')"
            }
            ConversationFilter::Direct => "c.is_group = 0 AND c.request_status = 'accepted'",
            ConversationFilter::Group => "c.is_group = 1",
            ConversationFilter::Requests => {
                "c.is_message_request = 1 AND c.request_status = 'pending'"
            }
        };
        let archived_clause = if archived { "" } else { "NOT" };

        let sql = format!(
            "SELECT {cols} FROM conversations c
             JOIN conversation_participants cp
               ON cp.conversation_id = c.id AND cp.principal = ?1
             WHERE {filter_clause}
               AND {archived_clause} EXISTS (
                   SELECT 1 FROM conversation_marks m
                   WHERE m.conversation_id = c.id
                     AND m.principal = ?1
                     AND m.kind = 'archived')
             ORDER BY c.last_activity DESC",
            cols = CONVERSATION_COLUMNS
                .split(", ")
                .map(|c| format!("c.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![principal.as_str()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            let mut conversation = row?;
            conversation.participants = self.participants_of(&conversation.id)?;
            conversations.push(conversation);
        }
        Ok(conversations)
    }

    /// Participant set of a conversation, in join order.
    pub fn participants_of(&self, id: &ConversationId) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT principal, is_admin, joined_at
             FROM conversation_participants
             WHERE conversation_id = ?1
             ORDER BY joined_at ASC, principal ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            let principal: String = row.get(0)?;
            let is_admin: bool = row.get(1)?;
            let joined_str: String = row.get(2)?;
            Ok(Participant {
                principal: PrincipalId::new(principal),
                is_admin,
                joined_at: ts_field(2, &joined_str)?,
            })
        })?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }

    /// Whether `principal` belongs to the conversation's participant set.
    pub fn is_participant(&self, id: &ConversationId, principal: &PrincipalId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversation_participants
             WHERE conversation_id = ?1 AND principal = ?2",
            params![id.to_string(), principal.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Advance the conversation's activity pointer after a successful send.
    pub fn touch_activity(
        &self,
        id: &ConversationId,
        last_message: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations SET last_message_id = ?1, last_activity = ?2 WHERE id = ?3",
            params![last_message.to_string(), at.to_rfc3339(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Transition a message request (recipient accepting or declining).
    pub fn set_request_status(&self, id: &ConversationId, status: RequestStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations SET request_status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Update the conversation-level disappearing-messages configuration.
    pub fn set_disappearing(&self, id: &ConversationId, config: DisappearingConfig) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations
             SET disappearing_enabled = ?1, disappearing_duration_secs = ?2
             WHERE id = ?3",
            params![config.enabled, config.duration_secs, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Per-principal marks (muted / archived / pinned)
    // ------------------------------------------------------------------

    /// Set a mark, replacing any previous one of the same kind.
    pub fn set_conversation_mark(
        &self,
        id: &ConversationId,
        principal: &PrincipalId,
        kind: MarkKind,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO conversation_marks
                 (conversation_id, principal, kind, marked_at, until)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                principal.as_str(),
                kind.as_str(),
                now.to_rfc3339(),
                until.map(|u| u.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Clear a mark.  Returns `true` if one was present.
    pub fn clear_conversation_mark(
        &self,
        id: &ConversationId,
        principal: &PrincipalId,
        kind: MarkKind,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM conversation_marks
             WHERE conversation_id = ?1 AND principal = ?2 AND kind = ?3",
            params![id.to_string(), principal.as_str(), kind.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Whether the mark is currently in effect (a `muted` mark with an
    /// elapsed `until` no longer counts).
    pub fn has_conversation_mark(
        &self,
        id: &ConversationId,
        principal: &PrincipalId,
        kind: MarkKind,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversation_marks
             WHERE conversation_id = ?1 AND principal = ?2 AND kind = ?3
               AND (until IS NULL OR until > ?4)",
            params![
                id.to_string(),
                principal.as_str(),
                kind.as_str(),
                now.to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Conversation`] (participants loaded
/// separately).
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let is_group: bool = row.get(1)?;
    let group_name: Option<String> = row.get(2)?;
    let group_description: Option<String> = row.get(3)?;
    let created_by: String = row.get(4)?;
    let last_message_str: Option<String> = row.get(5)?;
    let last_activity_str: String = row.get(6)?;
    let is_message_request: bool = row.get(7)?;
    let requested_by: Option<String> = row.get(8)?;
    let request_status_str: String = row.get(9)?;
    let disappearing_enabled: bool = row.get(10)?;
    let disappearing_duration_secs: i64 = row.get(11)?;
    let created_str: String = row.get(12)?;

    Ok(Conversation {
        id: ConversationId(uuid_field(0, &id_str)?),
        participants: Vec::new(),
        is_group,
        group_name,
        group_description,
        created_by: PrincipalId::new(created_by),
        last_message_id: opt_uuid_field(5, last_message_str)?.map(MessageId),
        last_activity: ts_field(6, &last_activity_str)?,
        is_message_request,
        requested_by: requested_by.map(PrincipalId::new),
        request_status: RequestStatus::parse(&request_status_str)
            .unwrap_or(RequestStatus::Accepted),
        disappearing: DisappearingConfig {
            enabled: disappearing_enabled,
            duration_secs: disappearing_duration_secs,
        },
        created_at: ts_field(12, &created_str)?,
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

    fn members(n: usize) -> Vec<PrincipalId> {
        (0..n).map(|i| p(&format!("member-{i}"))).collect()
    }

    #[test]
    fn direct_conversation_has_two_participants() {
        let db = test_db();
        let conv = db
            .insert_direct_conversation(&p("alice"), &p("bob"), false, Utc::now())
            .unwrap();

        assert!(!conv.is_group);
        assert_eq!(conv.participants.len(), 2);
        assert!(conv.is_participant(&p("alice")));
        assert!(conv.is_participant(&p("bob")));
        assert_eq!(conv.request_status, RequestStatus::Accepted);
    }

    #[test]
    fn direct_pair_is_unique_in_either_order() {
        let db = test_db();
        let conv = db
            .insert_direct_conversation(&p("alice"), &p("bob"), false, Utc::now())
            .unwrap();

        let found_ab = db
            .find_direct_conversation(&p("alice"), &p("bob"))
            .unwrap()
            .unwrap();
        let found_ba = db
            .find_direct_conversation(&p("bob"), &p("alice"))
            .unwrap()
            .unwrap();
        assert_eq!(found_ab.id, conv.id);
        assert_eq!(found_ba.id, conv.id);

        // A second insert for the same pair trips the UNIQUE direct_key.
        assert!(db
            .insert_direct_conversation(&p("bob"), &p("alice"), false, Utc::now())
            .is_err());
    }

    #[test]
    fn self_conversation_is_rejected() {
        let db = test_db();
        let err = db
            .insert_direct_conversation(&p("alice"), &p("alice"), false, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidConversationShape(_)));
    }

    #[test]
    fn request_classification_is_persisted() {
        let db = test_db();
        let conv = db
            .insert_direct_conversation(&p("alice"), &p("bob"), true, Utc::now())
            .unwrap();

        assert!(conv.is_message_request);
        assert_eq!(conv.requested_by, Some(p("alice")));
        assert_eq!(conv.request_status, RequestStatus::Pending);
    }

    #[test]
    fn group_shape_limits() {
        let db = test_db();

        // 1 + 49 = 50 participants: allowed.
        let conv = db
            .insert_group_conversation(&p("creator"), &members(49), Some("big"), None, Utc::now())
            .unwrap();
        assert!(conv.is_group);
        assert_eq!(conv.participants.len(), 50);

        // 1 + 50 = 51: rejected.
        let err = db
            .insert_group_conversation(&p("creator"), &members(50), None, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidConversationShape(_)));

        // Creator alone: rejected.
        let err = db
            .insert_group_conversation(&p("creator"), &[], None, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidConversationShape(_)));
    }

    #[test]
    fn group_creator_is_sole_admin_and_duplicates_collapse() {
        let db = test_db();
        let conv = db
            .insert_group_conversation(
                &p("creator"),
                &[p("a"), p("a"), p("creator"), p("b")],
                None,
                None,
                Utc::now(),
            )
            .unwrap();

        assert_eq!(conv.participants.len(), 3);
        let admins: Vec<_> = conv
            .participants
            .iter()
            .filter(|m| m.is_admin)
            .map(|m| m.principal.clone())
            .collect();
        assert_eq!(admins, vec![p("creator")]);
    }

    #[test]
    fn list_excludes_pending_requests_from_all() {
        let db = test_db();
        db.insert_direct_conversation(&p("alice"), &p("bob"), false, Utc::now())
            .unwrap();
        let pending = db
            .insert_direct_conversation(&p("carol"), &p("bob"), true, Utc::now())
            .unwrap();

        let all = db
            .list_conversations_for(&p("bob"), ConversationFilter::All, false)
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.iter().all(|c| c.id != pending.id));

        let requests = db
            .list_conversations_for(&p("bob"), ConversationFilter::Requests, false)
            .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, pending.id);

        // Once accepted, the conversation moves into the main list.
        db.set_request_status(&pending.id, RequestStatus::Accepted)
            .unwrap();
        let all = db
            .list_conversations_for(&p("bob"), ConversationFilter::All, false)
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn list_sorted_by_last_activity_desc() {
        let db = test_db();
        let older = db
            .insert_direct_conversation(&p("alice"), &p("bob"), false, Utc::now())
            .unwrap();
        let newer = db
            .insert_direct_conversation(&p("alice"), &p("carol"), false, Utc::now())
            .unwrap();

        db.touch_activity(
            &older.id,
            &MessageId::new(),
            Utc::now() + chrono::Duration::seconds(5),
        )
        .unwrap();

        let list = db
            .list_conversations_for(&p("alice"), ConversationFilter::All, false)
            .unwrap();
        assert_eq!(list[0].id, older.id);
        assert_eq!(list[1].id, newer.id);
    }

    #[test]
    fn archived_toggle() {
        let db = test_db();
        let conv = db
            .insert_direct_conversation(&p("alice"), &p("bob"), false, Utc::now())
            .unwrap();

        db.set_conversation_mark(&conv.id, &p("alice"), MarkKind::Archived, None, Utc::now())
            .unwrap();

        let active = db
            .list_conversations_for(&p("alice"), ConversationFilter::All, false)
            .unwrap();
        assert!(active.is_empty());

        let archived = db
            .list_conversations_for(&p("alice"), ConversationFilter::All, true)
            .unwrap();
        assert_eq!(archived.len(), 1);

        // Archiving is per-principal: bob still sees it in his main list.
        let bobs = db
            .list_conversations_for(&p("bob"), ConversationFilter::All, false)
            .unwrap();
        assert_eq!(bobs.len(), 1);
    }

    #[test]
    fn muted_mark_expires() {
        let db = test_db();
        let conv = db
            .insert_direct_conversation(&p("alice"), &p("bob"), false, Utc::now())
            .unwrap();

        let now = Utc::now();
        db.set_conversation_mark(
            &conv.id,
            &p("alice"),
            MarkKind::Muted,
            Some(now + chrono::Duration::hours(1)),
            now,
        )
        .unwrap();

        assert!(db
            .has_conversation_mark(&conv.id, &p("alice"), MarkKind::Muted, now)
            .unwrap());
        assert!(!db
            .has_conversation_mark(
                &conv.id,
                &p("alice"),
                MarkKind::Muted,
                now + chrono::Duration::hours(2)
            )
            .unwrap());
    }

    #[test]
    fn touch_activity_updates_pointer() {
        let db = test_db();
        let conv = db
            .insert_direct_conversation(&p("alice"), &p("bob"), false, Utc::now())
            .unwrap();

        let msg_id = MessageId::new();
        let at = Utc::now() + chrono::Duration::seconds(1);
        db.touch_activity(&conv.id, &msg_id, at).unwrap();

        let reloaded = db.get_conversation(&conv.id).unwrap();
        assert_eq!(reloaded.last_message_id, Some(msg_id));
        assert!(reloaded.last_activity > conv.last_activity);
    }

    #[test]
    fn get_missing_conversation_is_not_found() {
        let db = test_db();
        let err = db.get_conversation(&ConversationId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
