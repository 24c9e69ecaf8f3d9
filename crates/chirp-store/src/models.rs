//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer and to live-event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chirp_shared::{ConversationId, MessageId, NotificationId, PostId, PrincipalId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Lifecycle of a message request.
///
/// A conversation is born `pending` only when the permission evaluator
/// classified the first send as a request; otherwise it starts `accepted`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

/// A member of a conversation's participant set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub principal: PrincipalId,
    /// Group admins may later manage membership; the creator is the sole
    /// initial admin. Always `false` for direct conversations.
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// Server-enforced expiry applied to messages sent in this conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisappearingConfig {
    pub enabled: bool,
    pub duration_secs: i64,
}

impl Default for DisappearingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_secs: 86_400, // 24 hours
        }
    }
}

/// A conversation: either a direct pair or a group of 2..=50 principals.
///
/// Direct conversations are unique per unordered pair; group conversations
/// carry optional name/description and an admin set. Conversations are
/// never hard-deleted by this core; archiving is per-principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<Participant>,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_description: Option<String>,
    pub created_by: PrincipalId,
    pub last_message_id: Option<MessageId>,
    pub last_activity: DateTime<Utc>,
    pub is_message_request: bool,
    pub requested_by: Option<PrincipalId>,
    pub request_status: RequestStatus,
    pub disappearing: DisappearingConfig,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, principal: &PrincipalId) -> bool {
        self.participants.iter().any(|p| &p.principal == principal)
    }

    /// Every participant except `principal` — the fan-out recipient set.
    pub fn other_participants(&self, principal: &PrincipalId) -> Vec<PrincipalId> {
        self.participants
            .iter()
            .filter(|p| &p.principal != principal)
            .map(|p| p.principal.clone())
            .collect()
    }
}

/// Inbox filter for [`Database::list_conversations_for`].
///
/// [`Database::list_conversations_for`]: crate::Database::list_conversations_for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationFilter {
    /// Everything except still-pending message requests.
    All,
    /// Accepted one-on-one conversations.
    Direct,
    /// Group conversations.
    Group,
    /// Pending message requests only.
    Requests,
}

/// Per-principal conversation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    Muted,
    Archived,
    Pinned,
}

impl MarkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Muted => "muted",
            Self::Archived => "archived",
            Self::Pinned => "pinned",
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Gif,
    Sticker,
    PostShare,
    Voice,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Gif => "gif",
            Self::Sticker => "sticker",
            Self::PostShare => "post_share",
            Self::Voice => "voice",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "gif" => Some(Self::Gif),
            "sticker" => Some(Self::Sticker),
            "post_share" => Some(Self::PostShare),
            "voice" => Some(Self::Voice),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Media already uploaded to the blob store, referenced by URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaAttachment {
    pub url: String,
    /// image | video | gif | sticker | voice | file
    pub kind: String,
    pub thumbnail: Option<String>,
    /// Seconds; videos and voice messages only.
    pub duration_secs: Option<f64>,
    pub size_bytes: Option<i64>,
    pub filename: Option<String>,
}

/// A single emoji reaction. At most one per `(principal, emoji)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub principal: PrincipalId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// What a reaction toggle actually did, for the event payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub principal: PrincipalId,
    pub at: DateTime<Utc>,
}

/// A persisted chat message.
///
/// The row is the durable contract of a send: notifications and live
/// events derived from it are advisory and may be lost without affecting
/// the message itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: PrincipalId,
    /// The other participant of a direct conversation. Kept for simpler
    /// querying, never consulted for authorization. `None` in groups.
    pub receiver: Option<PrincipalId>,
    pub content: String,
    pub message_type: MessageType,
    pub media: Option<MediaAttachment>,
    pub shared_post_id: Option<PostId>,
    pub reply_to: Option<MessageId>,
    pub forwarded_from: Option<PrincipalId>,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<ReadReceipt>,
    pub delivered_to: Vec<ReadReceipt>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_ghost: bool,
    /// Set iff `is_ghost`; the message is excluded from reads once
    /// `now > expires_at`.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Database::insert_message`].
///
/// [`Database::insert_message`]: crate::Database::insert_message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender: PrincipalId,
    pub content: String,
    pub message_type: MessageType,
    pub media: Option<MediaAttachment>,
    pub shared_post_id: Option<PostId>,
    pub reply_to: Option<MessageId>,
    pub forwarded_from: Option<PrincipalId>,
    pub is_ghost: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One page of conversation history, oldest-first within the page.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
    pub has_more: bool,
}

/// A superseded revision of an edited message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEdit {
    pub message_id: MessageId,
    pub previous_content: String,
    pub edited_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Messaging settings
// ---------------------------------------------------------------------------

/// Who may open a conversation with this principal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WhoCanMessage {
    Everyone,
    Followers,
    Following,
    MutualFollowers,
    NoOne,
}

impl WhoCanMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::Followers => "followers",
            Self::Following => "following",
            Self::MutualFollowers => "mutual_followers",
            Self::NoOne => "no_one",
        }
    }

    /// Parse a stored value. Unknown strings fall back to `Everyone`
    /// (fail-open), matching the permission evaluator's defensive default
    /// for settings written by older or newer versions.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "everyone" => Self::Everyone,
            "followers" => Self::Followers,
            "following" => Self::Following,
            "mutual_followers" => Self::MutualFollowers,
            "no_one" => Self::NoOne,
            other => {
                tracing::warn!(value = other, "unknown who_can_message value, failing open");
                Self::Everyone
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    Auto,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Per-category notification toggles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPrefs {
    pub messages: bool,
    pub message_requests: bool,
    pub group_messages: bool,
    pub reactions: bool,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            messages: true,
            message_requests: true,
            group_messages: true,
            reactions: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoDeleteConfig {
    pub enabled: bool,
    pub duration_days: i64,
}

impl Default for AutoDeleteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedPrincipal {
    pub principal: PrincipalId,
    pub blocked_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutedConversation {
    pub conversation_id: ConversationId,
    pub muted_at: DateTime<Utc>,
    /// `None` mutes indefinitely.
    pub muted_until: Option<DateTime<Utc>>,
}

/// Per-principal messaging preferences. Created lazily with defaults on
/// first access; mutated only by the owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagingSettings {
    pub principal: PrincipalId,
    pub who_can_message: WhoCanMessage,
    pub allow_message_requests: bool,
    pub read_receipts: bool,
    pub show_online_status: bool,
    pub show_typing_indicator: bool,
    pub notifications: NotificationPrefs,
    pub auto_delete: AutoDeleteConfig,
    pub theme: Theme,
    pub chat_wallpaper: Option<String>,
    pub blocked_users: Vec<BlockedPrincipal>,
    pub muted_conversations: Vec<MutedConversation>,
    pub updated_at: DateTime<Utc>,
}

impl MessagingSettings {
    /// The defaults applied on first access.
    pub fn default_for(principal: PrincipalId, now: DateTime<Utc>) -> Self {
        Self {
            principal,
            who_can_message: WhoCanMessage::Everyone,
            allow_message_requests: true,
            read_receipts: true,
            show_online_status: true,
            show_typing_indicator: true,
            notifications: NotificationPrefs::default(),
            auto_delete: AutoDeleteConfig::default(),
            theme: Theme::Auto,
            chat_wallpaper: None,
            blocked_users: Vec::new(),
            muted_conversations: Vec::new(),
            updated_at: now,
        }
    }

    pub fn has_blocked(&self, principal: &PrincipalId) -> bool {
        self.blocked_users.iter().any(|b| &b.principal == principal)
    }
}

/// Explicit update contract for [`MessagingSettings`].
///
/// Every mutable field is enumerated; unknown fields are rejected during
/// deserialization rather than silently merged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsUpdate {
    pub who_can_message: Option<WhoCanMessage>,
    pub allow_message_requests: Option<bool>,
    pub read_receipts: Option<bool>,
    pub show_online_status: Option<bool>,
    pub show_typing_indicator: Option<bool>,
    pub notifications: Option<NotificationPrefsUpdate>,
    pub auto_delete: Option<AutoDeleteUpdate>,
    pub theme: Option<Theme>,
    pub chat_wallpaper: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotificationPrefsUpdate {
    pub messages: Option<bool>,
    pub message_requests: Option<bool>,
    pub group_messages: Option<bool>,
    pub reactions: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutoDeleteUpdate {
    pub enabled: Option<bool>,
    pub duration_days: Option<i64>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Notification category. This core only produces `message` records; the
/// enum leaves room for the other subsystems' kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            _ => None,
        }
    }
}

/// An append-only awareness record derived from a send. Never required for
/// delivery correctness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub from: PrincipalId,
    pub to: PrincipalId,
    pub kind: NotificationKind,
    pub message_id: Option<MessageId>,
    pub conversation_id: Option<ConversationId>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Database::insert_notification`].
///
/// [`Database::insert_notification`]: crate::Database::insert_notification
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub from: PrincipalId,
    pub to: PrincipalId,
    pub kind: NotificationKind,
    pub message_id: Option<MessageId>,
    pub conversation_id: Option<ConversationId>,
}
