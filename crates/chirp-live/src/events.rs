//! Live-event payloads pushed over a principal's connection.
//!
//! Serialized as `{"event": "...", "payload": {...}}` so a client can
//! switch on the event name.

use chrono::{DateTime, Utc};
use serde::Serialize;

use chirp_shared::{ConversationId, MessageId, PrincipalId};
use chirp_store::{Message, NotificationKind, Reaction, ReactionAction};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum LiveEvent {
    /// A message landed in a conversation the receiver can see.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        message: Message,
        conversation_id: ConversationId,
    },

    /// A reaction was added to or removed from a message.
    #[serde(rename_all = "camelCase")]
    MessageReaction {
        message_id: MessageId,
        conversation_id: ConversationId,
        reactions: Vec<Reaction>,
        action: ReactionAction,
        principal: PrincipalId,
        emoji: String,
    },

    /// A principal caught up on a conversation.
    #[serde(rename_all = "camelCase")]
    MessagesRead {
        conversation_id: ConversationId,
        principal: PrincipalId,
        read_at: DateTime<Utc>,
    },

    /// Awareness ping accompanying a fan-out, addressed to one recipient.
    #[serde(rename_all = "camelCase")]
    NewNotification {
        kind: NotificationKind,
        from: PrincipalId,
        message: Message,
        conversation_id: ConversationId,
        created_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    UserOnline { principal: PrincipalId },

    #[serde(rename_all = "camelCase")]
    UserOffline {
        principal: PrincipalId,
        last_seen: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    UserTyping {
        principal: PrincipalId,
        is_typing: bool,
        conversation_id: ConversationId,
    },
}

impl LiveEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "newMessage",
            Self::MessageReaction { .. } => "messageReaction",
            Self::MessagesRead { .. } => "messagesRead",
            Self::NewNotification { .. } => "newNotification",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
            Self::UserTyping { .. } => "userTyping",
        }
    }
}
