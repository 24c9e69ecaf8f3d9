//! # chirp-store
//!
//! Persistence layer for the messaging core: conversations, messages,
//! per-principal messaging settings, and notification records, all backed
//! by a single SQLite database.
//!
//! The [`Database`] struct owns the connection; each entity module adds its
//! CRUD surface as an `impl Database` block. Invariants the schema itself
//! enforces:
//!
//! - one direct conversation per unordered participant pair (`direct_key`
//!   UNIQUE column holding the sorted pair)
//! - at most one reaction per `(message, principal, emoji)` (compound
//!   primary key, so toggling can never duplicate)
//! - ghost expiry by timestamp (indexed `expires_at`, filtered at read
//!   time and reclaimed by the sweep)

pub mod conversations;
pub mod database;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod notifications;
pub(crate) mod rows;
pub mod settings;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::{
    AutoDeleteConfig, BlockedPrincipal, Conversation, ConversationFilter, DisappearingConfig,
    MarkKind, MediaAttachment, Message, MessageEdit, MessagePage, MessageType, MessagingSettings,
    MutedConversation, NewMessage, NewNotification, Notification, NotificationKind,
    NotificationPrefs, Participant, Reaction, ReactionAction, ReadReceipt, RequestStatus,
    SettingsUpdate, Theme, WhoCanMessage,
};
