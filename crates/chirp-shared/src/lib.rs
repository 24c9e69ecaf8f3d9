//! # chirp-shared
//!
//! Identifier newtypes shared by every other crate in the workspace.

pub mod types;

pub use types::{ConversationId, MessageId, NotificationId, PostId, PrincipalId};
