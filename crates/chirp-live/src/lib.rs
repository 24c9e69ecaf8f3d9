//! # chirp-live
//!
//! Presence tracking and live-event routing for the messaging core.
//!
//! The [`PresenceRegistry`] owns the in-memory connection table: which
//! principal is attached to which live connection, and which conversation
//! channels each connected principal has joined. Emission is
//! fire-and-forget, at-most-once per currently connected handle; offline
//! principals rely on their notification records for eventual awareness.

pub mod events;
pub mod registry;

pub use events::LiveEvent;
pub use registry::{ConnectionTicket, PresenceRegistry};
