//! Connection tracking and event routing.
//!
//! Maintains an in-memory map of connected principals, their live
//! connection handles, and the conversation channels they joined. The
//! registry is an explicit, injectable component: construct one at service
//! start and hand clones to whoever needs to emit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use chirp_shared::{ConversationId, PrincipalId};

use crate::events::LiveEvent;

/// A principal's live connection handle.
#[derive(Debug)]
struct Connection {
    /// Distinguishes this attachment from any it replaced, so a stale
    /// disconnect cannot evict a fresh reconnect.
    id: Uuid,
    tx: UnboundedSender<LiveEvent>,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<PrincipalId, Connection>,
    channels: HashMap<ConversationId, HashSet<PrincipalId>>,
}

/// What a successful [`PresenceRegistry::register`] hands back: the
/// receiving end of the connection plus the id to present on disconnect.
pub struct ConnectionTicket {
    pub connection_id: Uuid,
    pub events: UnboundedReceiver<LiveEvent>,
}

/// Tracks all currently connected principals and routes events to them.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl PresenceRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a principal's live connection.
    ///
    /// Rapid reconnects are overwrite-last-wins: a previous handle for the
    /// same principal is dropped (its receiver closes) along with its
    /// channel subscriptions, and the new handle takes over immediately.
    pub async fn register(&self, principal: &PrincipalId) -> ConnectionTicket {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut inner = self.inner.write().await;
        if inner.connections.remove(principal).is_some() {
            debug!(principal = %principal, "replacing existing live connection");
            Self::leave_all_channels(&mut inner, principal);
        }
        inner.connections.insert(
            principal.clone(),
            Connection {
                id,
                tx,
                connected_at: Utc::now(),
            },
        );

        debug!(principal = %principal, connection = %id, "live connection registered");

        ConnectionTicket {
            connection_id: id,
            events: rx,
        }
    }

    /// Detach a connection.
    ///
    /// Only removes the mapping when `connection_id` still identifies the
    /// live handle; a disconnect arriving after the principal already
    /// reconnected is a no-op. Returns whether the mapping was removed.
    pub async fn unregister(&self, principal: &PrincipalId, connection_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;

        match inner.connections.get(principal) {
            Some(conn) if conn.id == connection_id => {
                inner.connections.remove(principal);
                Self::leave_all_channels(&mut inner, principal);
                debug!(principal = %principal, connection = %connection_id, "live connection removed");
                true
            }
            _ => false,
        }
    }

    fn leave_all_channels(inner: &mut Inner, principal: &PrincipalId) {
        inner.channels.retain(|_, members| {
            members.remove(principal);
            !members.is_empty()
        });
    }

    /// Subscribe a connected principal to a conversation's channel.
    pub async fn join_conversation(&self, conversation: &ConversationId, principal: &PrincipalId) {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(principal) {
            return;
        }
        inner
            .channels
            .entry(*conversation)
            .or_default()
            .insert(principal.clone());
        debug!(principal = %principal, conversation = %conversation, "joined conversation channel");
    }

    /// Unsubscribe from a conversation's channel.
    pub async fn leave_conversation(&self, conversation: &ConversationId, principal: &PrincipalId) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.channels.get_mut(conversation) {
            members.remove(principal);
            if members.is_empty() {
                inner.channels.remove(conversation);
            }
        }
    }

    // ------------------------------------------------------------------
    // Emission (fire-and-forget, at-most-once per connected handle)
    // ------------------------------------------------------------------

    /// Push an event to one principal's personal channel. Returns whether
    /// a connected handle accepted it; offline principals are skipped.
    pub async fn emit_to_principal(&self, principal: &PrincipalId, event: &LiveEvent) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(principal) {
            Some(conn) => {
                if conn.tx.send(event.clone()).is_err() {
                    debug!(principal = %principal, event = event.name(), "dropped event for closed connection");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Push an event to every subscriber of a conversation's channel.
    pub async fn emit_to_conversation(&self, conversation: &ConversationId, event: &LiveEvent) {
        let inner = self.inner.read().await;
        let Some(members) = inner.channels.get(conversation) else {
            return;
        };
        for principal in members {
            if let Some(conn) = inner.connections.get(principal) {
                if conn.tx.send(event.clone()).is_err() {
                    debug!(principal = %principal, event = event.name(), "dropped event for closed connection");
                }
            }
        }
    }

    /// Push an event to every connected principal except `except`.
    pub async fn broadcast_except(&self, except: &PrincipalId, event: &LiveEvent) {
        let inner = self.inner.read().await;
        for (principal, conn) in &inner.connections {
            if principal == except {
                continue;
            }
            if conn.tx.send(event.clone()).is_err() {
                debug!(principal = %principal, event = event.name(), "dropped event for closed connection");
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether the principal currently holds a live connection.
    pub async fn is_online(&self, principal: &PrincipalId) -> bool {
        self.inner.read().await.connections.contains_key(principal)
    }

    /// Snapshot of all connected principals.
    pub async fn online_principals(&self) -> Vec<PrincipalId> {
        self.inner.read().await.connections.keys().cloned().collect()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// When the principal's current connection was established.
    pub async fn connected_since(&self, principal: &PrincipalId) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .connections
            .get(principal)
            .map(|c| c.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s)
    }

    fn online_event(s: &str) -> LiveEvent {
        LiveEvent::UserOnline { principal: p(s) }
    }

    #[tokio::test]
    async fn register_emit_receive() {
        let registry = PresenceRegistry::new();
        let mut ticket = registry.register(&p("alice")).await;

        assert!(registry.is_online(&p("alice")).await);
        assert!(registry.emit_to_principal(&p("alice"), &online_event("bob")).await);

        let event = ticket.events.recv().await.unwrap();
        assert_eq!(event.name(), "userOnline");
    }

    #[tokio::test]
    async fn emit_to_offline_principal_is_noop() {
        let registry = PresenceRegistry::new();
        assert!(!registry.emit_to_principal(&p("ghost"), &online_event("x")).await);
    }

    #[tokio::test]
    async fn reconnect_is_overwrite_last_wins() {
        let registry = PresenceRegistry::new();
        let first = registry.register(&p("alice")).await;
        let mut second = registry.register(&p("alice")).await;

        assert_eq!(registry.connection_count().await, 1);

        // Events land on the new handle only.
        registry.emit_to_principal(&p("alice"), &online_event("x")).await;
        assert!(second.events.recv().await.is_some());

        // The stale disconnect must not evict the fresh connection.
        assert!(!registry.unregister(&p("alice"), first.connection_id).await);
        assert!(registry.is_online(&p("alice")).await);

        // The real disconnect does.
        assert!(registry.unregister(&p("alice"), second.connection_id).await);
        assert!(!registry.is_online(&p("alice")).await);
    }

    #[tokio::test]
    async fn conversation_channel_routing() {
        let registry = PresenceRegistry::new();
        let conversation = ConversationId::new();

        let mut alice = registry.register(&p("alice")).await;
        let mut bob = registry.register(&p("bob")).await;
        let mut carol = registry.register(&p("carol")).await;

        registry.join_conversation(&conversation, &p("alice")).await;
        registry.join_conversation(&conversation, &p("bob")).await;

        registry
            .emit_to_conversation(&conversation, &online_event("x"))
            .await;

        assert!(alice.events.try_recv().is_ok());
        assert!(bob.events.try_recv().is_ok());
        assert!(carol.events.try_recv().is_err());

        registry.leave_conversation(&conversation, &p("bob")).await;
        registry
            .emit_to_conversation(&conversation, &online_event("y"))
            .await;
        assert!(alice.events.try_recv().is_ok());
        assert!(bob.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn joining_requires_a_connection() {
        let registry = PresenceRegistry::new();
        let conversation = ConversationId::new();

        registry.join_conversation(&conversation, &p("offline")).await;
        let mut alice = registry.register(&p("alice")).await;
        registry.join_conversation(&conversation, &p("alice")).await;

        registry
            .emit_to_conversation(&conversation, &online_event("x"))
            .await;
        assert!(alice.events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn disconnect_clears_channel_subscriptions() {
        let registry = PresenceRegistry::new();
        let conversation = ConversationId::new();

        let alice = registry.register(&p("alice")).await;
        registry.join_conversation(&conversation, &p("alice")).await;
        registry.unregister(&p("alice"), alice.connection_id).await;

        // A fresh connection does not inherit the old subscription.
        let mut alice2 = registry.register(&p("alice")).await;
        registry
            .emit_to_conversation(&conversation, &online_event("x"))
            .await;
        assert!(alice2.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_origin() {
        let registry = PresenceRegistry::new();
        let mut alice = registry.register(&p("alice")).await;
        let mut bob = registry.register(&p("bob")).await;

        registry.broadcast_except(&p("alice"), &online_event("alice")).await;

        assert!(bob.events.try_recv().is_ok());
        assert!(alice.events.try_recv().is_err());
    }
}
