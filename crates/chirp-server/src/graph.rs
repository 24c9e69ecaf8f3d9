//! Read-only view of the social graph.
//!
//! Follow relationships are owned by the profile subsystem; this core
//! only reads directional edges. "a follows b" and "b follows a" are
//! independent facts and must never be conflated.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use chirp_shared::PrincipalId;

#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Whether `follower` follows `followee` (a directional edge).
    async fn is_following(&self, follower: &PrincipalId, followee: &PrincipalId) -> bool;

    /// Everyone who follows `principal`.
    async fn followers_of(&self, principal: &PrincipalId) -> Vec<PrincipalId>;
}

/// In-process graph used when the profile subsystem is not wired in
/// (standalone mode) and throughout the test suite.
#[derive(Debug, Default)]
pub struct InMemorySocialGraph {
    /// followee -> set of followers.
    followers: RwLock<HashMap<PrincipalId, HashSet<PrincipalId>>>,
}

impl InMemorySocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `follower` follows `followee`.
    pub async fn follow(&self, follower: &PrincipalId, followee: &PrincipalId) {
        self.followers
            .write()
            .await
            .entry(followee.clone())
            .or_default()
            .insert(follower.clone());
    }

    pub async fn unfollow(&self, follower: &PrincipalId, followee: &PrincipalId) {
        if let Some(set) = self.followers.write().await.get_mut(followee) {
            set.remove(follower);
        }
    }
}

#[async_trait]
impl SocialGraph for InMemorySocialGraph {
    async fn is_following(&self, follower: &PrincipalId, followee: &PrincipalId) -> bool {
        self.followers
            .read()
            .await
            .get(followee)
            .map(|set| set.contains(follower))
            .unwrap_or(false)
    }

    async fn followers_of(&self, principal: &PrincipalId) -> Vec<PrincipalId> {
        let mut followers: Vec<PrincipalId> = self
            .followers
            .read()
            .await
            .get(principal)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        followers.sort();
        followers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s)
    }

    #[tokio::test]
    async fn edges_are_directional() {
        let graph = InMemorySocialGraph::new();
        graph.follow(&p("alice"), &p("bob")).await;

        assert!(graph.is_following(&p("alice"), &p("bob")).await);
        assert!(!graph.is_following(&p("bob"), &p("alice")).await);
        assert_eq!(graph.followers_of(&p("bob")).await, vec![p("alice")]);
        assert!(graph.followers_of(&p("alice")).await.is_empty());
    }

    #[tokio::test]
    async fn unfollow_removes_the_edge() {
        let graph = InMemorySocialGraph::new();
        graph.follow(&p("alice"), &p("bob")).await;
        graph.unfollow(&p("alice"), &p("bob")).await;
        assert!(!graph.is_following(&p("alice"), &p("bob")).await);
    }
}
