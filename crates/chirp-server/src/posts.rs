//! Read-only view of the post/feed subsystem.
//!
//! Only share-to-conversation and share-to-followers consult it, and only
//! to confirm a post exists and to echo its summary into clients.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use chirp_shared::{PostId, PrincipalId};

/// The slice of a post this core cares about.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub id: PostId,
    pub author: PrincipalId,
    pub content: String,
    pub media_url: Option<String>,
}

#[async_trait]
pub trait PostReader: Send + Sync {
    async fn get_post(&self, id: &PostId) -> Option<PostSummary>;
}

/// In-process post table used in standalone mode and tests.
#[derive(Debug, Default)]
pub struct InMemoryPostReader {
    posts: RwLock<HashMap<PostId, PostSummary>>,
}

impl InMemoryPostReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, post: PostSummary) {
        self.posts.write().await.insert(post.id.clone(), post);
    }
}

#[async_trait]
impl PostReader for InMemoryPostReader {
    async fn get_post(&self, id: &PostId) -> Option<PostSummary> {
        self.posts.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_round_trip() {
        let reader = InMemoryPostReader::new();
        let post = PostSummary {
            id: PostId::new("post-1"),
            author: PrincipalId::new("alice"),
            content: "hello world".to_string(),
            media_url: None,
        };
        reader.insert(post.clone()).await;

        assert_eq!(reader.get_post(&PostId::new("post-1")).await, Some(post));
        assert_eq!(reader.get_post(&PostId::new("missing")).await, None);
    }
}
