// src/feed/types.rs
use crate::error::FetchError;

/// A fetched candidate item (post/comment-equivalent). Consumed once by the
/// pipeline within the cycle it was fetched in; only the id outlives it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RawItem {
    /// Stable post id (e.g. the `t3_` payload), identical across re-fetches.
    pub id: String,
    pub title: String,
    /// Raw HTML body as delivered by the feed.
    pub body: String,
    /// Source-feed identifier, e.g. a subreddit name.
    pub feed: String,
    pub url: Option<String>,
    pub author: String,
    /// Publication time, unix seconds (0 when the feed omits it).
    pub published_at: u64,
    /// Retrieval time, unix seconds.
    pub fetched_at: u64,
}

#[async_trait::async_trait]
pub trait FeedFetch: Send + Sync {
    /// Retrieve the latest items of one source feed. An empty vec is
    /// success (nothing new), not an error.
    async fn fetch(&self, feed: &str) -> Result<Vec<RawItem>, FetchError>;
}
