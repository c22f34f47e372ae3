// src/error.rs
//! Error taxonomy for the listener pipeline.
//!
//! Only startup misconfiguration is fatal; everything below is logged and
//! survived. The fetch retry loop keys off `FetchError::is_transient()`.

use thiserror::Error;

/// Failure while retrieving a source feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, connection reset, 5xx, 429 — worth retrying with backoff.
    #[error("transient fetch failure for r/{feed}: {reason}")]
    Transient { feed: String, reason: String },

    /// 4xx block/ban response. No retry; the feed is skipped this cycle.
    #[error("feed r/{feed} blocked upstream (HTTP {status})")]
    Blocked { feed: String, status: u16 },

    /// Response body that does not parse as a feed.
    #[error("malformed feed payload from r/{feed}: {reason}")]
    Malformed { feed: String, reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// The feed the failure belongs to, for per-source logging.
    pub fn feed(&self) -> &str {
        match self {
            FetchError::Transient { feed, .. }
            | FetchError::Blocked { feed, .. }
            | FetchError::Malformed { feed, .. } => feed,
        }
    }
}

/// Failure while analyzing a single item. The item is treated as
/// non-matching and the cycle continues.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

/// Failure of the seen-store backing file. The store degrades to
/// in-memory-only for the run; never fatal.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("seen-store persistence unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
}

/// Failure inside a sink. Isolated from other sinks and from the loop.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink delivery failed: {0}")]
    Delivery(String),
}
