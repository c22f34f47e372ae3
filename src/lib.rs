// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod analyze;
pub mod config;
pub mod error;
pub mod feed;
pub mod pipeline;
pub mod seen;
pub mod sink;

// ---- Re-exports for stable public API ----
pub use crate::analyze::vader::{SentimentScorer, Severity};
pub use crate::analyze::{AnalysisResult, KeywordSet, PainAnalyzer};
pub use crate::config::{ListenerConfig, Niche, NicheRegistry};
pub use crate::error::{AnalysisError, FetchError, PersistenceError, SinkError};
pub use crate::feed::types::{FeedFetch, RawItem};
pub use crate::feed::{HttpFetcher, RetryPolicy};
pub use crate::pipeline::{Listener, ListenerHandle, StatsSnapshot};
pub use crate::seen::SeenStore;
pub use crate::sink::{LogSink, PainPoint, Sink};
