// src/sink.rs
//! Output contract for downstream consumers (CSV writer, live dashboard,
//! webhook dispatcher). Implementations live outside this crate; they are
//! called once per qualifying item, possibly from several workers at once,
//! and must return promptly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyze::vader::Severity;
use crate::error::SinkError;

/// The emitted unit: a keyword-relevant item whose compound sentiment fell
/// strictly below the negativity threshold. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct PainPoint {
    /// Originating item id (also the dedup key).
    pub item_id: String,
    pub niche: String,
    pub feed: String,
    pub title: String,
    pub url: Option<String>,
    pub author: String,
    pub matched_keywords: Vec<String>,
    /// Compound sentiment in [-1.0, 1.0], always below the threshold.
    pub score: f64,
    pub severity: Severity,
    /// Context excerpts around each keyword hit.
    pub windows: Vec<String>,
    pub emitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one pain point. Failures are logged by the caller and never
    /// affect other sinks or the polling loop.
    async fn on_pain_point(&self, point: &PainPoint) -> Result<(), SinkError>;
}

/// Reference sink: structured log line per pain point. Used by the binary
/// so a bare deployment still surfaces findings.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_pain_point(&self, point: &PainPoint) -> Result<(), SinkError> {
        tracing::info!(
            target: "pain_point",
            niche = %point.niche,
            feed = %point.feed,
            keywords = ?point.matched_keywords,
            score = format!("{:.3}", point.score),
            severity = %point.severity,
            url = point.url.as_deref().unwrap_or("-"),
            "pain point"
        );
        Ok(())
    }
}
