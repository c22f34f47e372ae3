// src/feed/mod.rs
//! Feed fetching with resilience controls: rotating browser identity,
//! bounded retry with exponential backoff and jitter, and a per-feed rate
//! guard so no source is hit more than once per polling interval.

pub mod atom;
pub mod types;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::{build_feed_url, ListenerConfig};
use crate::error::FetchError;
use crate::feed::types::{FeedFetch, RawItem};

/// One-time metrics registration (so series show up on the recorder).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("listener_items_total", "Raw items parsed from feeds.");
        describe_counter!("listener_pain_points_total", "Pain points emitted to sinks.");
        describe_counter!(
            "listener_filtered_total",
            "Keyword matches discarded as neutral/positive."
        );
        describe_counter!(
            "listener_dedup_skipped_total",
            "Items skipped because their id was already seen."
        );
        describe_counter!("listener_fetch_errors_total", "Feed fetch/parse failures.");
        describe_counter!("listener_sink_errors_total", "Sink delivery failures.");
        describe_histogram!("listener_fetch_ms", "Feed fetch+parse time in milliseconds.");
        describe_gauge!(
            "listener_cycle_last_run_ts",
            "Unix ts when the poll cycle last completed."
        );
    });
}

/// Browser pool for the rotating identity header.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
];

pub fn pick_user_agent() -> &'static str {
    let idx = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Exponential backoff with randomized jitter. The delay computation is
/// pure so it can be tested without a network or a clock.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    /// Fraction of the exponential delay the jitter may add or remove.
    pub jitter_frac: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            jitter_frac: 0.25,
        }
    }

    /// Delay before retry number `attempt` (0-based), with `jitter_unit`
    /// in [-1, 1] selecting the point inside the jitter band:
    /// `base * 2^attempt * (1 + jitter_frac * jitter_unit)`.
    pub fn delay_for(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
        let jittered = exp * (1.0 + self.jitter_frac * jitter_unit.clamp(-1.0, 1.0));
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Sampled delay for real use.
    pub fn sample_delay(&self, attempt: u32) -> Duration {
        let unit = rand::rng().random_range(-1.0..=1.0);
        self.delay_for(attempt, unit)
    }
}

/// HTTP fetcher against the public feed endpoints.
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    /// A feed is never fetched more often than this.
    min_fetch_interval: Duration,
    last_fetch: Mutex<HashMap<String, Instant>>,
}

impl HttpFetcher {
    pub fn new(cfg: &ListenerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            retry: RetryPolicy::new(
                cfg.fetch_max_attempts,
                Duration::from_secs_f64(cfg.backoff_base_secs),
            ),
            min_fetch_interval: Duration::from_secs(cfg.poll_interval_min_secs),
            last_fetch: Mutex::new(HashMap::new()),
        })
    }

    /// True when the rate guard permits fetching `feed` now; records the
    /// fetch time when it does.
    fn rate_guard_passes(&self, feed: &str) -> bool {
        let mut last = self.last_fetch.lock().expect("rate guard mutex poisoned");
        let now = Instant::now();
        if let Some(prev) = last.get(feed) {
            if now.duration_since(*prev) < self.min_fetch_interval {
                return false;
            }
        }
        last.insert(feed.to_string(), now);
        true
    }

    async fn fetch_once(&self, feed: &str, url: &str) -> Result<Vec<RawItem>, FetchError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", pick_user_agent())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                feed: feed.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FetchError::Transient {
                feed: feed.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        if status.is_client_error() {
            return Err(FetchError::Blocked {
                feed: feed.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Transient {
            feed: feed.to_string(),
            reason: format!("reading body: {e}"),
        })?;

        let fetched_at = chrono::Utc::now().timestamp().max(0) as u64;
        atom::parse_feed(&body, feed, fetched_at)
    }
}

/// Drive one attempt closure under the retry policy: transient failures
/// back off and retry up to the attempt ceiling, anything else surfaces
/// immediately.
async fn retry_fetch<F, Fut>(
    policy: &RetryPolicy,
    feed: &str,
    mut attempt_fn: F,
) -> Result<Vec<RawItem>, FetchError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<RawItem>, FetchError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match attempt_fn().await {
            Ok(items) => return Ok(items),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.sample_delay(attempt);
                debug!(
                    feed,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient fetch failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait::async_trait]
impl FeedFetch for HttpFetcher {
    async fn fetch(&self, feed: &str) -> Result<Vec<RawItem>, FetchError> {
        ensure_metrics_described();

        if !self.rate_guard_passes(feed) {
            debug!(feed, "rate guard: feed fetched too recently, skipping");
            return Ok(Vec::new());
        }

        let url = build_feed_url(feed);
        let t0 = Instant::now();
        match retry_fetch(&self.retry, feed, || self.fetch_once(feed, &url)).await {
            Ok(items) => {
                histogram!("listener_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                counter!("listener_items_total").increment(items.len() as u64);
                Ok(items)
            }
            Err(e) => {
                counter!("listener_fetch_errors_total").increment(1);
                warn!(feed, error = %e, "feed fetch failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(p.delay_for(0, 0.0), Duration::from_secs(2));
        assert_eq!(p.delay_for(1, 0.0), Duration::from_secs(4));
        assert_eq!(p.delay_for(2, 0.0), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_inside_band() {
        let p = RetryPolicy::new(3, Duration::from_secs(2));
        let lo = p.delay_for(1, -1.0);
        let hi = p.delay_for(1, 1.0);
        assert_eq!(lo, Duration::from_secs(3));
        assert_eq!(hi, Duration::from_secs(5));
        for _ in 0..100 {
            let d = p.sample_delay(1);
            assert!(d >= lo && d <= hi, "sampled delay {d:?} outside band");
        }
    }

    #[test]
    fn jitter_unit_is_clamped() {
        let p = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(p.delay_for(0, 10.0), p.delay_for(0, 1.0));
    }

    #[test]
    fn zero_attempt_ceiling_is_raised_to_one() {
        let p = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(p.max_attempts, 1);
    }

    #[test]
    fn user_agent_pool_rotates_over_known_identities() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&pick_user_agent()));
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(1),
            jitter_frac: 0.0,
        }
    }

    fn transient() -> FetchError {
        FetchError::Transient {
            feed: "shopify".into(),
            reason: "connection reset".into(),
        }
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_transient_error_after_max_attempts() {
        let calls = std::cell::Cell::new(0u32);
        let err = retry_fetch(&fast_policy(3), "shopify", || {
            calls.set(calls.get() + 1);
            async { Err::<Vec<RawItem>, _>(transient()) }
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn retry_recovers_when_a_later_attempt_succeeds() {
        let calls = std::cell::Cell::new(0u32);
        let items = retry_fetch(&fast_policy(3), "shopify", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(transient())
                } else {
                    Ok(Vec::new())
                }
            }
        })
        .await
        .unwrap();
        assert!(items.is_empty());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn blocked_failure_is_never_retried() {
        let calls = std::cell::Cell::new(0u32);
        let err = retry_fetch(&fast_policy(3), "shopify", || {
            calls.set(calls.get() + 1);
            async {
                Err::<Vec<RawItem>, _>(FetchError::Blocked {
                    feed: "shopify".into(),
                    status: 403,
                })
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Blocked { status: 403, .. }));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn rate_guard_skips_back_to_back_fetches() {
        let cfg = ListenerConfig::default();
        let f = HttpFetcher::new(&cfg).unwrap();
        assert!(f.rate_guard_passes("shopify"));
        assert!(!f.rate_guard_passes("shopify"));
        assert!(f.rate_guard_passes("ecommerce"));
    }
}
