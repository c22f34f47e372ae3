// src/config.rs
//! Niche registry and listener settings.
//!
//! The registry (niche → feeds → pain keywords) is loaded once at startup
//! from TOML and is immutable for the process lifetime. Runtime knobs come
//! from the environment with the same defaults the listener has always
//! shipped with.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_NICHES_CONFIG_PATH: &str = "NICHES_CONFIG_PATH";
pub const DEFAULT_NICHES_CONFIG_PATH: &str = "config/niches.toml";

/// Compiled-in fallback registry, used when no config file is present.
const EMBEDDED_NICHES: &str = include_str!("../config/niches.toml");

/// A topic category: one or more source feeds plus the pain keywords whose
/// presence gates sentiment scoring.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Niche {
    pub name: String,
    pub feeds: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NicheRegistry {
    #[serde(rename = "niche")]
    pub niches: Vec<Niche>,
}

impl NicheRegistry {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let reg: NicheRegistry = toml::from_str(s).context("parsing niche registry toml")?;
        Ok(reg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading niche registry from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks:
    /// 1) $NICHES_CONFIG_PATH
    /// 2) config/niches.toml
    /// 3) embedded default
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_NICHES_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::from_path(&pb);
            }
            return Err(anyhow!("NICHES_CONFIG_PATH points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_NICHES_CONFIG_PATH);
        if default_p.exists() {
            return Self::from_path(&default_p);
        }
        Self::from_toml_str(EMBEDDED_NICHES)
    }

    /// Startup validation. An empty or degenerate registry is the one fatal
    /// error class; everything after the loop starts is survived.
    pub fn validate(&self) -> Result<()> {
        if self.niches.is_empty() {
            return Err(anyhow!("niche registry is empty"));
        }
        for n in &self.niches {
            if n.name.trim().is_empty() {
                return Err(anyhow!("niche with empty name"));
            }
            if n.feeds.is_empty() {
                return Err(anyhow!("niche '{}' has no source feeds", n.name));
            }
            if n.keywords.iter().all(|k| k.trim().is_empty()) {
                return Err(anyhow!("niche '{}' has no pain keywords", n.name));
            }
        }
        Ok(())
    }

    /// All distinct feed identifiers across niches, registry order.
    pub fn all_feeds(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for n in &self.niches {
            for f in &n.feeds {
                if !out.iter().any(|x| x.eq_ignore_ascii_case(f)) {
                    out.push(f.clone());
                }
            }
        }
        out
    }
}

/// Feed URL for a single source's newest posts. The old-host endpoint is
/// deliberate: it is the less restrictive variant for feed readers.
pub fn build_feed_url(feed: &str) -> String {
    format!("https://old.reddit.com/r/{feed}/new/.rss?limit=25")
}

/// Runtime settings for the polling loop, fetcher, analyzer and seen store.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bounds for the randomized sleep between poll cycles, seconds.
    pub poll_interval_min_secs: u64,
    pub poll_interval_max_secs: u64,
    /// Jitter between consecutive feeds of one niche, seconds.
    pub feed_jitter_min_secs: u64,
    pub feed_jitter_max_secs: u64,
    /// Jitter between niches within a cycle, seconds.
    pub niche_jitter_min_secs: u64,
    pub niche_jitter_max_secs: u64,
    pub request_timeout_secs: u64,
    /// Upper bound on simultaneous feed fetches per cycle.
    pub max_concurrent_fetches: usize,
    pub fetch_max_attempts: u32,
    pub backoff_base_secs: f64,
    /// Compound scores at or above this are discarded (exclusive threshold).
    pub negativity_threshold: f64,
    /// Sentences of context on each side of a keyword match.
    pub context_window_sentences: usize,
    pub max_snippet_chars: usize,
    pub min_text_chars: usize,
    /// Items older than this are recorded but never analyzed.
    pub max_item_age_secs: u64,
    pub seen_ceiling: usize,
    pub seen_store_path: PathBuf,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval_min_secs: 300,
            poll_interval_max_secs: 600,
            feed_jitter_min_secs: 1,
            feed_jitter_max_secs: 3,
            niche_jitter_min_secs: 5,
            niche_jitter_max_secs: 15,
            request_timeout_secs: 30,
            max_concurrent_fetches: 3,
            fetch_max_attempts: 3,
            backoff_base_secs: 2.0,
            negativity_threshold: -0.05,
            context_window_sentences: 1,
            max_snippet_chars: 500,
            min_text_chars: 20,
            max_item_age_secs: 7 * 24 * 3600,
            seen_ceiling: 10_000,
            seen_store_path: PathBuf::from("data/seen_posts.json"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ListenerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval_min_secs: env_parse("POLL_INTERVAL_MIN", d.poll_interval_min_secs),
            poll_interval_max_secs: env_parse("POLL_INTERVAL_MAX", d.poll_interval_max_secs),
            niche_jitter_min_secs: env_parse("NICHE_JITTER_MIN", d.niche_jitter_min_secs),
            niche_jitter_max_secs: env_parse("NICHE_JITTER_MAX", d.niche_jitter_max_secs),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT", d.request_timeout_secs),
            max_concurrent_fetches: env_parse("FETCH_CONCURRENCY", d.max_concurrent_fetches),
            fetch_max_attempts: env_parse("FETCH_MAX_ATTEMPTS", d.fetch_max_attempts),
            negativity_threshold: env_parse("NEGATIVITY_THRESHOLD", d.negativity_threshold),
            seen_ceiling: env_parse("MAX_SEEN_POSTS", d.seen_ceiling),
            seen_store_path: std::env::var("SEEN_POSTS_FILE")
                .map(PathBuf::from)
                .unwrap_or(d.seen_store_path),
            ..d
        }
    }

    /// Hard validation (fatal) plus soft warnings logged before the loop.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_max_secs < self.poll_interval_min_secs {
            return Err(anyhow!(
                "POLL_INTERVAL_MAX ({}) < POLL_INTERVAL_MIN ({})",
                self.poll_interval_max_secs,
                self.poll_interval_min_secs
            ));
        }
        if self.negativity_threshold >= 0.0 {
            return Err(anyhow!(
                "negativity threshold must be negative, got {}",
                self.negativity_threshold
            ));
        }
        if self.fetch_max_attempts == 0 {
            return Err(anyhow!("FETCH_MAX_ATTEMPTS must be at least 1"));
        }
        if self.poll_interval_min_secs < 60 {
            tracing::warn!(
                min = self.poll_interval_min_secs,
                "poll interval under 60s risks upstream rate limiting"
            );
        }
        Ok(())
    }
}
