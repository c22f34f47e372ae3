// src/pipeline.rs
//! Pipeline orchestrator: drives poll → fetch → dedup → score → emit over
//! all configured feeds on a jittered interval.
//!
//! Feeds are fetched by a bounded worker pool (one worker per feed, never
//! two on the same feed) so a retry/backoff sleep on one source never
//! blocks the others. One feed's failure is logged and the cycle goes on.
//! Shutdown is cooperative: sleeps race a watch signal, remaining feeds in
//! the cycle are skipped, the seen store is flushed, the loop exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use rand::Rng;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::analyze::{KeywordSet, PainAnalyzer};
use crate::config::{ListenerConfig, NicheRegistry};
use crate::feed::types::{FeedFetch, RawItem};
use crate::seen::SeenStore;
use crate::sink::{PainPoint, Sink};

/// One fetch unit of a cycle: a feed together with its owning niche.
#[derive(Clone)]
struct Job {
    niche: Arc<str>,
    /// Position of the owning niche in the registry, for stagger pacing.
    niche_ordinal: usize,
    feed: Arc<str>,
    keywords: Arc<KeywordSet>,
}

/// Counters for one listener session.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub cycles: AtomicU64,
    pub scanned: AtomicU64,
    pub pain_points: AtomicU64,
    pub filtered: AtomicU64,
    pub fetch_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub scanned: u64,
    pub pain_points: u64,
    pub filtered: u64,
    pub fetch_errors: u64,
}

#[derive(Debug)]
pub struct ListenerState {
    running: AtomicBool,
    last_cycle: Mutex<HashMap<String, DateTime<Utc>>>,
    stats: SessionStats,
}

/// Cloneable health/control surface for external monitoring.
#[derive(Clone)]
pub struct ListenerHandle {
    state: Arc<ListenerState>,
    shutdown_tx: watch::Sender<bool>,
}

impl ListenerHandle {
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Completion time of the last cycle that covered `feed`, if any.
    pub fn last_cycle_completed_at(&self, feed: &str) -> Option<DateTime<Utc>> {
        self.state
            .last_cycle
            .lock()
            .expect("last-cycle mutex poisoned")
            .get(feed)
            .copied()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.state.stats;
        StatsSnapshot {
            cycles: s.cycles.load(Ordering::Relaxed),
            scanned: s.scanned.load(Ordering::Relaxed),
            pain_points: s.pain_points.load(Ordering::Relaxed),
            filtered: s.filtered.load(Ordering::Relaxed),
            fetch_errors: s.fetch_errors.load(Ordering::Relaxed),
        }
    }

    /// Request graceful shutdown; the loop wakes within a bounded latency.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Per-cycle context shared by the feed workers.
struct CycleCtx {
    cfg: ListenerConfig,
    fetcher: Arc<dyn FeedFetch>,
    analyzer: Arc<PainAnalyzer>,
    seen: Arc<SeenStore>,
    sinks: Vec<Arc<dyn Sink>>,
    state: Arc<ListenerState>,
}

pub struct Listener {
    cfg: ListenerConfig,
    jobs: Vec<Job>,
    fetcher: Arc<dyn FeedFetch>,
    analyzer: Arc<PainAnalyzer>,
    seen: Arc<SeenStore>,
    sinks: Vec<Arc<dyn Sink>>,
    state: Arc<ListenerState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Listener {
    /// Build the orchestrator. Fails fast on a degenerate registry or
    /// config; nothing after this constructor is fatal.
    pub fn new(
        cfg: ListenerConfig,
        registry: &NicheRegistry,
        fetcher: Arc<dyn FeedFetch>,
        seen: Arc<SeenStore>,
    ) -> Result<Self> {
        cfg.validate()?;
        registry.validate()?;
        crate::feed::ensure_metrics_described();

        let mut jobs: Vec<Job> = Vec::new();
        for (niche_ordinal, niche) in registry.niches.iter().enumerate() {
            let keywords = Arc::new(
                KeywordSet::compile(&niche.keywords)
                    .with_context(|| format!("compiling keywords of niche '{}'", niche.name))?,
            );
            // Blank entries are dropped at compile; a niche must keep at
            // least one usable pattern.
            if keywords.is_empty() {
                return Err(anyhow!("niche '{}' has no usable keywords", niche.name));
            }
            let niche_name: Arc<str> = niche.name.as_str().into();
            for feed in &niche.feeds {
                if let Some(prev) = jobs.iter().find(|j| j.feed.eq_ignore_ascii_case(feed)) {
                    warn!(
                        feed = %feed,
                        niche = %niche.name,
                        owner = %prev.niche,
                        "feed already monitored by another niche, skipping duplicate"
                    );
                    continue;
                }
                jobs.push(Job {
                    niche: niche_name.clone(),
                    niche_ordinal,
                    feed: feed.as_str().into(),
                    keywords: keywords.clone(),
                });
            }
        }

        let analyzer = Arc::new(PainAnalyzer::new(
            cfg.negativity_threshold,
            cfg.context_window_sentences,
            cfg.max_snippet_chars,
            cfg.min_text_chars,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            cfg,
            jobs,
            fetcher,
            analyzer,
            seen,
            sinks: Vec::new(),
            state: Arc::new(ListenerState {
                running: AtomicBool::new(false),
                last_cycle: Mutex::new(HashMap::new()),
                stats: SessionStats::default(),
            }),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Register an output sink. Must happen before `run`.
    pub fn add_sink(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            state: self.state.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    pub fn feed_count(&self) -> usize {
        self.jobs.len()
    }

    /// Poll every feed once and emit what qualifies. Returns the number of
    /// pain points found in this cycle.
    pub async fn run_once(&self) -> u64 {
        let ctx = Arc::new(CycleCtx {
            cfg: self.cfg.clone(),
            fetcher: self.fetcher.clone(),
            analyzer: self.analyzer.clone(),
            seen: self.seen.clone(),
            sinks: self.sinks.clone(),
            state: self.state.clone(),
        });
        let before = self.state.stats.pain_points.load(Ordering::Relaxed);
        let limiter = Arc::new(Semaphore::new(self.cfg.max_concurrent_fetches.max(1)));

        let mut workers = JoinSet::new();
        for job in self.jobs.iter().cloned() {
            workers.spawn(run_feed_job(
                ctx.clone(),
                job,
                limiter.clone(),
                self.shutdown_rx.clone(),
            ));
        }
        while workers.join_next().await.is_some() {}

        let now = Utc::now();
        gauge!("listener_cycle_last_run_ts").set(now.timestamp() as f64);
        self.state.stats.cycles.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.seen.flush() {
            warn!(error = %e, "seen store flush failed, continuing in-memory");
        }

        self.state.stats.pain_points.load(Ordering::Relaxed) - before
    }

    /// Run the polling loop until shutdown is requested.
    pub async fn run(&self) {
        self.state.running.store(true, Ordering::SeqCst);
        info!(
            feeds = self.jobs.len(),
            threshold = self.cfg.negativity_threshold,
            poll_min_secs = self.cfg.poll_interval_min_secs,
            poll_max_secs = self.cfg.poll_interval_max_secs,
            "pain listener starting"
        );
        for job in &self.jobs {
            debug!(niche = %job.niche, feed = %job.feed, "monitoring feed");
        }

        let mut shutdown = self.shutdown_rx.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let found = self.run_once().await;
            let stats = self.handle().stats();
            info!(
                cycle = stats.cycles,
                found,
                scanned = stats.scanned,
                filtered = stats.filtered,
                fetch_errors = stats.fetch_errors,
                seen = self.seen.len(),
                "poll cycle complete"
            );

            if *shutdown.borrow() {
                break;
            }
            let sleep_secs = {
                let mut rng = rand::rng();
                rng.random_range(self.cfg.poll_interval_min_secs..=self.cfg.poll_interval_max_secs)
            };
            debug!(sleep_secs, "sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
                _ = shutdown.changed() => {}
            }
        }

        if let Err(e) = self.seen.flush() {
            warn!(error = %e, "final seen store flush failed");
        }
        self.state.running.store(false, Ordering::SeqCst);
        let stats = self.handle().stats();
        info!(
            cycles = stats.cycles,
            pain_points = stats.pain_points,
            scanned = stats.scanned,
            filtered = stats.filtered,
            "pain listener stopped"
        );
    }
}

async fn run_feed_job(
    ctx: Arc<CycleCtx>,
    job: Job,
    limiter: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Stagger workers so all feeds are not hit in the same instant: a small
    // per-feed jitter plus a per-niche offset that keeps the original
    // niche-by-niche pacing toward the upstream host.
    let stagger_ms = {
        let mut rng = rand::rng();
        let feed_lo = ctx.cfg.feed_jitter_min_secs * 1_000;
        let feed_hi = (ctx.cfg.feed_jitter_max_secs * 1_000).max(feed_lo);
        let niche_lo = ctx.cfg.niche_jitter_min_secs * 1_000;
        let niche_hi = (ctx.cfg.niche_jitter_max_secs * 1_000).max(niche_lo);
        let niche_offset = if niche_hi == 0 {
            0
        } else {
            job.niche_ordinal as u64 * rng.random_range(niche_lo..=niche_hi)
        };
        rng.random_range(feed_lo..=feed_hi) + niche_offset
    };
    // The stagger races the shutdown signal so a mid-cycle stop never
    // waits out pending workers' sleeps.
    if *shutdown.borrow() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(stagger_ms)) => {}
        _ = shutdown.changed() => return,
    }
    if *shutdown.borrow() {
        return;
    }

    let _permit = match limiter.acquire().await {
        Ok(p) => p,
        Err(_) => return, // semaphore closed
    };
    if *shutdown.borrow() {
        debug!(feed = %job.feed, "shutdown requested, skipping feed this cycle");
        return;
    }

    let items = match ctx.fetcher.fetch(&job.feed).await {
        Ok(items) => items,
        Err(e) => {
            // Failure isolates to this feed; the cycle goes on.
            ctx.state.stats.fetch_errors.fetch_add(1, Ordering::Relaxed);
            warn!(feed = %job.feed, error = %e, "feed skipped this cycle");
            return;
        }
    };

    for item in items {
        process_item(&ctx, &job, item);
    }

    ctx.state
        .last_cycle
        .lock()
        .expect("last-cycle mutex poisoned")
        .insert(job.feed.to_string(), Utc::now());
}

fn process_item(ctx: &Arc<CycleCtx>, job: &Job, item: RawItem) {
    ctx.state.stats.scanned.fetch_add(1, Ordering::Relaxed);

    // Stale posts are recorded (so they stop reappearing) but not analyzed.
    let age = item.fetched_at.saturating_sub(item.published_at);
    if item.published_at > 0 && age > ctx.cfg.max_item_age_secs {
        ctx.seen.record(&item.id);
        return;
    }

    // has-then-record is atomic per id, so a crosspost appearing on two
    // feeds in the same cycle is emitted at most once.
    if !ctx.seen.check_and_record(&item.id) {
        counter!("listener_dedup_skipped_total").increment(1);
        return;
    }

    let combined = if item.body.is_empty() {
        item.title.clone()
    } else {
        format!("{}. {}", item.title, item.body)
    };

    let result = match ctx.analyzer.analyze(&combined, &job.keywords) {
        Ok(r) => r,
        Err(e) => {
            debug!(feed = %job.feed, id = %item.id, error = %e, "item skipped as unanalyzable");
            return;
        }
    };

    let Some(analysis) = result else {
        counter!("listener_filtered_total").increment(1);
        ctx.state.stats.filtered.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let point = Arc::new(PainPoint {
        item_id: item.id,
        niche: job.niche.to_string(),
        feed: item.feed,
        title: item.title,
        url: item.url,
        author: item.author,
        matched_keywords: analysis.matched_keywords,
        score: analysis.score,
        severity: analysis.severity,
        windows: analysis.windows,
        emitted_at: Utc::now(),
    });

    counter!("listener_pain_points_total").increment(1);
    ctx.state.stats.pain_points.fetch_add(1, Ordering::Relaxed);
    info!(
        niche = %point.niche,
        feed = %point.feed,
        score = format!("{:.3}", point.score),
        severity = %point.severity,
        "pain point found"
    );

    // Fire-and-forget per sink: a slow or failing sink never stalls
    // polling, and sinks are isolated from each other.
    for sink in &ctx.sinks {
        let sink = sink.clone();
        let point = point.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.on_pain_point(&point).await {
                counter!("listener_sink_errors_total").increment(1);
                warn!(sink = sink.name(), error = %e, "sink delivery failed");
            }
        });
    }
}
