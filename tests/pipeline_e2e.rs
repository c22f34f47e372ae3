// tests/pipeline_e2e.rs
//
// Full pipeline over scripted fetchers: one healthy feed with a pain post,
// one feed that always fails. Verifies failure isolation, dedup across
// cycles, sink delivery and the health surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use pain_listener::{
    FeedFetch, FetchError, Listener, ListenerConfig, ListenerHandle, Niche, NicheRegistry,
    PainPoint, RawItem, SeenStore, Severity, Sink, SinkError,
};

fn fast_config() -> ListenerConfig {
    ListenerConfig {
        feed_jitter_min_secs: 0,
        feed_jitter_max_secs: 0,
        niche_jitter_min_secs: 0,
        niche_jitter_max_secs: 0,
        ..ListenerConfig::default()
    }
}

fn registry() -> NicheRegistry {
    NicheRegistry {
        niches: vec![
            Niche {
                name: "Agency_Owners".into(),
                feeds: vec!["alpha".into()],
                keywords: vec!["invoicing mess".into(), "paperwork".into()],
            },
            Niche {
                name: "Recruiters".into(),
                feeds: vec!["broken".into()],
                keywords: vec!["clunky ats".into()],
            },
        ],
    }
}

/// Same two items on every call for "alpha"; a transient failure for
/// "broken". Counts calls per feed.
struct ScriptedFetcher {
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls_for(&self, feed: &str) -> u32 {
        self.calls.lock().get(feed).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedFetch for ScriptedFetcher {
    async fn fetch(&self, feed: &str) -> Result<Vec<RawItem>, FetchError> {
        *self.calls.lock().entry(feed.to_string()).or_insert(0) += 1;

        if feed == "broken" {
            return Err(FetchError::Transient {
                feed: feed.to_string(),
                reason: "connection reset".into(),
            });
        }

        let now = Utc::now().timestamp() as u64;
        Ok(vec![
            RawItem {
                id: "t3_pain1".into(),
                title: "Drowning in admin".into(),
                body: "I absolutely hate this invoicing mess, it's destroying my business."
                    .into(),
                feed: feed.to_string(),
                url: Some("https://old.reddit.com/r/alpha/comments/pain1/".into()),
                author: "/u/tester".into(),
                published_at: now.saturating_sub(60),
                fetched_at: now,
            },
            RawItem {
                id: "t3_fine1".into(),
                title: "Paperwork sorted".into(),
                body: "Honestly the paperwork is great now, I love the new flow.".into(),
                feed: feed.to_string(),
                url: None,
                author: "/u/tester".into(),
                published_at: now.saturating_sub(60),
                fetched_at: now,
            },
        ])
    }
}

#[derive(Default)]
struct CollectSink {
    delivered: Mutex<Vec<PainPoint>>,
}

#[async_trait]
impl Sink for CollectSink {
    fn name(&self) -> &str {
        "collect"
    }

    async fn on_pain_point(&self, point: &PainPoint) -> Result<(), SinkError> {
        self.delivered.lock().push(point.clone());
        Ok(())
    }
}

/// Sink dispatch is fire-and-forget, so give deliveries a moment to land.
async fn wait_for_deliveries(sink: &CollectSink, expected: usize) {
    for _ in 0..200 {
        if sink.delivered.lock().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} sink deliveries, got {}",
        sink.delivered.lock().len()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cycle_isolates_failures_and_dedups_across_runs() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let seen = Arc::new(SeenStore::in_memory(1000));
    let sink = Arc::new(CollectSink::default());

    let mut listener = Listener::new(fast_config(), &registry(), fetcher.clone(), seen.clone())
        .expect("listener builds");
    listener.add_sink(sink.clone());
    let handle = listener.handle();

    // First cycle: the broken feed fails, the healthy one still emits.
    let found = listener.run_once().await;
    assert_eq!(found, 1);
    wait_for_deliveries(&sink, 1).await;

    {
        let delivered = sink.delivered.lock();
        let point = &delivered[0];
        assert_eq!(point.item_id, "t3_pain1");
        assert_eq!(point.niche, "Agency_Owners");
        assert_eq!(point.feed, "alpha");
        assert_eq!(point.severity, Severity::Severe);
        assert!(point.score < -0.05);
        assert!(point
            .matched_keywords
            .iter()
            .any(|k| k == "invoicing mess"));
        assert!(!point.windows.is_empty());
    }

    let stats = handle.stats();
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.scanned, 2);
    assert_eq!(stats.pain_points, 1);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.fetch_errors, 1);

    // The failed feed never completed a cycle; the healthy one did.
    assert!(handle.last_cycle_completed_at("alpha").is_some());
    assert!(handle.last_cycle_completed_at("broken").is_none());

    // Second cycle: identical items come back, dedup suppresses them all.
    let found = listener.run_once().await;
    assert_eq!(found, 0);
    let stats = handle.stats();
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.scanned, 4);
    assert_eq!(stats.pain_points, 1);

    assert_eq!(fetcher.calls_for("alpha"), 2);
    assert_eq!(fetcher.calls_for("broken"), 2);
    assert_eq!(sink.delivered.lock().len(), 1);
    assert!(seen.has("t3_pain1"));
    assert!(seen.has("t3_fine1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_items_are_recorded_but_never_emitted() {
    struct StaleFetcher;

    #[async_trait]
    impl FeedFetch for StaleFetcher {
        async fn fetch(&self, feed: &str) -> Result<Vec<RawItem>, FetchError> {
            let now = Utc::now().timestamp() as u64;
            Ok(vec![RawItem {
                id: "t3_old".into(),
                title: "Ancient invoicing mess".into(),
                body: "I hate this terrible invoicing mess so much.".into(),
                feed: feed.to_string(),
                url: None,
                author: "/u/tester".into(),
                // Well past the age cutoff.
                published_at: now.saturating_sub(30 * 24 * 3600),
                fetched_at: now,
            }])
        }
    }

    let seen = Arc::new(SeenStore::in_memory(1000));
    let sink = Arc::new(CollectSink::default());
    let reg = NicheRegistry {
        niches: vec![Niche {
            name: "Agency_Owners".into(),
            feeds: vec!["alpha".into()],
            keywords: vec!["invoicing mess".into()],
        }],
    };

    let mut listener =
        Listener::new(fast_config(), &reg, Arc::new(StaleFetcher), seen.clone()).unwrap();
    listener.add_sink(sink.clone());

    let found = listener.run_once().await;
    assert_eq!(found, 0);
    assert!(seen.has("t3_old"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.delivered.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_interrupts_worker_stagger_sleeps() {
    // Long stagger: without the signal the cycle would take >= 5 s.
    let cfg = ListenerConfig {
        feed_jitter_min_secs: 5,
        feed_jitter_max_secs: 5,
        niche_jitter_min_secs: 5,
        niche_jitter_max_secs: 5,
        ..ListenerConfig::default()
    };
    let fetcher = Arc::new(ScriptedFetcher::new());
    let listener = Listener::new(
        cfg,
        &registry(),
        fetcher.clone(),
        Arc::new(SeenStore::in_memory(100)),
    )
    .unwrap();
    let handle = listener.handle();

    let started = std::time::Instant::now();
    let task = tokio::spawn(async move { listener.run_once().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown();

    let found = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("staggered workers wake on shutdown")
        .unwrap();
    assert_eq!(found, 0);
    assert!(started.elapsed() < Duration::from_secs(3));
    // No worker got as far as fetching.
    assert_eq!(fetcher.calls_for("alpha"), 0);
    assert_eq!(fetcher.calls_for("broken"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_loop_stops_on_shutdown_signal() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let seen = Arc::new(SeenStore::in_memory(1000));

    let listener = Listener::new(fast_config(), &registry(), fetcher, seen).unwrap();
    let handle = listener.handle();

    let task = tokio::spawn(async move { listener.run().await });

    wait_until(&handle, |h| h.is_running() && h.stats().cycles >= 1).await;
    handle.shutdown();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run loop exits after shutdown")
        .unwrap();
    assert!(!handle.is_running());
}

async fn wait_until(handle: &ListenerHandle, pred: impl Fn(&ListenerHandle) -> bool) {
    for _ in 0..500 {
        if pred(handle) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
