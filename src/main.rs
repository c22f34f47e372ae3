//! Pain Listener — Binary Entrypoint
//! Loads configuration, wires the fetcher, seen store and sinks, and runs
//! the polling loop until SIGINT.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pain_listener::{
    HttpFetcher, Listener, ListenerConfig, LogSink, NicheRegistry, SeenStore,
};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pain_listener=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = ListenerConfig::from_env();
    cfg.validate()?;

    let registry = NicheRegistry::load_default()?;
    registry.validate()?;
    info!(
        niches = registry.niches.len(),
        feeds = registry.all_feeds().len(),
        "niche registry loaded"
    );

    let seen = Arc::new(SeenStore::load(&cfg.seen_store_path, cfg.seen_ceiling));
    let fetcher = Arc::new(HttpFetcher::new(&cfg)?);

    let mut listener = Listener::new(cfg, &registry, fetcher, seen)?;
    listener.add_sink(Arc::new(LogSink));

    // Ctrl+C triggers a graceful stop: in-flight work finishes, the seen
    // store is flushed, the loop exits.
    let handle = listener.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received");
            handle.shutdown();
        }
    });

    listener.run().await;
    Ok(())
}
