//! # Odds Ingestion Service
//!
//! Continuous service that polls vendor odds per sport, archives the
//! detected changes, and tracks event lifecycles.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin ingest_service
//! cargo run --bin ingest_service -- --once
//! cargo run --bin ingest_service -- --sports basketball_nba,icehockey_nhl
//! ```
//!
//! Press Ctrl+C to stop gracefully; shutdown is bounded and the writer
//! always attempts a final flush.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use oddsflow::delta_engine::{self, DeltaEngine};
use oddsflow::lifecycle::{LifecycleConfig, LifecycleTracker};
use oddsflow::page_manager::PageManagerClient;
use oddsflow::registry::SportRegistry;
use oddsflow::scheduler::Scheduler;
use oddsflow::settings::Settings;
use oddsflow::sports;
use oddsflow::stream::StreamPublisher;
use oddsflow::vendor::TheOddsApiClient;
use oddsflow::writer::{ArchiveWriter, WriterConfig};
use oddsflow::{database, metrics};

#[derive(Parser, Debug)]
#[command(name = "ingest_service", about = "Multi-sport odds ingestion service")]
struct Args {
    /// Poll every sport once and exit.
    #[arg(long)]
    once: bool,

    /// Comma-separated sport keys to run (default: all registered).
    #[arg(long)]
    sports: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Exactly one of these may claim the global `log` logger: the
    // tracing subscriber's log bridge does so itself, so env_logger
    // only runs when observability is off.
    #[cfg(not(feature = "observability"))]
    env_logger::init();
    #[cfg(feature = "observability")]
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = Settings::new().context("Failed to load settings")?;

    info!("🚀 Oddsflow ingest service starting");

    #[cfg(feature = "observability")]
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .context("Failed to install Prometheus exporter")?;
    metrics::describe_metrics();

    // Startup failures here are fatal: no archive, no cache, or no
    // vendor key means the pipeline cannot run at all.
    if settings.vendor.api_key.trim().is_empty() {
        bail!("ODDS_API_KEY must be set");
    }
    if settings.database.url.trim().is_empty() {
        bail!("DATABASE_URL must be set");
    }

    let db = database::connect(&settings.database.url).await?;
    let cache_conn = delta_engine::connect_cache(&settings.cache.redis_url()).await?;
    let cache_ttl = settings.cache.cache_ttl().context("invalid cache ttl")?;

    // Sport registry
    let registry = Arc::new(SportRegistry::new());
    sports::register_defaults(&registry).context("Failed to register sports")?;
    if let Some(filter) = &args.sports {
        let wanted: Vec<&str> = filter.split(',').map(str::trim).collect();
        let filtered = Arc::new(SportRegistry::new());
        for key in &wanted {
            match registry.get(key) {
                Some(module) => filtered
                    .register(module)
                    .context("Failed to register filtered sport")?,
                None => bail!("unknown sport key: {key}"),
            }
        }
        run(args, settings, db, cache_conn, cache_ttl, filtered).await
    } else {
        run(args, settings, db, cache_conn, cache_ttl, registry).await
    }
}

async fn run(
    args: Args,
    settings: Settings,
    db: database::DbPool,
    cache_conn: redis::aio::ConnectionManager,
    cache_ttl: Duration,
    registry: Arc<SportRegistry>,
) -> Result<()> {
    info!("registered sports: {}", registry.len());

    let delta = Arc::new(DeltaEngine::new(cache_conn.clone(), cache_ttl));
    let publisher = StreamPublisher::new(cache_conn);

    let page_client = if settings.page_manager.enabled {
        Some(Arc::new(PageManagerClient::new(
            settings.page_manager.base_url.clone(),
            settings.page_manager.books.clone(),
        )?))
    } else {
        None
    };

    let writer = Arc::new(ArchiveWriter::new(
        db.clone(),
        publisher.clone(),
        page_client.clone(),
        WriterConfig {
            batch_size: settings.writer.batch_size,
            flush_interval: Duration::from_secs(settings.writer.flush_interval_seconds),
            warm_window_hours: settings.writer.warm_window_hours,
        },
    ));

    let vendor = Arc::new(TheOddsApiClient::new(
        settings.vendor.api_key.clone(),
        settings.vendor.base_url.clone(),
    )?);

    // Seed writer state from the archive before any polling starts.
    writer.load_seen_events().await?;
    writer.warm_upcoming_events().await?;

    // Re-seed the cache so a restart does not re-classify every quote
    // as New. Failure here is non-fatal: the cache self-heals.
    match database::load_current_quotes(&db).await {
        Ok(current) => {
            if let Err(e) = delta.rebuild_cache(&current).await {
                error!("cache rebuild failed: {e:#}");
            }
        }
        Err(e) => error!("loading current quotes for cache rebuild failed: {e:#}"),
    }

    let scheduler = Scheduler::new(registry, vendor, delta, writer);

    if args.once {
        info!("running in one-shot mode");
        scheduler.poll_all_once().await;
        return Ok(());
    }

    let lifecycle = Arc::new(LifecycleTracker::new(
        db,
        publisher,
        page_client,
        LifecycleConfig {
            interval: Duration::from_secs(settings.lifecycle.interval_seconds),
            close_books: settings.lifecycle.close_books.clone(),
        },
    ));

    scheduler.start().await;
    lifecycle.start().await;
    info!("✅ pipeline running, press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    lifecycle.stop().await;
    scheduler.stop().await;
    info!("👋 ingest service stopped");
    Ok(())
}
