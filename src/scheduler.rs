//! # Polling Scheduler
//!
//! Spawns one featured-markets poller per registered sport, plus a
//! props-discovery worker for sports that enable props, and runs the
//! writer's background flush.
//!
//! Each tick runs fetch -> detect -> write -> cache-update in strict
//! order: the stream publish happens inside the writer after the
//! archive commit, and the cache is only updated after the commit so a
//! failed write is re-detected on the next tick. Ticks for one sport
//! never overlap; a tick that outlives its interval coalesces the
//! pending ticks behind it.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::delta_engine::DeltaEngine;
use crate::metrics;
use crate::props_discovery::DiscoveredEvents;
use crate::registry::SportRegistry;
use crate::sport_module::SportModule;
use crate::types::Quote;
use crate::validator;
use crate::vendor::{FetchOptions, FetchResult, OddsVendor};
use crate::writer::ArchiveWriter;

/// Processing time budget per tick, exclusive of the vendor round-trip.
const TICK_BUDGET: Duration = Duration::from_millis(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Scheduler {
    registry: Arc<SportRegistry>,
    vendor: Arc<dyn OddsVendor>,
    delta: Arc<DeltaEngine>,
    writer: Arc<ArchiveWriter>,
    shutdown_tx: watch::Sender<bool>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<SportRegistry>,
        vendor: Arc<dyn OddsVendor>,
        delta: Arc<DeltaEngine>,
        writer: Arc<ArchiveWriter>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            vendor,
            delta,
            writer,
            shutdown_tx,
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawns the per-sport worker pairs and the writer's flush loop.
    pub async fn start(&self) {
        self.writer.start().await;

        let sports = self.registry.all();
        let mut handles = self.handles.lock().await;

        for sport in sports {
            info!(sport = sport.sport_key(), "starting featured poller");
            handles.push(tokio::spawn(featured_worker(
                sport.clone(),
                self.vendor.clone(),
                self.delta.clone(),
                self.writer.clone(),
                self.shutdown_tx.subscribe(),
            )));

            if sport.props_enabled() {
                info!(sport = sport.sport_key(), "starting props discovery + poller");
                let discovered = Arc::new(DiscoveredEvents::new());
                handles.push(tokio::spawn(discovery_worker(
                    sport.clone(),
                    self.vendor.clone(),
                    discovered.clone(),
                    self.shutdown_tx.subscribe(),
                )));
                handles.push(tokio::spawn(props_worker(
                    sport.clone(),
                    self.vendor.clone(),
                    self.delta.clone(),
                    self.writer.clone(),
                    discovered,
                    self.shutdown_tx.subscribe(),
                )));
            }
        }
    }

    /// Signals all workers to cease and blocks until drained (bounded),
    /// then stops the writer, which performs one final flush.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let mut handles = self.handles.lock().await;
        let drain = async {
            for handle in handles.drain(..) {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("scheduler workers did not drain within {:?}", SHUTDOWN_TIMEOUT);
        }

        self.writer.stop().await;
        info!("scheduler stopped");
    }

    /// One synchronous poll of every registered sport. Used by the
    /// service binary's one-shot mode.
    pub async fn poll_all_once(&self) {
        for sport in self.registry.all() {
            if let Err(e) = fetch_and_process(
                sport.as_ref(),
                self.vendor.as_ref(),
                &self.delta,
                &self.writer,
            )
            .await
            {
                error!(sport = sport.sport_key(), "one-shot poll failed: {e:#}");
            }
        }
    }
}

async fn featured_worker(
    sport: Arc<dyn SportModule>,
    vendor: Arc<dyn OddsVendor>,
    delta: Arc<DeltaEngine>,
    writer: Arc<ArchiveWriter>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // First tick completes immediately; pending ticks coalesce while a
    // long tick is still running.
    let mut ticker = tokio::time::interval(sport.featured_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) =
                    fetch_and_process(sport.as_ref(), vendor.as_ref(), &delta, &writer).await
                {
                    error!(sport = sport.sport_key(), "poll tick failed: {e:#}");
                }
            }
            _ = shutdown_rx.changed() => {
                info!(sport = sport.sport_key(), "featured poller stopping");
                break;
            }
        }
    }
}

async fn discovery_worker(
    sport: Arc<dyn SportModule>,
    vendor: Arc<dyn OddsVendor>,
    discovered: Arc<DiscoveredEvents>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(sport.props_discovery_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match vendor.list_events(sport.sport_key()).await {
                    Ok(events) => {
                        let total = events.len();
                        let window = sport.props_discovery_window_hours();
                        let tracked = discovered.refresh(events, window, Utc::now());
                        info!(
                            sport = sport.sport_key(),
                            "props discovery: tracking {tracked} of {total} listed events ({window}h window)"
                        );
                    }
                    Err(e) => {
                        error!(sport = sport.sport_key(), "props discovery failed: {e:#}");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!(sport = sport.sport_key(), "props discovery stopping");
                break;
            }
        }
    }
}

async fn props_worker(
    sport: Arc<dyn SportModule>,
    vendor: Arc<dyn OddsVendor>,
    delta: Arc<DeltaEngine>,
    writer: Arc<ArchiveWriter>,
    discovered: Arc<DiscoveredEvents>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(sport.props_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poll_due_props(sport.as_ref(), vendor.as_ref(), &delta, &writer, &discovered)
                    .await;
            }
            _ = shutdown_rx.changed() => {
                info!(sport = sport.sport_key(), "props poller stopping");
                break;
            }
        }
    }
}

/// Polls props odds for every tracked event whose ramp cadence has
/// elapsed. Events without coverage are still marked polled so they
/// are not hammered every tick.
async fn poll_due_props(
    sport: &dyn SportModule,
    vendor: &dyn OddsVendor,
    delta: &DeltaEngine,
    writer: &ArchiveWriter,
    discovered: &DiscoveredEvents,
) {
    let due = discovered.due_events(sport, Utc::now());
    if due.is_empty() {
        debug!(sport = sport.sport_key(), "no props polls due");
        return;
    }
    debug!(
        sport = sport.sport_key(),
        "polling props for {} events", due.len()
    );

    let options = FetchOptions {
        sport_key: sport.sport_key().to_string(),
        regions: sport.regions().iter().map(|r| r.to_string()).collect(),
        markets: sport
            .props_markets()
            .iter()
            .map(|m| m.to_string())
            .collect(),
    };

    for event in due {
        match vendor.fetch_event_odds(&options, &event.event_id).await {
            Ok(Some(fetched)) => {
                if fetched.quotes.is_empty() {
                    discovered.mark_polled(&event.event_id);
                    continue;
                }
                match process_fetch_result(sport, delta, writer, fetched).await {
                    Ok(()) => discovered.mark_polled(&event.event_id),
                    Err(e) => error!(
                        sport = sport.sport_key(),
                        "props tick failed for {}: {e:#}", event.event_id
                    ),
                }
            }
            Ok(None) => discovered.mark_polled(&event.event_id),
            Err(e) => error!(
                sport = sport.sport_key(),
                "props fetch failed for {}: {e:#}", event.event_id
            ),
        }
    }
}

/// One featured poll tick: fetch, then the shared processing stage.
/// Any step's error ends the tick; the worker survives to the next one.
async fn fetch_and_process(
    sport: &dyn SportModule,
    vendor: &dyn OddsVendor,
    delta: &DeltaEngine,
    writer: &ArchiveWriter,
) -> Result<()> {
    let options = FetchOptions {
        sport_key: sport.sport_key().to_string(),
        regions: sport.regions().iter().map(|r| r.to_string()).collect(),
        markets: sport
            .featured_markets()
            .iter()
            .map(|m| m.to_string())
            .collect(),
    };

    let fetched = vendor.fetch_odds(&options).await?;
    if fetched.quotes.is_empty() {
        debug!(sport = sport.sport_key(), "no quotes this tick");
        return Ok(());
    }

    process_fetch_result(sport, delta, writer, fetched).await
}

/// Shared tick stage: validate at the boundary, detect, write, update
/// the cache. Used by both the featured and the props pollers.
async fn process_fetch_result(
    sport: &dyn SportModule,
    delta: &DeltaEngine,
    writer: &ArchiveWriter,
    fetched: FetchResult,
) -> Result<()> {
    // Vendor round-trip excluded from the processing budget.
    let started = Instant::now();

    let (valid, stats) = validator::validate_batch(fetched.quotes, |q| {
        let result = sport.validate_quote(q);
        if let Err(e) = &result {
            error!(sport = sport.sport_key(), "rejected malformed quote: {e}");
        }
        result
    });
    if stats.rejected() > 0 {
        warn!(
            sport = sport.sport_key(),
            "{} malformed quotes rejected ({} zero price, {} missing point)",
            stats.rejected(),
            stats.zero_price,
            stats.missing_point
        );
    }

    let changes = delta.detect_changes(&valid).await?;
    if changes.is_empty() {
        debug!(sport = sport.sport_key(), "no changes this tick");
        return Ok(());
    }

    let changed_quotes: Vec<Quote> = changes.iter().map(|c| c.quote.clone()).collect();
    writer.write_with_events(&fetched.events, changes).await?;

    // After commit only. A failed cache write means re-detection next
    // tick, which the demote-then-insert path absorbs.
    if let Err(e) = delta.update_cache(&changed_quotes).await {
        warn!(sport = sport.sport_key(), "cache update failed: {e:#}");
    }

    let elapsed = started.elapsed();
    metrics::record_poll_duration(sport.sport_key(), elapsed);
    if elapsed > TICK_BUDGET {
        warn!(
            sport = sport.sport_key(),
            "tick processing took {:?} (budget {:?})", elapsed, TICK_BUDGET
        );
    } else {
        debug!(sport = sport.sport_key(), "tick processed in {:?}", elapsed);
    }

    Ok(())
}
