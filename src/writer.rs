//! Archive writer - the single mutator of the odds archive.
//!
//! `write_with_events` is the production entry point: one transaction
//! upserts events and books, demotes the prior current row for every
//! incoming quote identity, and inserts the new observations with
//! `is_latest = true`. Stream publishing and page warming happen after
//! commit and are best-effort.
//!
//! The demote-then-insert sequence assumes this process is the only
//! writer of `is_latest` for its identities. Horizontal scaling would
//! require partitioning by identity, which this deployment does not do.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, DateTime, Utc};
use dashmap::DashSet;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use sqlx::{Postgres, Transaction};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::database::DbPool;
use crate::metrics;
use crate::page_manager::PageManagerClient;
use crate::stream::StreamPublisher;
use crate::types::{EventStatus, OddsUpdate, Quote, QuoteChange, SportEvent};

/// Books that only quote European markets. The archive is seeded with
/// US-region operators plus Pinnacle; letting any other European key
/// through would trip the odds_raw foreign key.
static EUROPEAN_BOOKS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "pinnacle",
        "betfair_ex_eu",
        "betfair_ex_uk",
        "matchbook",
        "marathonbet",
        "unibet_eu",
        "williamhill",
        "ladbrokes_uk",
        "coral",
        "betvictor",
        "betway",
        "sport888",
        "livescorebet_eu",
        "tipico_de",
        "onexbet",
        "betclic",
        "winamax_fr",
        "winamax_de",
        "nordicbet",
        "betsson",
        "suprabets",
    ]
    .into_iter()
    .collect()
});

/// Pinnacle is the one European sharp book the archive keeps.
pub fn book_accepted(book_key: &str) -> bool {
    book_key == "pinnacle" || !EUROPEAN_BOOKS.contains(book_key)
}

fn display_name_for_book(book_key: &str) -> String {
    book_key
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Buffered quotes that force an immediate flush.
    pub batch_size: usize,
    /// Cadence of the background flush ticker.
    pub flush_interval: Duration,
    /// How far ahead of commence time page warming reaches.
    pub warm_window_hours: i64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            warm_window_hours: 72,
        }
    }
}

pub struct ArchiveWriter {
    db: DbPool,
    publisher: StreamPublisher,
    page_client: Option<Arc<PageManagerClient>>,
    config: WriterConfig,
    /// Event ids observed since startup (or seeded from the archive).
    /// Decides whether a page-warm notification fires.
    seen_events: DashSet<String>,
    buffer: Mutex<Vec<Quote>>,
    /// One page-warm request per second across a batch.
    warm_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    shutdown_tx: watch::Sender<bool>,
    flush_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ArchiveWriter {
    pub fn new(
        db: DbPool,
        publisher: StreamPublisher,
        page_client: Option<Arc<PageManagerClient>>,
        config: WriterConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let quota = Quota::per_second(NonZeroU32::new(1).expect("non-zero warm rate"));
        Self {
            db,
            publisher,
            page_client,
            config,
            seen_events: DashSet::new(),
            buffer: Mutex::new(Vec::new()),
            warm_limiter: Arc::new(RateLimiter::direct(quota)),
            shutdown_tx,
            flush_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Whether an event id has been observed by a committed write (or
    /// seeded from the archive).
    pub fn has_seen(&self, event_id: &str) -> bool {
        self.seen_events.contains(event_id)
    }

    /// Production write path: transactional upsert of events plus the
    /// changed quotes, then best-effort stream publish, then
    /// best-effort page warming for newly-seen events.
    pub async fn write_with_events(
        &self,
        events: &[SportEvent],
        changes: Vec<QuoteChange>,
    ) -> Result<()> {
        let started = Instant::now();

        let total = changes.len();
        let accepted: Vec<QuoteChange> = changes
            .into_iter()
            .filter(|c| book_accepted(&c.quote.book_key))
            .collect();
        if accepted.len() < total {
            debug!(
                "book filter dropped {} of {} quotes",
                total - accepted.len(),
                total
            );
        }

        // Membership check and insert are atomic per event; on a failed
        // commit the inserts are reverted below.
        let new_events: Vec<SportEvent> = events
            .iter()
            .filter(|e| self.seen_events.insert(e.event_id.clone()))
            .cloned()
            .collect();

        let quotes: Vec<&Quote> = accepted.iter().map(|c| &c.quote).collect();

        if let Err(e) = self.run_transaction(events, &quotes).await {
            for event in &new_events {
                self.seen_events.remove(&event.event_id);
            }
            return Err(e);
        }

        metrics::record_write_batch(quotes.len(), started.elapsed());
        debug!(
            "archived {} quotes / {} events in {:?}",
            quotes.len(),
            events.len(),
            started.elapsed()
        );

        let statuses: HashMap<&str, EventStatus> = events
            .iter()
            .map(|e| (e.event_id.as_str(), e.status))
            .collect();
        self.publish_changes(&accepted, &statuses).await;

        self.spawn_page_warm(new_events);
        Ok(())
    }

    /// Buffered write path: enqueue quotes and flush once the batch
    /// threshold is reached. Performs no event or book upserts and no
    /// page warming; do not use it where those are required.
    pub async fn write(&self, quotes: Vec<Quote>) -> Result<()> {
        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.extend(quotes);
            buffer.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drains the buffer through the transactional demote-then-insert
    /// path and publishes the written quotes.
    pub async fn flush(&self) -> Result<()> {
        let drained: Vec<Quote> = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let quotes: Vec<&Quote> = drained.iter().collect();

        let mut tx = self
            .db
            .begin()
            .await
            .context("Failed to open archive transaction")?;
        Self::demote_and_insert(&mut tx, &quotes).await?;
        tx.commit()
            .await
            .context("Failed to commit archive transaction")?;

        metrics::record_write_batch(drained.len(), started.elapsed());
        info!("flushed {} buffered quotes in {:?}", drained.len(), started.elapsed());

        for quote in &drained {
            let update = OddsUpdate {
                event_id: quote.event_id.clone(),
                sport_key: quote.sport_key.clone(),
                market_key: quote.market_key.clone(),
                book_key: quote.book_key.clone(),
                outcome_name: quote.outcome_name.clone(),
                price: quote.price,
                point: quote.point,
                vendor_last_update: quote.vendor_last_update,
                received_at: quote.received_at,
                event_status: EventStatus::Upcoming,
                change_type: None,
            };
            if let Err(e) = self.publisher.publish_odds_update(&update).await {
                warn!("stream publish failed for {}: {:#}", quote.event_id, e);
                metrics::increment_publish_failure();
            }
        }
        Ok(())
    }

    /// Starts the background flush loop.
    pub async fn start(self: &Arc<Self>) {
        let writer = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let flush_interval = self.config.flush_interval;
        let batch_size = self.config.batch_size;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "archive writer flush loop started (batch_size: {}, flush_interval: {:?})",
                batch_size, flush_interval
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = writer.flush().await {
                            error!("periodic flush failed: {:#}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            if let Err(e) = writer.flush().await {
                error!("final flush failed: {:#}", e);
            }
            info!("archive writer flush loop stopped");
        });

        *self.flush_handle.lock().await = Some(handle);
    }

    /// Stops the flush loop. The loop drains the buffer once more
    /// before exiting.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.flush_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("flush loop join failed: {}", e);
            }
        }
    }

    /// Seeds the seen-events set from the archive's upcoming and live
    /// events. Call once at startup, before the scheduler runs.
    pub async fn load_seen_events(&self) -> Result<usize> {
        let ids = crate::database::load_seen_event_ids(&self.db).await?;
        let count = ids.len();
        for id in ids {
            self.seen_events.insert(id);
        }
        info!("seeded {} seen events from archive", count);
        Ok(count)
    }

    /// Enqueues page warms for every upcoming event inside the warm
    /// window. Call once at startup.
    pub async fn warm_upcoming_events(&self) -> Result<usize> {
        let events =
            crate::database::load_upcoming_events(&self.db, self.config.warm_window_hours)
                .await?;
        let count = events.len();
        info!("warming {} upcoming event pages", count);
        self.spawn_page_warm(events);
        Ok(count)
    }

    async fn run_transaction(
        &self,
        events: &[SportEvent],
        quotes: &[&Quote],
    ) -> Result<()> {
        if events.is_empty() && quotes.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .db
            .begin()
            .await
            .context("Failed to open archive transaction")?;

        if !events.is_empty() {
            Self::upsert_events(&mut tx, events).await?;
        }
        if !quotes.is_empty() {
            Self::upsert_books(&mut tx, quotes).await?;
            Self::demote_and_insert(&mut tx, quotes).await?;
        }

        tx.commit()
            .await
            .context("Failed to commit archive transaction")?;
        Ok(())
    }

    async fn upsert_events(
        tx: &mut Transaction<'_, Postgres>,
        events: &[SportEvent],
    ) -> Result<()> {
        for event in events {
            sqlx::query(
                "INSERT INTO events
                    (event_id, sport_key, home_team, away_team, commence_time, status,
                     discovered_at, last_seen_at)
                 VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
                 ON CONFLICT (event_id) DO UPDATE SET
                    home_team = EXCLUDED.home_team,
                    away_team = EXCLUDED.away_team,
                    commence_time = EXCLUDED.commence_time,
                    status = EXCLUDED.status,
                    last_seen_at = NOW()",
            )
            .bind(&event.event_id)
            .bind(&event.sport_key)
            .bind(&event.home_team)
            .bind(&event.away_team)
            .bind(event.commence_time)
            .bind(event.status.as_str())
            .execute(&mut **tx)
            .await
            .with_context(|| format!("Failed to upsert event {}", event.event_id))?;
        }
        Ok(())
    }

    async fn upsert_books(
        tx: &mut Transaction<'_, Postgres>,
        quotes: &[&Quote],
    ) -> Result<()> {
        let book_keys: BTreeSet<&str> =
            quotes.iter().map(|q| q.book_key.as_str()).collect();
        for book_key in book_keys {
            // The archive's own seed rows are authoritative; this only
            // backfills books the seed does not know yet.
            sqlx::query(
                "INSERT INTO books (book_key, display_name, book_type, active, regions)
                 VALUES ($1, $2, 'soft', TRUE, $3)
                 ON CONFLICT (book_key) DO NOTHING",
            )
            .bind(book_key)
            .bind(display_name_for_book(book_key))
            .bind(vec!["us".to_string()])
            .execute(&mut **tx)
            .await
            .with_context(|| format!("Failed to upsert book {book_key}"))?;
        }
        Ok(())
    }

    async fn demote_and_insert(
        tx: &mut Transaction<'_, Postgres>,
        quotes: &[&Quote],
    ) -> Result<()> {
        for quote in quotes {
            sqlx::query(
                "UPDATE odds_raw SET is_latest = FALSE
                  WHERE event_id = $1 AND market_key = $2 AND book_key = $3
                    AND outcome_name = $4 AND is_latest = TRUE",
            )
            .bind(&quote.event_id)
            .bind(&quote.market_key)
            .bind(&quote.book_key)
            .bind(&quote.outcome_name)
            .execute(&mut **tx)
            .await
            .context("Failed to demote prior odds row")?;

            sqlx::query(
                "INSERT INTO odds_raw
                    (id, event_id, sport_key, market_key, book_key, outcome_name,
                     price, point, vendor_last_update, received_at, is_latest)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE)",
            )
            .bind(Uuid::new_v4())
            .bind(&quote.event_id)
            .bind(&quote.sport_key)
            .bind(&quote.market_key)
            .bind(&quote.book_key)
            .bind(&quote.outcome_name)
            .bind(quote.price)
            .bind(quote.point)
            .bind(quote.vendor_last_update)
            .bind(quote.received_at)
            .execute(&mut **tx)
            .await
            .context("Failed to insert odds row")?;
        }
        Ok(())
    }

    async fn publish_changes(
        &self,
        changes: &[QuoteChange],
        statuses: &HashMap<&str, EventStatus>,
    ) {
        for change in changes {
            let status = statuses.get(change.quote.event_id.as_str()).copied();
            let update = OddsUpdate::from_change(change, status);
            if let Err(e) = self.publisher.publish_odds_update(&update).await {
                warn!(
                    "stream publish failed for {}: {:#}",
                    change.quote.event_id, e
                );
                metrics::increment_publish_failure();
            }
        }
    }

    fn spawn_page_warm(&self, events: Vec<SportEvent>) {
        let Some(client) = self.page_client.clone() else {
            return;
        };
        if events.is_empty() {
            return;
        }

        let limiter = Arc::clone(&self.warm_limiter);
        let window_hours = self.config.warm_window_hours;

        tokio::spawn(async move {
            let now = Utc::now();
            let mut skipped = 0usize;
            for event in &events {
                if !warm_eligible(event, now, window_hours) {
                    skipped += 1;
                    continue;
                }
                limiter.until_ready().await;
                if let Err(e) = client.open_game_page(event).await {
                    warn!("page warm failed for {}: {:#}", event.event_id, e);
                }
            }
            if skipped > 0 {
                info!(
                    "skipped {} page warms outside the {}h window",
                    skipped, window_hours
                );
            }
        });
    }
}

/// Warm only upcoming events that commence in the future and inside
/// the window.
fn warm_eligible(event: &SportEvent, now: DateTime<Utc>, window_hours: i64) -> bool {
    event.status == EventStatus::Upcoming
        && event.commence_time > now
        && event.commence_time <= now + ChronoDuration::hours(window_hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_book_filter_keeps_us_books_and_pinnacle() {
        assert!(book_accepted("fanduel"));
        assert!(book_accepted("draftkings"));
        assert!(book_accepted("pinnacle"));
        assert!(!book_accepted("marathonbet"));
        assert!(!book_accepted("betfair_ex_eu"));
        assert!(!book_accepted("matchbook"));
    }

    #[test]
    fn test_display_name_for_book() {
        assert_eq!(display_name_for_book("fanduel"), "Fanduel");
        assert_eq!(display_name_for_book("betfair_ex_eu"), "Betfair Ex Eu");
    }

    #[test]
    fn test_warm_eligibility_window() {
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        let mut event = SportEvent {
            event_id: "E1".to_string(),
            sport_key: "basketball_nba".to_string(),
            home_team: "Lakers".to_string(),
            away_team: "Celtics".to_string(),
            commence_time: now + ChronoDuration::hours(24),
            status: EventStatus::Upcoming,
        };
        assert!(warm_eligible(&event, now, 72));

        event.commence_time = now + ChronoDuration::hours(96);
        assert!(!warm_eligible(&event, now, 72));

        event.commence_time = now - ChronoDuration::hours(1);
        assert!(!warm_eligible(&event, now, 72));

        event.commence_time = now + ChronoDuration::hours(24);
        event.status = EventStatus::Live;
        assert!(!warm_eligible(&event, now, 72));
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL and Redis running
    async fn test_write_with_events_single_current_row() {
        use crate::types::ChangeType;

        let db = crate::database::connect(
            &std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        )
        .await
        .unwrap();
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let writer = ArchiveWriter::new(
            db.clone(),
            StreamPublisher::new(conn),
            None,
            WriterConfig::default(),
        );

        let now = Utc::now();
        let event = SportEvent {
            event_id: "writer-test-evt".to_string(),
            sport_key: "basketball_nba".to_string(),
            home_team: "Lakers".to_string(),
            away_team: "Celtics".to_string(),
            commence_time: now + ChronoDuration::hours(4),
            status: EventStatus::Upcoming,
        };
        let quote = Quote {
            event_id: event.event_id.clone(),
            sport_key: event.sport_key.clone(),
            market_key: "h2h".to_string(),
            book_key: "fanduel".to_string(),
            outcome_name: "Lakers".to_string(),
            price: -110,
            point: None,
            vendor_last_update: now,
            received_at: now,
        };
        let change = QuoteChange {
            quote: quote.clone(),
            change_type: ChangeType::New,
            old_price: None,
            old_point: None,
        };

        writer
            .write_with_events(std::slice::from_ref(&event), vec![change.clone()])
            .await
            .unwrap();
        assert!(writer.has_seen(&event.event_id));

        // Second observation with a moved price: exactly one current row.
        let mut moved = change;
        moved.quote.price = -115;
        moved.change_type = ChangeType::PriceOnly;
        moved.old_price = Some(-110);
        writer
            .write_with_events(std::slice::from_ref(&event), vec![moved])
            .await
            .unwrap();

        let current: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM odds_raw
              WHERE event_id = $1 AND market_key = 'h2h' AND book_key = 'fanduel'
                AND outcome_name = 'Lakers' AND is_latest = TRUE",
        )
        .bind(&event.event_id)
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(current, 1);
    }
}
