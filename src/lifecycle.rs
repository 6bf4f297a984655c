//! Event Lifecycle Tracker
//!
//! Two independent periodic loops over the archive:
//!
//! - **Status promotion** moves events `upcoming -> live` once their
//!   commence time passes and `live -> completed` three hours in, and
//!   fires page-close notifications for completed events.
//! - **Closing-line capture** snapshots the current quotes of events
//!   that just went live into the write-once closing_lines table.
//!
//! Both loops are idempotent: promotion is status-guarded, capture is
//! filtered on non-existence and inserts with on-conflict-ignore, so
//! re-running a tick can never corrupt state.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::database::{self, DbPool};
use crate::page_manager::PageManagerClient;
use crate::stream::StreamPublisher;
use crate::types::SportEvent;

/// Events are promoted to live when commence time fell inside this
/// much history, and captured while inside the same margin either way.
fn live_promotion_margin() -> ChronoDuration {
    ChronoDuration::minutes(5)
}

/// An event is assumed over this long after it commenced.
fn completion_age() -> ChronoDuration {
    ChronoDuration::hours(3)
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Cadence of both loops.
    pub interval: Duration,
    /// Books to close pages for when an event completes.
    pub close_books: Vec<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            close_books: vec!["fanduel".to_string(), "draftkings".to_string()],
        }
    }
}

pub struct LifecycleTracker {
    db: DbPool,
    publisher: StreamPublisher,
    page_client: Option<Arc<PageManagerClient>>,
    config: LifecycleConfig,
    shutdown_tx: watch::Sender<bool>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleTracker {
    pub fn new(
        db: DbPool,
        publisher: StreamPublisher,
        page_client: Option<Arc<PageManagerClient>>,
        config: LifecycleConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            db,
            publisher,
            page_client,
            config,
            shutdown_tx,
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().await;

        let tracker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("lifecycle status loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = tracker.promote_statuses().await {
                            error!("status promotion failed: {e:#}");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("lifecycle status loop stopped");
        }));

        let tracker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("closing-line capture loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = tracker.capture_closing_lines().await {
                            error!("closing-line capture failed: {e:#}");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("closing-line capture loop stopped");
        }));
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Promotes `upcoming -> live -> completed` with status-guarded
    /// single statements, then fires page closes for the events that
    /// just completed.
    pub async fn promote_statuses(&self) -> Result<()> {
        let now = Utc::now();

        let promoted = sqlx::query(
            "UPDATE events SET status = 'live'
              WHERE status = 'upcoming'
                AND commence_time <= $1
                AND commence_time >= $2",
        )
        .bind(now)
        .bind(now - live_promotion_margin())
        .execute(&self.db)
        .await
        .context("Failed to promote events to live")?
        .rows_affected();

        // Snapshot before the update so the page closes can fire after
        // the rows have already flipped.
        let completing = self.completing_events(now).await?;

        let completed = sqlx::query(
            "UPDATE events SET status = 'completed'
              WHERE status = 'live'
                AND commence_time < $1",
        )
        .bind(now - completion_age())
        .execute(&self.db)
        .await
        .context("Failed to promote events to completed")?
        .rows_affected();

        if promoted > 0 || completed > 0 {
            info!("⏱️ lifecycle: {promoted} events live, {completed} completed");
        } else {
            debug!("lifecycle: no status changes");
        }

        self.close_pages(&completing);
        Ok(())
    }

    async fn completing_events(&self, now: DateTime<Utc>) -> Result<Vec<SportEvent>> {
        let rows = sqlx::query(
            "SELECT event_id, sport_key, home_team, away_team, commence_time, status
               FROM events
              WHERE status = 'live'
                AND commence_time < $1",
        )
        .bind(now - completion_age())
        .fetch_all(&self.db)
        .await
        .context("Failed to snapshot completing events")?;

        rows.iter().map(database::event_from_row).collect()
    }

    fn close_pages(&self, events: &[SportEvent]) {
        let Some(client) = self.page_client.clone() else {
            return;
        };
        if events.is_empty() {
            return;
        }

        let books = self.config.close_books.clone();
        let events = events.to_vec();
        tokio::spawn(async move {
            for event in &events {
                for book in &books {
                    if let Err(e) = client.close_game_page(event, book).await {
                        warn!(
                            "page close failed for {} at {book}: {e:#}",
                            event.event_id
                        );
                    }
                }
            }
        });
    }

    /// Captures closing lines for events that just went live: one
    /// transaction per event copying its current quotes, then a
    /// fire-and-forget capture notification.
    pub async fn capture_closing_lines(&self) -> Result<()> {
        let now = Utc::now();

        let pending: Vec<String> = sqlx::query_scalar(
            "SELECT e.event_id
               FROM events e
              WHERE e.status = 'live'
                AND e.commence_time >= $1
                AND e.commence_time <= $2
                AND NOT EXISTS (
                    SELECT 1 FROM closing_lines cl WHERE cl.event_id = e.event_id
                )",
        )
        .bind(now - live_promotion_margin())
        .bind(now + live_promotion_margin())
        .fetch_all(&self.db)
        .await
        .context("Failed to select closing-line candidates")?;

        if pending.is_empty() {
            debug!("no closing lines to capture");
            return Ok(());
        }

        for event_id in pending {
            let captured_at = Utc::now();

            let mut tx = self
                .db
                .begin()
                .await
                .context("Failed to open capture transaction")?;
            let rows = sqlx::query(
                "INSERT INTO closing_lines
                    (event_id, market_key, book_key, outcome_name, point,
                     closing_price, closed_at)
                 SELECT event_id, market_key, book_key, outcome_name,
                        COALESCE(point, 0), price, $2
                   FROM odds_raw
                  WHERE event_id = $1 AND is_latest = TRUE
                 ON CONFLICT (event_id, market_key, book_key, outcome_name, point)
                 DO NOTHING",
            )
            .bind(&event_id)
            .bind(captured_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to capture closing lines for {event_id}"))?
            .rows_affected();
            tx.commit()
                .await
                .context("Failed to commit closing-line capture")?;

            info!("📌 captured {rows} closing lines for {event_id}");

            if let Err(e) = self
                .publisher
                .publish_closing_capture(&event_id, captured_at)
                .await
            {
                warn!("closing-line capture publish failed for {event_id}: {e:#}");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker() -> (DbPool, LifecycleTracker) {
        let db = database::connect(
            &std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        )
        .await
        .unwrap();
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        (
            db.clone(),
            LifecycleTracker::new(
                db,
                StreamPublisher::new(conn),
                None,
                LifecycleConfig::default(),
            ),
        )
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL and Redis running
    async fn test_promotion_is_monotonic() {
        let (db, tracker) = tracker().await;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO events (event_id, sport_key, home_team, away_team,
                                 commence_time, status, discovered_at, last_seen_at)
             VALUES ('lifecycle-test-evt', 'basketball_nba', 'Lakers', 'Celtics',
                     $1, 'upcoming', NOW(), NOW())
             ON CONFLICT (event_id) DO UPDATE SET
                commence_time = EXCLUDED.commence_time, status = 'upcoming'",
        )
        .bind(now - ChronoDuration::minutes(2))
        .execute(&db)
        .await
        .unwrap();

        tracker.promote_statuses().await.unwrap();
        let status: String = sqlx::query_scalar(
            "SELECT status FROM events WHERE event_id = 'lifecycle-test-evt'",
        )
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(status, "live");

        // Re-running must not regress the status.
        tracker.promote_statuses().await.unwrap();
        let status: String = sqlx::query_scalar(
            "SELECT status FROM events WHERE event_id = 'lifecycle-test-evt'",
        )
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(status, "live");
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL and Redis running
    async fn test_capture_is_idempotent() {
        let (db, tracker) = tracker().await;

        tracker.capture_closing_lines().await.unwrap();
        let first: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM closing_lines")
            .fetch_one(&db)
            .await
            .unwrap();

        tracker.capture_closing_lines().await.unwrap();
        let second: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM closing_lines")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
