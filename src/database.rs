//! PostgreSQL archive integration.
//!
//! The archive owns the durable record: sports, events, books, markets,
//! raw odds, and closing lines. This module provides the connection
//! pool and the startup queries; the writer and the lifecycle tracker
//! run their own statements inside their own transactions.
//!
//! Expected contracts (the schema itself is seeded out of band):
//! - `events(event_id PK, sport_key, home_team, away_team,
//!   commence_time, status, discovered_at, last_seen_at)`
//! - `books(book_key PK, display_name, book_type, active, regions[])`
//! - `odds_raw(id PK, event_id, sport_key, market_key, book_key,
//!   outcome_name, price, point, vendor_last_update, received_at,
//!   is_latest)`
//! - `closing_lines((event_id, market_key, book_key, outcome_name,
//!   point) PK, closing_price, closed_at)`

use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use log::{info, warn};
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use std::time::Duration;

use crate::types::{EventStatus, Quote, SportEvent};

/// PostgreSQL connection pool type alias.
pub type DbPool = sqlx::Pool<sqlx::Postgres>;

/// Connects to the archive with retries to survive startup races
/// against the database container.
pub async fn connect(database_url: &str) -> Result<DbPool> {
    let max_attempts: u32 = 5;
    let mut last_err: Option<sqlx::Error> = None;

    for attempt in 1..=max_attempts {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!("Connected to archive database");
                return Ok(pool);
            }
            Err(e) => {
                warn!(
                    "archive connection attempt {}/{} failed: {}",
                    attempt, max_attempts, e
                );
                last_err = Some(e);
                if attempt < max_attempts {
                    let jitter = rand::thread_rng().gen_range(0..250);
                    let backoff = 500u64 * 2u64.pow(attempt) + jitter;
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    Err(anyhow!(
        "Failed to connect to archive after {} attempts: {}",
        max_attempts,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Event ids of every upcoming or live event. Seeds the writer's
/// seen-events set so restarts do not re-warm pages for known events.
pub async fn load_seen_event_ids(pool: &DbPool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT event_id FROM events WHERE status IN ('upcoming', 'live')",
    )
    .fetch_all(pool)
    .await
    .context("Failed to load seen events from archive")?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("event_id").map_err(Into::into))
        .collect()
}

/// Upcoming events commencing within the next `window_hours`.
pub async fn load_upcoming_events(
    pool: &DbPool,
    window_hours: i64,
) -> Result<Vec<SportEvent>> {
    let now = Utc::now();
    let horizon = now + ChronoDuration::hours(window_hours);

    let rows = sqlx::query(
        "SELECT event_id, sport_key, home_team, away_team, commence_time, status
           FROM events
          WHERE status = 'upcoming'
            AND commence_time > $1
            AND commence_time <= $2
          ORDER BY commence_time",
    )
    .bind(now)
    .bind(horizon)
    .fetch_all(pool)
    .await
    .context("Failed to load upcoming events from archive")?;

    rows.iter().map(event_from_row).collect()
}

/// Current observations for every upcoming or live event. Re-seeds the
/// cache at startup so the first polls do not classify everything New.
pub async fn load_current_quotes(pool: &DbPool) -> Result<Vec<Quote>> {
    let rows = sqlx::query(
        "SELECT o.event_id, o.sport_key, o.market_key, o.book_key, o.outcome_name,
                o.price, o.point, o.vendor_last_update, o.received_at
           FROM odds_raw o
           JOIN events e ON e.event_id = o.event_id
          WHERE o.is_latest = TRUE
            AND e.status IN ('upcoming', 'live')",
    )
    .fetch_all(pool)
    .await
    .context("Failed to load current quotes from archive")?;

    rows.iter().map(quote_from_row).collect()
}

fn quote_from_row(row: &sqlx::postgres::PgRow) -> Result<Quote> {
    Ok(Quote {
        event_id: row.try_get("event_id")?,
        sport_key: row.try_get("sport_key")?,
        market_key: row.try_get("market_key")?,
        book_key: row.try_get("book_key")?,
        outcome_name: row.try_get("outcome_name")?,
        price: row.try_get("price")?,
        point: row.try_get("point")?,
        vendor_last_update: row.try_get("vendor_last_update")?,
        received_at: row.try_get("received_at")?,
    })
}

pub(crate) fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<SportEvent> {
    let status: String = row.try_get("status")?;
    Ok(SportEvent {
        event_id: row.try_get("event_id")?,
        sport_key: row.try_get("sport_key")?,
        home_team: row.try_get("home_team")?,
        away_team: row.try_get("away_team")?,
        commence_time: row.try_get("commence_time")?,
        status: EventStatus::parse_or_upcoming(&status),
    })
}
