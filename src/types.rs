//! Core domain types shared across the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a sporting event.
///
/// Status progresses monotonically `Upcoming -> Live -> Completed`;
/// `Cancelled` may replace any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Live => "live",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    /// Parses an archive status string. Unknown values fall back to
    /// `Upcoming` so a bad row cannot poison a scan.
    pub fn parse_or_upcoming(s: &str) -> Self {
        match s {
            "live" => EventStatus::Live,
            "completed" => EventStatus::Completed,
            "cancelled" => EventStatus::Cancelled,
            _ => EventStatus::Upcoming,
        }
    }
}

/// A sporting event as observed from the vendor or the archive.
///
/// `commence_time` is overwritten on each vendor sighting; the adapter is
/// authoritative for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SportEvent {
    pub event_id: String,
    pub sport_key: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub status: EventStatus,
}

impl SportEvent {
    /// Hours until commence time, negative once the event has started.
    pub fn hours_to_commence(&self, now: DateTime<Utc>) -> f64 {
        (self.commence_time - now).num_seconds() as f64 / 3600.0
    }
}

/// A single price offered by one sportsbook on one outcome of one market
/// of one event. The atomic unit of observation.
///
/// Identity is `(event_id, market_key, book_key, outcome_name)`; the
/// archive holds at most one row per identity with `is_latest = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub event_id: String,
    pub sport_key: String,
    pub market_key: String,
    pub book_key: String,
    pub outcome_name: String,
    /// American odds. Never zero for a valid quote.
    pub price: i32,
    /// Handicap or total line; present for spread and total markets.
    pub point: Option<f64>,
    pub vendor_last_update: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl Quote {
    /// Cache key under which the current observation for this identity
    /// is stored.
    pub fn cache_key(&self) -> String {
        format!(
            "odds:current:{}:{}:{}:{}",
            self.event_id, self.market_key, self.book_key, self.outcome_name
        )
    }
}

/// How a quote differs from its cached prior observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    PriceOnly,
    PointOnly,
    Both,
    None,
}

/// A quote together with its detected change classification.
#[derive(Debug, Clone)]
pub struct QuoteChange {
    pub quote: Quote,
    pub change_type: ChangeType,
    pub old_price: Option<i32>,
    pub old_point: Option<f64>,
}

/// Projection of a quote stored in the cache under its identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuote {
    pub price: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
    pub vendor_last_update: DateTime<Utc>,
}

impl CachedQuote {
    pub fn from_quote(q: &Quote) -> Self {
        Self {
            price: q.price,
            point: q.point,
            vendor_last_update: q.vendor_last_update,
        }
    }
}

/// Message published to `odds.raw.{sport_key}` for each changed quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsUpdate {
    pub event_id: String,
    pub sport_key: String,
    pub market_key: String,
    pub book_key: String,
    pub outcome_name: String,
    pub price: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
    pub vendor_last_update: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// `upcoming` or `live`; defaults to `upcoming` when unknown.
    pub event_status: EventStatus,
    /// Absent for first observations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
}

impl OddsUpdate {
    /// Builds the stream payload for a detected change. Statuses other
    /// than `live` collapse to `upcoming` per the message contract.
    pub fn from_change(change: &QuoteChange, event_status: Option<EventStatus>) -> Self {
        let q = &change.quote;
        let event_status = match event_status {
            Some(EventStatus::Live) => EventStatus::Live,
            _ => EventStatus::Upcoming,
        };
        Self {
            event_id: q.event_id.clone(),
            sport_key: q.sport_key.clone(),
            market_key: q.market_key.clone(),
            book_key: q.book_key.clone(),
            outcome_name: q.outcome_name.clone(),
            price: q.price,
            point: q.point,
            vendor_last_update: q.vendor_last_update,
            received_at: q.received_at,
            event_status,
            change_type: match change.change_type {
                ChangeType::New => None,
                ct => Some(ct),
            },
        }
    }
}
