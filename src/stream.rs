//! Stream publisher - emits change messages onto Redis Streams.
//!
//! The archive is the source of truth; streams are a secondary replica
//! with at-most-once delivery per transaction. Consumers must tolerate
//! gaps.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::types::OddsUpdate;

/// Stream carrying one message per captured closing-line event.
pub const CLOSING_LINES_STREAM: &str = "closing_lines.captured";

#[derive(Clone)]
pub struct StreamPublisher {
    conn: ConnectionManager,
}

impl StreamPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Stream name for a sport's raw odds changes.
    pub fn raw_odds_stream(sport_key: &str) -> String {
        format!("odds.raw.{sport_key}")
    }

    /// Appends one changed-quote message to `odds.raw.{sport_key}`.
    /// Callers publish sequentially so messages land in change-list
    /// order.
    pub async fn publish_odds_update(&self, update: &OddsUpdate) -> Result<()> {
        let stream = Self::raw_odds_stream(&update.sport_key);
        let payload =
            serde_json::to_string(update).context("Failed to serialize odds update")?;

        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(
                &stream,
                "*",
                &[
                    ("event_id", update.event_id.as_str()),
                    ("market_key", update.market_key.as_str()),
                    ("book_key", update.book_key.as_str()),
                    ("data", payload.as_str()),
                ],
            )
            .await
            .with_context(|| format!("Failed to XADD to {stream}"))?;

        debug!("published {} to {}", id, stream);
        Ok(())
    }

    /// Appends a capture notification to `closing_lines.captured`.
    pub async fn publish_closing_capture(
        &self,
        event_id: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(
                CLOSING_LINES_STREAM,
                "*",
                &[
                    ("event_id", event_id),
                    ("captured_at", &captured_at.to_rfc3339()),
                ],
            )
            .await
            .context("Failed to XADD closing-line capture")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_is_keyed_by_sport() {
        assert_eq!(
            StreamPublisher::raw_odds_stream("basketball_nba"),
            "odds.raw.basketball_nba"
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_publish_round_trip() {
        use crate::types::{ChangeType, EventStatus};
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let publisher = StreamPublisher::new(conn);

        let update = OddsUpdate {
            event_id: "E1".to_string(),
            sport_key: "basketball_nba".to_string(),
            market_key: "h2h".to_string(),
            book_key: "fanduel".to_string(),
            outcome_name: "Lakers".to_string(),
            price: -110,
            point: None,
            vendor_last_update: Utc::now(),
            received_at: Utc::now(),
            event_status: EventStatus::Upcoming,
            change_type: Some(ChangeType::PriceOnly),
        };
        publisher.publish_odds_update(&update).await.unwrap();
    }
}
