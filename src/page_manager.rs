//! Page Manager client - fire-and-forget warm/close notifications.
//!
//! The page manager pre-renders odds pages for events we expect traffic
//! on. Every call here is best-effort: failures are logged, never
//! retried, never surfaced to the pipeline.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::metrics;
use crate::types::SportEvent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct GamePageRequest<'a> {
    /// Away listed first by page-manager convention.
    away_team: &'a str,
    home_team: &'a str,
    sport: &'a str,
    period: &'a str,
    /// `YYYY-MM-DD`.
    event_date: String,
    books: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GamePageResponse {
    results: Vec<BookPageResult>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct BookPageResult {
    book: String,
    success: bool,
}

pub struct PageManagerClient {
    http: reqwest::Client,
    base_url: String,
    books: Vec<String>,
}

impl PageManagerClient {
    pub fn new(base_url: String, books: Vec<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create page-manager HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            books,
        })
    }

    pub fn books(&self) -> &[String] {
        &self.books
    }

    /// Asks the page manager to warm a page for the event, across all
    /// configured books.
    pub async fn open_game_page(&self, event: &SportEvent) -> Result<()> {
        self.post_page("open-game-page", event, self.books.clone())
            .await
    }

    /// Asks the page manager to tear down the page for one book.
    pub async fn close_game_page(&self, event: &SportEvent, book: &str) -> Result<()> {
        self.post_page("close-game-page", event, vec![book.to_string()])
            .await
    }

    async fn post_page(
        &self,
        endpoint: &str,
        event: &SportEvent,
        books: Vec<String>,
    ) -> Result<()> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let body = GamePageRequest {
            away_team: &event.away_team,
            home_team: &event.home_team,
            sport: normalize_sport_key(&event.sport_key),
            period: "game",
            event_date: event.commence_time.format("%Y-%m-%d").to_string(),
            books,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("page-manager {endpoint} request failed"))?;

        let status = response.status();
        if !status.is_success() {
            metrics::increment_page_notification(endpoint, false);
            anyhow::bail!("page-manager {endpoint} returned {status}");
        }

        // The body is only consulted for a summary log line.
        match response.json::<GamePageResponse>().await {
            Ok(parsed) if !parsed.results.is_empty() => {
                let ok = parsed.results.iter().filter(|r| r.success).count();
                let total = parsed.results.len();
                if ok == total {
                    info!("page-manager {endpoint} ok for {} ({ok}/{total} books)", event.event_id);
                } else if ok > 0 {
                    let failed: Vec<_> = parsed
                        .results
                        .iter()
                        .filter(|r| !r.success)
                        .map(|r| r.book.as_str())
                        .collect();
                    warn!(
                        "page-manager {endpoint} partial for {} ({ok}/{total} books, failed: {:?})",
                        event.event_id, failed
                    );
                } else {
                    warn!("page-manager {endpoint} failed for all books on {}", event.event_id);
                }
            }
            _ => info!("page-manager {endpoint} accepted for {}", event.event_id),
        }
        metrics::increment_page_notification(endpoint, true);
        Ok(())
    }
}

/// Collapses a vendor sport key to the page manager's short form:
/// `basketball_nba -> nba`, `americanfootball_nfl -> nfl`.
pub fn normalize_sport_key(sport_key: &str) -> &str {
    sport_key.rsplit('_').next().unwrap_or(sport_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventStatus;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_normalize_sport_key() {
        assert_eq!(normalize_sport_key("basketball_nba"), "nba");
        assert_eq!(normalize_sport_key("americanfootball_nfl"), "nfl");
        assert_eq!(normalize_sport_key("icehockey_nhl"), "nhl");
        assert_eq!(normalize_sport_key("soccer"), "soccer");
    }

    #[test]
    fn test_request_body_shape() {
        let event = SportEvent {
            event_id: "E1".to_string(),
            sport_key: "basketball_nba".to_string(),
            home_team: "Lakers".to_string(),
            away_team: "Celtics".to_string(),
            commence_time: Utc.with_ymd_and_hms(2025, 11, 3, 19, 30, 0).unwrap(),
            status: EventStatus::Upcoming,
        };
        let body = GamePageRequest {
            away_team: &event.away_team,
            home_team: &event.home_team,
            sport: normalize_sport_key(&event.sport_key),
            period: "game",
            event_date: event.commence_time.format("%Y-%m-%d").to_string(),
            books: vec!["fanduel".to_string()],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["away_team"], "Celtics");
        assert_eq!(json["sport"], "nba");
        assert_eq!(json["event_date"], "2025-11-03");
        assert_eq!(json["period"], "game");
    }
}
