//! # Vendor Adapter
//!
//! Abstraction over upstream odds vendors. The pipeline only sees
//! [`OddsVendor`]; the concrete [`TheOddsApiClient`] translates The Odds
//! API v4 REST dialect into the internal fetch result type.
//!
//! Vendor calls retry internally up to three times with exponential
//! backoff (1 s, 2 s, 4 s) on transport errors and 5xx/429 responses.
//! Other 4xx responses fail immediately: they will not get better by
//! retrying.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::types::{EventStatus, Quote, SportEvent};

/// Vendor API request budget, requests per minute.
const REQUESTS_PER_MINUTE: u32 = 45;
const MAX_RETRIES: usize = 3;

/// What to fetch on one poll tick.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub sport_key: String,
    pub regions: Vec<String>,
    pub markets: Vec<String>,
}

/// One vendor round-trip, flattened.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub events: Vec<SportEvent>,
    pub quotes: Vec<Quote>,
}

#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("vendor transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vendor returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl VendorError {
    /// Transient failures worth another attempt: network errors, 5xx,
    /// and rate-limit responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            VendorError::Transport(_) => true,
            VendorError::Api { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// The seam the scheduler polls through.
#[async_trait]
pub trait OddsVendor: Send + Sync {
    async fn fetch_odds(&self, options: &FetchOptions) -> Result<FetchResult>;
    /// Odds for one event, used for per-event props markets. `None`
    /// when the vendor has no coverage for the event; coverage varies
    /// per event and its absence is not an error.
    async fn fetch_event_odds(
        &self,
        options: &FetchOptions,
        event_id: &str,
    ) -> Result<Option<FetchResult>>;
    /// Event listing without odds, used by props discovery.
    async fn list_events(&self, sport_key: &str) -> Result<Vec<SportEvent>>;
}

// ==================== WIRE TYPES ====================

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApiEvent {
    pub id: String,
    pub sport_key: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApiBookmaker {
    pub key: String,
    pub title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApiMarket {
    pub key: String,
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApiOutcome {
    pub name: String,
    pub price: Option<i32>,
    pub point: Option<f64>,
}

// ==================== THE ODDS API CLIENT ====================

pub struct TheOddsApiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl TheOddsApiClient {
    pub fn new(api_key: String, base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create vendor HTTP client")?;

        let quota = Quota::per_minute(
            NonZeroU32::new(REQUESTS_PER_MINUTE).expect("non-zero request budget"),
        );

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    fn retry_strategy() -> impl Iterator<Item = Duration> {
        // 1s, 2s, 4s
        ExponentialBackoff::from_millis(2)
            .factor(500)
            .take(MAX_RETRIES)
    }

    /// Tracks the vendor's request budget from the response headers.
    fn observe_quota(response: &reqwest::Response) {
        if let Some(remaining) = response
            .headers()
            .get("x-requests-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
        {
            crate::metrics::record_vendor_quota(remaining);
            if remaining < 100.0 {
                warn!("vendor request budget low: {remaining} remaining");
            } else {
                debug!("vendor requests remaining: {remaining}");
            }
        }
    }

    async fn get_events(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<ApiEvent>, VendorError> {
        self.rate_limiter.until_ready().await;

        let response = self.http.get(url).query(query).send().await?;
        Self::observe_quota(&response);

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VendorError::Api { status, body });
        }

        serde_json::from_str(&body).map_err(|e| VendorError::Api {
            status,
            body: format!("unparseable vendor payload: {e}"),
        })
    }

    async fn fetch_odds_raw(&self, options: &FetchOptions) -> Result<Vec<ApiEvent>, VendorError> {
        let url = format!("{}/v4/sports/{}/odds", self.base_url, options.sport_key);
        let query = [
            ("apiKey", self.api_key.clone()),
            ("regions", options.regions.join(",")),
            ("markets", options.markets.join(",")),
            ("oddsFormat", "american".to_string()),
        ];
        self.get_events(&url, &query).await
    }

    async fn list_events_raw(&self, sport_key: &str) -> Result<Vec<ApiEvent>, VendorError> {
        let url = format!("{}/v4/sports/{}/events", self.base_url, sport_key);
        let query = [("apiKey", self.api_key.clone())];
        self.get_events(&url, &query).await
    }
}

#[async_trait]
impl OddsVendor for TheOddsApiClient {
    async fn fetch_odds(&self, options: &FetchOptions) -> Result<FetchResult> {
        let api_events = RetryIf::spawn(
            Self::retry_strategy(),
            || self.fetch_odds_raw(options),
            |e: &VendorError| e.is_retryable(),
        )
        .await
        .with_context(|| format!("Failed to fetch odds for {}", options.sport_key))?;

        let result = flatten_events(api_events, &options.sport_key, Utc::now());
        info!(
            "fetched {} events / {} quotes for {}",
            result.events.len(),
            result.quotes.len(),
            options.sport_key
        );
        Ok(result)
    }

    async fn fetch_event_odds(
        &self,
        options: &FetchOptions,
        event_id: &str,
    ) -> Result<Option<FetchResult>> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/v4/sports/{}/events/{}/odds",
            self.base_url, options.sport_key, event_id
        );
        let query = [
            ("apiKey", self.api_key.clone()),
            ("regions", options.regions.join(",")),
            ("markets", options.markets.join(",")),
            ("oddsFormat", "american".to_string()),
        ];

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to fetch event odds for {event_id}"))?;
        Self::observe_quota(&response);

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read event odds body")?;
        if !status.is_success() {
            warn!("event odds unavailable for {event_id}: {status} - {body}");
            return Ok(None);
        }

        let api_event: ApiEvent =
            serde_json::from_str(&body).context("Failed to parse event odds")?;
        Ok(Some(flatten_events(
            vec![api_event],
            &options.sport_key,
            Utc::now(),
        )))
    }

    async fn list_events(&self, sport_key: &str) -> Result<Vec<SportEvent>> {
        let api_events = RetryIf::spawn(
            Self::retry_strategy(),
            || self.list_events_raw(sport_key),
            |e: &VendorError| e.is_retryable(),
        )
        .await
        .with_context(|| format!("Failed to list events for {sport_key}"))?;

        let now = Utc::now();
        Ok(flatten_events(api_events, sport_key, now).events)
    }
}

/// Flattens the vendor's event -> bookmaker -> market -> outcome nesting
/// into events plus one quote per outcome. Outcomes with null or zero
/// prices are dropped here; they carry no quotable observation.
pub fn flatten_events(
    api_events: Vec<ApiEvent>,
    fallback_sport_key: &str,
    now: DateTime<Utc>,
) -> FetchResult {
    let mut events = Vec::with_capacity(api_events.len());
    let mut quotes = Vec::new();

    for api_event in api_events {
        if api_event.id.is_empty() {
            warn!("vendor event without id, skipping");
            continue;
        }
        let sport_key = if api_event.sport_key.is_empty() {
            fallback_sport_key.to_string()
        } else {
            api_event.sport_key.clone()
        };
        let commence_time = api_event.commence_time.unwrap_or(now);
        let status = if commence_time <= now {
            EventStatus::Live
        } else {
            EventStatus::Upcoming
        };

        for bookmaker in &api_event.bookmakers {
            for market in &bookmaker.markets {
                for outcome in &market.outcomes {
                    let Some(price) = outcome.price.filter(|p| *p != 0) else {
                        debug!(
                            "dropping priceless outcome {}/{}/{}",
                            api_event.id, market.key, outcome.name
                        );
                        continue;
                    };
                    quotes.push(Quote {
                        event_id: api_event.id.clone(),
                        sport_key: sport_key.clone(),
                        market_key: market.key.clone(),
                        book_key: bookmaker.key.clone(),
                        outcome_name: outcome.name.clone(),
                        price,
                        point: outcome.point,
                        vendor_last_update: market
                            .last_update
                            .or(bookmaker.last_update)
                            .unwrap_or(now),
                        received_at: now,
                    });
                }
            }
        }

        events.push(SportEvent {
            event_id: api_event.id,
            sport_key,
            home_team: api_event.home_team,
            away_team: api_event.away_team,
            commence_time,
            status,
        });
    }

    FetchResult { events, quotes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_payload() -> Vec<ApiEvent> {
        serde_json::from_str(
            r#"[
              {
                "id": "E1",
                "sport_key": "basketball_nba",
                "commence_time": "2025-11-03T23:30:00Z",
                "home_team": "Los Angeles Lakers",
                "away_team": "Boston Celtics",
                "bookmakers": [
                  {
                    "key": "fanduel",
                    "title": "FanDuel",
                    "last_update": "2025-11-03T18:00:00Z",
                    "markets": [
                      {
                        "key": "spreads",
                        "outcomes": [
                          {"name": "Los Angeles Lakers", "price": -110, "point": -3.5},
                          {"name": "Boston Celtics", "price": -110, "point": 3.5}
                        ]
                      },
                      {
                        "key": "h2h",
                        "outcomes": [
                          {"name": "Los Angeles Lakers", "price": -160},
                          {"name": "Boston Celtics", "price": null}
                        ]
                      }
                    ]
                  }
                ]
              }
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_flatten_events() {
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 18, 30, 0).unwrap();
        let result = flatten_events(sample_payload(), "basketball_nba", now);

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].status, EventStatus::Upcoming);
        // null-price outcome dropped
        assert_eq!(result.quotes.len(), 3);
        let spread = &result.quotes[0];
        assert_eq!(spread.market_key, "spreads");
        assert_eq!(spread.point, Some(-3.5));
        assert_eq!(spread.book_key, "fanduel");
    }

    #[test]
    fn test_flatten_marks_started_events_live() {
        let now = Utc.with_ymd_and_hms(2025, 11, 4, 0, 0, 0).unwrap();
        let result = flatten_events(sample_payload(), "basketball_nba", now);
        assert_eq!(result.events[0].status, EventStatus::Live);
    }

    #[test]
    fn test_retryability() {
        let server_err = VendorError::Api {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(server_err.is_retryable());

        let rate_limited = VendorError::Api {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        assert!(rate_limited.is_retryable());

        let unauthorized = VendorError::Api {
            status: reqwest::StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        assert!(!unauthorized.is_retryable());
    }

    #[test]
    fn test_retry_strategy_backoff() {
        let delays: Vec<_> = TheOddsApiClient::retry_strategy().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }
}
