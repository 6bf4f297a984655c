//! Delta Engine - cache-backed change detection for incoming quotes.
//!
//! Each quote identity has at most one cached prior observation under
//! `odds:current:{event_id}:{market_key}:{book_key}:{outcome_name}`.
//! Detection is one batched MGET per poll; the cache is written through
//! after the archive commit, with a TTL that must exceed the longest
//! poll interval so a healthy pipeline never ages entries out.
//!
//! The cache is a lossy replica, not the source of truth. A lost entry
//! costs one duplicate `New` classification, which the writer's
//! demote-then-insert sequence absorbs.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use redis::aio::ConnectionManager;

use crate::metrics;
use crate::types::{CachedQuote, ChangeType, Quote, QuoteChange};

/// Connects to the odds cache with retries to survive startup races.
pub async fn connect_cache(redis_url: &str) -> Result<ConnectionManager> {
    let max_attempts: u32 = 5;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let client =
            redis::Client::open(redis_url).context("Failed to create Redis client")?;
        match ConnectionManager::new(client).await {
            Ok(conn) => {
                info!("Connected to odds cache");
                return Ok(conn);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(anyhow!(
                        "Failed to connect to odds cache after {max_attempts} attempts: {e}"
                    ));
                }
                warn!("cache connection attempt {attempt} failed: {e}. Retrying...");
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
    }
}

/// Absolute tolerance when comparing points. Vendor feeds round-trip
/// through floats and can wobble in the last decimals.
const POINT_EPSILON: f64 = 1e-3;

#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error("odds cache unavailable: {0}")]
    CacheUnavailable(#[from] redis::RedisError),
}

pub struct DeltaEngine {
    conn: ConnectionManager,
    ttl: Duration,
}

impl DeltaEngine {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    /// Classifies each quote against its cached prior and returns, in
    /// input order, only the quotes that changed. One MGET round-trip
    /// regardless of batch size.
    pub async fn detect_changes(&self, quotes: &[Quote]) -> Result<Vec<QuoteChange>, DeltaError> {
        if quotes.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("MGET");
        for quote in quotes {
            cmd.arg(quote.cache_key());
        }

        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = cmd.query_async(&mut conn).await?;

        let cached: Vec<Option<CachedQuote>> = raw
            .into_iter()
            .zip(quotes)
            .map(|(value, quote)| decode_cached(value, quote))
            .collect();

        let changes = diff_batch(quotes, &cached);
        metrics::record_delta_batch(quotes.len(), changes.len());
        debug!(
            "delta: {} of {} quotes changed",
            changes.len(),
            quotes.len()
        );
        Ok(changes)
    }

    /// Write-through: stores each quote's cached projection under its
    /// identity key with the configured TTL, in a single pipeline.
    pub async fn update_cache(&self, quotes: &[Quote]) -> Result<(), DeltaError> {
        if quotes.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for quote in quotes {
            // serialization of our own struct cannot fail
            let payload = serde_json::to_string(&CachedQuote::from_quote(quote))
                .unwrap_or_default();
            pipe.cmd("SET")
                .arg(quote.cache_key())
                .arg(payload)
                .arg("EX")
                .arg(self.ttl.as_secs().max(1))
                .ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    /// Re-seeds the cache from a full set of current quotes. Used at
    /// startup and after cache loss; semantically identical to
    /// [`Self::update_cache`].
    pub async fn rebuild_cache(&self, quotes: &[Quote]) -> Result<(), DeltaError> {
        info!("rebuilding odds cache with {} quotes", quotes.len());
        self.update_cache(quotes).await
    }
}

fn decode_cached(value: Option<String>, quote: &Quote) -> Option<CachedQuote> {
    let Some(raw) = value else {
        metrics::increment_cache_miss();
        return None;
    };
    match serde_json::from_str(&raw) {
        Ok(cached) => {
            metrics::increment_cache_hit();
            Some(cached)
        }
        Err(e) => {
            // Treat as absent: the quote classifies New and the next
            // write-through heals the entry.
            warn!(
                "corrupt cache entry for {}: {} - treating as miss",
                quote.cache_key(),
                e
            );
            metrics::increment_cache_miss();
            None
        }
    }
}

/// Pure batch diff: order-preserving subsequence of the input, dropping
/// quotes whose classification is `None`.
pub fn diff_batch(quotes: &[Quote], cached: &[Option<CachedQuote>]) -> Vec<QuoteChange> {
    quotes
        .iter()
        .zip(cached)
        .filter_map(|(quote, prior)| {
            let change = classify(prior.as_ref(), quote);
            (change.change_type != ChangeType::None).then_some(change)
        })
        .collect()
}

/// Classifies one quote against its cached prior. First match wins:
/// no prior -> New; price and point differ -> Both; then PriceOnly,
/// PointOnly, None.
pub fn classify(cached: Option<&CachedQuote>, quote: &Quote) -> QuoteChange {
    let Some(prior) = cached else {
        return QuoteChange {
            quote: quote.clone(),
            change_type: ChangeType::New,
            old_price: None,
            old_point: None,
        };
    };

    let price_changed = prior.price != quote.price;
    let point_changed = !points_equal(prior.point, quote.point);

    let change_type = match (price_changed, point_changed) {
        (true, true) => ChangeType::Both,
        (true, false) => ChangeType::PriceOnly,
        (false, true) => ChangeType::PointOnly,
        (false, false) => ChangeType::None,
    };

    QuoteChange {
        quote: quote.clone(),
        change_type,
        old_price: Some(prior.price),
        old_point: prior.point,
    }
}

/// Point equality under [`POINT_EPSILON`]. `None == None`; a missing
/// point never equals a present one.
pub fn points_equal(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => (x - y).abs() <= POINT_EPSILON,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn quote(outcome: &str, price: i32, point: Option<f64>) -> Quote {
        Quote {
            event_id: "E1".to_string(),
            sport_key: "basketball_nba".to_string(),
            market_key: "spreads".to_string(),
            book_key: "fanduel".to_string(),
            outcome_name: outcome.to_string(),
            price,
            point,
            vendor_last_update: Utc::now(),
            received_at: Utc::now(),
        }
    }

    fn cached(price: i32, point: Option<f64>) -> CachedQuote {
        CachedQuote {
            price,
            point,
            vendor_last_update: Utc::now(),
        }
    }

    #[test]
    fn test_no_prior_classifies_new() {
        let change = classify(None, &quote("Lakers", -110, None));
        assert_eq!(change.change_type, ChangeType::New);
        assert_eq!(change.old_price, None);
        assert_eq!(change.old_point, None);
    }

    #[test]
    fn test_price_change_only() {
        let prior = cached(-110, Some(3.5));
        let change = classify(Some(&prior), &quote("Lakers", -115, Some(3.5)));
        assert_eq!(change.change_type, ChangeType::PriceOnly);
        assert_eq!(change.old_price, Some(-110));
        assert_eq!(change.old_point, Some(3.5));
    }

    #[test]
    fn test_point_change_only() {
        let prior = cached(-110, Some(3.5));
        let change = classify(Some(&prior), &quote("Lakers", -110, Some(4.5)));
        assert_eq!(change.change_type, ChangeType::PointOnly);
        assert_eq!(change.old_point, Some(3.5));
        assert_eq!(change.old_price, Some(-110));
    }

    #[test]
    fn test_both_changed() {
        let prior = cached(-110, Some(3.5));
        let change = classify(Some(&prior), &quote("Lakers", 105, Some(4.0)));
        assert_eq!(change.change_type, ChangeType::Both);
    }

    #[test]
    fn test_unchanged_classifies_none() {
        let prior = cached(-110, Some(3.5));
        let change = classify(Some(&prior), &quote("Lakers", -110, Some(3.5)));
        assert_eq!(change.change_type, ChangeType::None);
    }

    #[test]
    fn test_point_epsilon_tolerates_float_noise() {
        assert!(points_equal(Some(3.5), Some(3.5004)));
        assert!(!points_equal(Some(3.5), Some(3.52)));
        assert!(points_equal(None, None));
        assert!(!points_equal(None, Some(0.0)));
    }

    #[test]
    fn test_diff_batch_is_order_preserving_subsequence() {
        let quotes = vec![
            quote("a", -110, Some(1.5)),
            quote("b", -110, Some(1.5)),
            quote("c", -120, Some(1.5)),
            quote("d", 100, None),
        ];
        let cached = vec![
            None,                          // new
            Some(cached(-110, Some(1.5))), // unchanged
            Some(cached(-110, Some(1.5))), // price change
            Some(cached(100, None)),       // unchanged
        ];
        let changes = diff_batch(&quotes, &cached);
        let outcomes: Vec<_> = changes
            .iter()
            .map(|c| c.quote.outcome_name.as_str())
            .collect();
        assert_eq!(outcomes, vec!["a", "c"]);
        assert_eq!(changes[0].change_type, ChangeType::New);
        assert_eq!(changes[1].change_type, ChangeType::PriceOnly);
    }

    #[test]
    fn test_diff_batch_all_unseen() {
        let quotes: Vec<Quote> = (0..100)
            .map(|i| quote(&format!("o{i}"), -110 - i, Some(1.5)))
            .collect();
        let cached = vec![None; 100];
        let changes = diff_batch(&quotes, &cached);
        assert_eq!(changes.len(), 100);
        assert!(changes.iter().all(|c| c.change_type == ChangeType::New));
    }

    #[test]
    fn test_corrupt_entry_decodes_as_miss() {
        let q = quote("Lakers", -110, None);
        assert!(decode_cached(Some("{not json".to_string()), &q).is_none());
        assert!(decode_cached(None, &q).is_none());
        let good = serde_json::to_string(&cached(-110, None)).unwrap();
        assert_eq!(
            decode_cached(Some(good), &q).map(|c| c.price),
            Some(-110)
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_detect_then_update_round_trip() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let engine = DeltaEngine::new(conn, Duration::from_secs(300));

        let quotes = vec![quote("RoundTrip", -110, Some(3.5))];
        engine.update_cache(&quotes).await.unwrap();
        let changes = engine.detect_changes(&quotes).await.unwrap();
        assert!(changes.is_empty());

        let moved = vec![quote("RoundTrip", -115, Some(3.5))];
        let changes = engine.detect_changes(&moved).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::PriceOnly);
    }
}
