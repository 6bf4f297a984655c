//! Quote validation boundary.
//!
//! Malformed quotes are rejected here, before they enter the delta/write
//! pipeline. The archive and the cache only ever see quotes that passed
//! this gate.

use crate::types::Quote;

/// Validation failures for a single quote.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("price must be non-zero ({event_id}/{market_key}/{book_key}/{outcome_name})")]
    ZeroPrice {
        event_id: String,
        market_key: String,
        book_key: String,
        outcome_name: String,
    },
    #[error("market {market_key} requires a point ({event_id}/{book_key}/{outcome_name})")]
    MissingPoint {
        event_id: String,
        market_key: String,
        book_key: String,
        outcome_name: String,
    },
}

/// Whether a market family carries a handicap/total line.
pub fn requires_point(market_key: &str) -> bool {
    market_key.starts_with("spreads")
        || market_key.starts_with("totals")
        || market_key.starts_with("alternate_spreads")
        || market_key.starts_with("alternate_totals")
}

/// Checks the invariants every sport shares: American odds are never
/// zero, and handicap/total markets must carry a point.
pub fn validate_common(quote: &Quote) -> Result<(), QuoteError> {
    if quote.price == 0 {
        return Err(QuoteError::ZeroPrice {
            event_id: quote.event_id.clone(),
            market_key: quote.market_key.clone(),
            book_key: quote.book_key.clone(),
            outcome_name: quote.outcome_name.clone(),
        });
    }
    if requires_point(&quote.market_key) && quote.point.is_none() {
        return Err(QuoteError::MissingPoint {
            event_id: quote.event_id.clone(),
            market_key: quote.market_key.clone(),
            book_key: quote.book_key.clone(),
            outcome_name: quote.outcome_name.clone(),
        });
    }
    Ok(())
}

/// Outcome of validating one fetch batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationStats {
    pub accepted: usize,
    pub zero_price: usize,
    pub missing_point: usize,
}

impl ValidationStats {
    pub fn rejected(&self) -> usize {
        self.zero_price + self.missing_point
    }
}

/// Validates a whole batch through the given validator, returning the
/// quotes that passed plus rejection stats for the caller to log.
pub fn validate_batch<F>(quotes: Vec<Quote>, mut validate: F) -> (Vec<Quote>, ValidationStats)
where
    F: FnMut(&Quote) -> Result<(), QuoteError>,
{
    let mut stats = ValidationStats::default();
    let mut accepted = Vec::with_capacity(quotes.len());

    for quote in quotes {
        match validate(&quote) {
            Ok(()) => {
                stats.accepted += 1;
                accepted.push(quote);
            }
            Err(QuoteError::ZeroPrice { .. }) => stats.zero_price += 1,
            Err(QuoteError::MissingPoint { .. }) => stats.missing_point += 1,
        }
    }

    (accepted, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn quote(market: &str, price: i32, point: Option<f64>) -> Quote {
        Quote {
            event_id: "E1".to_string(),
            sport_key: "basketball_nba".to_string(),
            market_key: market.to_string(),
            book_key: "fanduel".to_string(),
            outcome_name: "Lakers".to_string(),
            price,
            point,
            vendor_last_update: Utc::now(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_zero_price_rejected() {
        let err = validate_common(&quote("h2h", 0, None)).unwrap_err();
        assert!(matches!(err, QuoteError::ZeroPrice { .. }));
    }

    #[test]
    fn test_spread_without_point_rejected() {
        let err = validate_common(&quote("spreads", -110, None)).unwrap_err();
        assert!(matches!(err, QuoteError::MissingPoint { .. }));
    }

    #[test]
    fn test_total_with_point_accepted() {
        assert!(validate_common(&quote("totals", -105, Some(221.5))).is_ok());
    }

    #[test]
    fn test_moneyline_without_point_accepted() {
        assert!(validate_common(&quote("h2h", 140, None)).is_ok());
    }

    #[test]
    fn test_alternate_spread_requires_point() {
        let err = validate_common(&quote("alternate_spreads", -120, None)).unwrap_err();
        assert!(matches!(err, QuoteError::MissingPoint { .. }));
    }

    #[test]
    fn test_validate_batch_partitions_and_counts() {
        let batch = vec![
            quote("h2h", -110, None),
            quote("h2h", 0, None),
            quote("spreads", -110, None),
            quote("totals", -105, Some(221.5)),
        ];
        let (accepted, stats) = validate_batch(batch, validate_common);
        assert_eq!(accepted.len(), 2);
        assert_eq!(
            stats,
            ValidationStats {
                accepted: 2,
                zero_price: 1,
                missing_point: 1,
            }
        );
        assert_eq!(stats.rejected(), 2);
    }
}
