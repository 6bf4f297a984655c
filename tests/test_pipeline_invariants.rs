//! Cross-module tests for the ingestion pipeline's pure logic:
//! change classification against cached priors, ordering guarantees,
//! the book acceptance filter, and interval selection.
//!
//! Note: tests needing live Postgres/Redis live next to their modules
//! and are marked #[ignore].

use chrono::{TimeZone, Utc};
use itertools::Itertools;
use oddsflow::delta_engine::{classify, diff_batch};
use oddsflow::sport_module::SportModule;
use oddsflow::sports::basketball_nba::BasketballNba;
use oddsflow::types::{CachedQuote, ChangeType, EventStatus, OddsUpdate, Quote, QuoteChange};
use oddsflow::writer::book_accepted;

fn quote(book: &str, outcome: &str, price: i32, point: Option<f64>) -> Quote {
    Quote {
        event_id: "E1".to_string(),
        sport_key: "basketball_nba".to_string(),
        market_key: if point.is_some() { "spreads" } else { "h2h" }.to_string(),
        book_key: book.to_string(),
        outcome_name: outcome.to_string(),
        price,
        point,
        vendor_last_update: Utc.with_ymd_and_hms(2025, 11, 3, 18, 0, 0).unwrap(),
        received_at: Utc.with_ymd_and_hms(2025, 11, 3, 18, 0, 1).unwrap(),
    }
}

fn cached(price: i32, point: Option<f64>) -> CachedQuote {
    CachedQuote {
        price,
        point,
        vendor_last_update: Utc.with_ymd_and_hms(2025, 11, 3, 17, 0, 0).unwrap(),
    }
}

/// First observation: empty cache classifies New, and the published
/// message carries no change_type.
#[test]
fn test_first_observation_flow() {
    let q1 = quote("fanduel", "Lakers", -110, None);
    let changes = diff_batch(std::slice::from_ref(&q1), &[None]);

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::New);

    let msg = OddsUpdate::from_change(&changes[0], Some(EventStatus::Upcoming));
    let json = serde_json::to_value(&msg).unwrap();
    assert!(json.get("change_type").is_none());
    assert_eq!(json["event_id"], "E1");
}

/// Price move against a warm cache reports the old price.
#[test]
fn test_price_change_reports_old_price() {
    let q2 = quote("fanduel", "Lakers", -115, None);
    let changes = diff_batch(std::slice::from_ref(&q2), &[Some(cached(-110, None))]);

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::PriceOnly);
    assert_eq!(changes[0].old_price, Some(-110));
}

/// Point move on a spread reports both priors.
#[test]
fn test_point_change_reports_old_point() {
    let q = quote("fanduel", "Lakers", -110, Some(4.5));
    let change = classify(Some(&cached(-110, Some(3.5))), &q);
    assert_eq!(change.change_type, ChangeType::PointOnly);
    assert_eq!(change.old_point, Some(3.5));
    assert_eq!(change.old_price, Some(-110));
}

/// An unchanged re-observation produces no change at all.
#[test]
fn test_unchanged_quote_is_silent() {
    let q1 = quote("fanduel", "Lakers", -110, None);
    let changes = diff_batch(std::slice::from_ref(&q1), &[Some(cached(-110, None))]);
    assert!(changes.is_empty());
}

/// A cold-cache batch of 100 quotes across 10 books yields exactly 100
/// New changes, in input order.
#[test]
fn test_mixed_batch_all_new() {
    let books = [
        "fanduel",
        "draftkings",
        "betmgm",
        "caesars",
        "pointsbetus",
        "wynnbet",
        "bovada",
        "betrivers",
        "pinnacle",
        "superbook",
    ];
    let quotes: Vec<Quote> = (0..100)
        .map(|i| {
            quote(
                books[i % books.len()],
                &format!("Outcome {i}"),
                -110 - (i as i32 % 7),
                None,
            )
        })
        .collect();
    assert_eq!(quotes.iter().map(|q| &q.book_key).unique().count(), 10);
    let cached_none: Vec<Option<CachedQuote>> = vec![None; quotes.len()];

    let changes = diff_batch(&quotes, &cached_none);
    assert_eq!(changes.len(), 100);
    assert!(changes.iter().all(|c| c.change_type == ChangeType::New));

    let in_order: Vec<_> = changes
        .iter()
        .map(|c| c.quote.outcome_name.clone())
        .collect();
    let expected: Vec<_> = quotes.iter().map(|q| q.outcome_name.clone()).collect();
    assert_eq!(in_order, expected);
}

/// European-only books are dropped, Pinnacle and US books survive.
#[test]
fn test_book_acceptance_filter() {
    let batch = [
        quote("marathonbet", "Lakers", -110, None),
        quote("pinnacle", "Lakers", -108, None),
        quote("fanduel", "Lakers", -112, None),
    ];
    let kept: Vec<&str> = batch
        .iter()
        .filter(|q| book_accepted(&q.book_key))
        .map(|q| q.book_key.as_str())
        .collect();
    assert_eq!(kept, vec!["pinnacle", "fanduel"]);
}

/// detect -> update_cache -> detect must be a fixpoint: diffing a quote
/// against its own cached projection yields nothing.
#[test]
fn test_write_through_fixpoint() {
    let quotes: Vec<Quote> = (0..25)
        .map(|i| quote("fanduel", &format!("Outcome {i}"), -110 + i as i32, Some(2.5)))
        .collect();
    let as_cached: Vec<Option<CachedQuote>> = quotes
        .iter()
        .map(|q| Some(CachedQuote::from_quote(q)))
        .collect();
    assert!(diff_batch(&quotes, &as_cached).is_empty());
}

/// The featured ramp tightens monotonically as commence time nears.
#[test]
fn test_featured_ramp_monotone() {
    let nba = BasketballNba;
    let mut last = nba.featured_interval(nba.ramp_threshold_hours() + 1.0, false);
    let mut hours = nba.ramp_threshold_hours();
    while hours >= 0.0 {
        let interval = nba.featured_interval(hours, false);
        assert!(interval <= last, "ramp widened at {hours}h");
        last = interval;
        hours -= 0.5;
    }
    assert_eq!(nba.featured_interval(0.0, false), nba.ramp_target_interval());
}

/// Replaying a change list through message construction keeps the
/// stream order equal to the change-list order.
#[test]
fn test_stream_order_matches_change_order() {
    let changes: Vec<QuoteChange> = (0..10)
        .map(|i| QuoteChange {
            quote: quote("fanduel", &format!("Outcome {i}"), -110, None),
            change_type: ChangeType::PriceOnly,
            old_price: Some(-105),
            old_point: None,
        })
        .collect();
    let messages: Vec<OddsUpdate> = changes
        .iter()
        .map(|c| OddsUpdate::from_change(c, Some(EventStatus::Live)))
        .collect();
    for (change, msg) in changes.iter().zip(&messages) {
        assert_eq!(change.quote.outcome_name, msg.outcome_name);
        assert_eq!(msg.event_status, EventStatus::Live);
    }
}
