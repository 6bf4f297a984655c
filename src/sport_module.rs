//! # Sport Module Trait
//!
//! The core abstraction for integrating sports into the ingestion
//! pipeline. A `SportModule` is a static capability set: sport key,
//! featured markets, regions, poll cadences, and a quote validator.
//! The scheduler is polymorphic over this trait and knows nothing about
//! specific sports.
//!
//! ## Adding a new sport
//!
//! 1. Implement `SportModule` in a new file under `src/sports/`
//! 2. Register it in `sports::register_defaults` (or at your own
//!    startup site)
//!
//! Concrete implementations are compile-time modules, created at startup
//! and never mutated.

use std::time::Duration;

use crate::types::Quote;
use crate::validator::{self, QuoteError};

/// One bracket of a props polling ramp: the interval to use while
/// `hours_to_start` lies within `[from_hours, to_hours)`.
#[derive(Debug, Clone, Copy)]
pub struct RampTier {
    pub from_hours: f64,
    pub to_hours: f64,
    pub interval: Duration,
}

/// Static per-sport configuration and interval selection.
pub trait SportModule: Send + Sync {
    /// Vendor sport key, e.g. `basketball_nba`.
    fn sport_key(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    /// Vendor regions to request, in preference order.
    fn regions(&self) -> &'static [&'static str];
    /// The mainline markets polled on every featured tick.
    fn featured_markets(&self) -> &'static [&'static str];
    /// Pre-match featured cadence, before the ramp tightens it.
    fn featured_poll_interval(&self) -> Duration;
    /// Cadence once the event is in play.
    fn in_play_interval(&self) -> Duration;
    /// Hours-to-commence above which the pre-match cadence applies.
    fn ramp_threshold_hours(&self) -> f64;
    /// Cadence the featured ramp converges to at commence time.
    fn ramp_target_interval(&self) -> Duration;
    fn props_enabled(&self) -> bool;
    /// Per-event proposition markets the props poller requests.
    fn props_markets(&self) -> &'static [&'static str];
    fn props_poll_interval(&self) -> Duration;
    fn props_discovery_interval(&self) -> Duration;
    fn props_discovery_window_hours(&self) -> i64;
    /// Props ramp, ordered farthest bracket first; the final tier is the
    /// tightest.
    fn props_ramp(&self) -> &'static [RampTier];

    /// Validates a quote of this sport. The default applies the
    /// cross-sport rules; sports with stricter markets can override.
    fn validate_quote(&self, quote: &Quote) -> Result<(), QuoteError> {
        validator::validate_common(quote)
    }

    /// Featured-market polling interval for an event `hours_to_start`
    /// from commencing. Live events poll at the in-play cadence; far-out
    /// events at the pre-match cadence; in between, the interval is
    /// linearly interpolated toward the ramp target.
    fn featured_interval(&self, hours_to_start: f64, is_live: bool) -> Duration {
        if is_live {
            return self.in_play_interval();
        }
        let threshold = self.ramp_threshold_hours();
        if hours_to_start > threshold {
            return self.featured_poll_interval();
        }
        let fraction = (hours_to_start / threshold).clamp(0.0, 1.0);
        let target = self.ramp_target_interval().as_secs_f64();
        let pre_match = self.featured_poll_interval().as_secs_f64();
        Duration::from_secs_f64(target + (pre_match - target) * fraction)
    }

    /// Props polling interval: the first ramp tier whose bracket
    /// contains `hours_to_start`, falling back to the tightest tier.
    fn props_interval(&self, hours_to_start: f64, is_live: bool) -> Duration {
        if is_live {
            return self.in_play_interval();
        }
        for tier in self.props_ramp() {
            if hours_to_start >= tier.from_hours && hours_to_start < tier.to_hours {
                return tier.interval;
            }
        }
        self.props_ramp()
            .last()
            .map(|t| t.interval)
            .unwrap_or_else(|| self.props_poll_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSport;

    static TEST_RAMP: [RampTier; 3] = [
        RampTier {
            from_hours: 12.0,
            to_hours: 48.0,
            interval: Duration::from_secs(900),
        },
        RampTier {
            from_hours: 3.0,
            to_hours: 12.0,
            interval: Duration::from_secs(300),
        },
        RampTier {
            from_hours: 0.0,
            to_hours: 3.0,
            interval: Duration::from_secs(120),
        },
    ];

    impl SportModule for TestSport {
        fn sport_key(&self) -> &'static str {
            "testball_xyz"
        }
        fn display_name(&self) -> &'static str {
            "Testball"
        }
        fn regions(&self) -> &'static [&'static str] {
            &["us"]
        }
        fn featured_markets(&self) -> &'static [&'static str] {
            &["h2h", "spreads", "totals"]
        }
        fn featured_poll_interval(&self) -> Duration {
            Duration::from_secs(120)
        }
        fn in_play_interval(&self) -> Duration {
            Duration::from_secs(15)
        }
        fn ramp_threshold_hours(&self) -> f64 {
            6.0
        }
        fn ramp_target_interval(&self) -> Duration {
            Duration::from_secs(30)
        }
        fn props_enabled(&self) -> bool {
            true
        }
        fn props_markets(&self) -> &'static [&'static str] {
            &["player_points"]
        }
        fn props_poll_interval(&self) -> Duration {
            Duration::from_secs(300)
        }
        fn props_discovery_interval(&self) -> Duration {
            Duration::from_secs(600)
        }
        fn props_discovery_window_hours(&self) -> i64 {
            48
        }
        fn props_ramp(&self) -> &'static [RampTier] {
            &TEST_RAMP
        }
    }

    #[test]
    fn test_featured_interval_live() {
        assert_eq!(
            TestSport.featured_interval(2.0, true),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_featured_interval_beyond_threshold() {
        assert_eq!(
            TestSport.featured_interval(24.0, false),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_featured_interval_at_commence_hits_target() {
        assert_eq!(
            TestSport.featured_interval(0.0, false),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_featured_interval_interpolates_midway() {
        // halfway through a 6h ramp between 30s and 120s
        let interval = TestSport.featured_interval(3.0, false);
        assert_eq!(interval, Duration::from_secs_f64(75.0));
    }

    #[test]
    fn test_props_interval_tier_selection() {
        assert_eq!(
            TestSport.props_interval(24.0, false),
            Duration::from_secs(900)
        );
        assert_eq!(
            TestSport.props_interval(5.0, false),
            Duration::from_secs(300)
        );
        assert_eq!(
            TestSport.props_interval(1.0, false),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_props_interval_falls_back_to_tightest_tier() {
        // 72h is outside every bracket
        assert_eq!(
            TestSport.props_interval(72.0, false),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_props_interval_live() {
        assert_eq!(
            TestSport.props_interval(1.0, true),
            Duration::from_secs(15)
        );
    }
}
