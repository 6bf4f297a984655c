//! NFL: weekly slates, so discovery looks a full week out and pre-match
//! polling is relaxed until game day.

use std::time::Duration;

use crate::sport_module::{RampTier, SportModule};

pub struct AmericanFootballNfl;

static PROPS_RAMP: [RampTier; 3] = [
    RampTier {
        from_hours: 24.0,
        to_hours: 168.0,
        interval: Duration::from_secs(3600),
    },
    RampTier {
        from_hours: 6.0,
        to_hours: 24.0,
        interval: Duration::from_secs(900),
    },
    RampTier {
        from_hours: 0.0,
        to_hours: 6.0,
        interval: Duration::from_secs(300),
    },
];

impl SportModule for AmericanFootballNfl {
    fn sport_key(&self) -> &'static str {
        "americanfootball_nfl"
    }
    fn display_name(&self) -> &'static str {
        "NFL"
    }
    fn regions(&self) -> &'static [&'static str] {
        &["us"]
    }
    fn featured_markets(&self) -> &'static [&'static str] {
        &["h2h", "spreads", "totals"]
    }
    fn featured_poll_interval(&self) -> Duration {
        Duration::from_secs(300)
    }
    fn in_play_interval(&self) -> Duration {
        Duration::from_secs(30)
    }
    fn ramp_threshold_hours(&self) -> f64 {
        24.0
    }
    fn ramp_target_interval(&self) -> Duration {
        Duration::from_secs(60)
    }
    fn props_enabled(&self) -> bool {
        true
    }
    fn props_markets(&self) -> &'static [&'static str] {
        &["player_pass_yds", "player_rush_yds", "player_receptions", "player_anytime_td"]
    }
    fn props_poll_interval(&self) -> Duration {
        Duration::from_secs(300)
    }
    fn props_discovery_interval(&self) -> Duration {
        Duration::from_secs(3600)
    }
    fn props_discovery_window_hours(&self) -> i64 {
        168
    }
    fn props_ramp(&self) -> &'static [RampTier] {
        &PROPS_RAMP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nfl_week_out_uses_loosest_tier() {
        let nfl = AmericanFootballNfl;
        assert_eq!(nfl.props_interval(100.0, false), Duration::from_secs(3600));
        assert_eq!(nfl.featured_interval(100.0, false), Duration::from_secs(300));
    }
}
