//! NBA: daily slates, heavy prop coverage, lines move fast close to tip.

use std::time::Duration;

use crate::sport_module::{RampTier, SportModule};

pub struct BasketballNba;

static PROPS_RAMP: [RampTier; 3] = [
    RampTier {
        from_hours: 12.0,
        to_hours: 36.0,
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

impl SportModule for BasketballNba {
    fn sport_key(&self) -> &'static str {
        "basketball_nba"
    }
    fn display_name(&self) -> &'static str {
        "NBA"
    }
    fn regions(&self) -> &'static [&'static str] {
        &["us"]
    }
    fn featured_markets(&self) -> &'static [&'static str] {
        &["h2h", "spreads", "totals"]
    }
    fn featured_poll_interval(&self) -> Duration {
        Duration::from_secs(60)
    }
    fn in_play_interval(&self) -> Duration {
        Duration::from_secs(15)
    }
    fn ramp_threshold_hours(&self) -> f64 {
        6.0
    }
    fn ramp_target_interval(&self) -> Duration {
        Duration::from_secs(20)
    }
    fn props_enabled(&self) -> bool {
        true
    }
    fn props_markets(&self) -> &'static [&'static str] {
        &["player_points", "player_rebounds", "player_assists", "player_threes"]
    }
    fn props_poll_interval(&self) -> Duration {
        Duration::from_secs(120)
    }
    fn props_discovery_interval(&self) -> Duration {
        Duration::from_secs(600)
    }
    fn props_discovery_window_hours(&self) -> i64 {
        36
    }
    fn props_ramp(&self) -> &'static [RampTier] {
        &PROPS_RAMP
    }
}
