//! NHL.

use std::time::Duration;

use crate::sport_module::{RampTier, SportModule};

pub struct IceHockeyNhl;

static PROPS_RAMP: [RampTier; 3] = [
    RampTier {
        from_hours: 8.0,
        to_hours: 36.0,
        interval: Duration::from_secs(1200),
    },
    RampTier {
        from_hours: 2.0,
        to_hours: 8.0,
        interval: Duration::from_secs(420),
    },
    RampTier {
        from_hours: 0.0,
        to_hours: 2.0,
        interval: Duration::from_secs(180),
    },
];

impl SportModule for IceHockeyNhl {
    fn sport_key(&self) -> &'static str {
        "icehockey_nhl"
    }
    fn display_name(&self) -> &'static str {
        "NHL"
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
        Duration::from_secs(20)
    }
    fn ramp_threshold_hours(&self) -> f64 {
        8.0
    }
    fn ramp_target_interval(&self) -> Duration {
        Duration::from_secs(30)
    }
    fn props_enabled(&self) -> bool {
        true
    }
    fn props_markets(&self) -> &'static [&'static str] {
        &["player_points", "player_shots_on_goal", "player_goal_scorer_anytime"]
    }
    fn props_poll_interval(&self) -> Duration {
        Duration::from_secs(180)
    }
    fn props_discovery_interval(&self) -> Duration {
        Duration::from_secs(900)
    }
    fn props_discovery_window_hours(&self) -> i64 {
        36
    }
    fn props_ramp(&self) -> &'static [RampTier] {
        &PROPS_RAMP
    }
}
