//! MLB: long daily slates. Props polling is disabled here; the featured
//! markets carry the volume that matters downstream.

use std::time::Duration;

use crate::sport_module::{RampTier, SportModule};

pub struct BaseballMlb;

static PROPS_RAMP: [RampTier; 1] = [RampTier {
    from_hours: 0.0,
    to_hours: 24.0,
    interval: Duration::from_secs(600),
}];

impl SportModule for BaseballMlb {
    fn sport_key(&self) -> &'static str {
        "baseball_mlb"
    }
    fn display_name(&self) -> &'static str {
        "MLB"
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
        false
    }
    fn props_markets(&self) -> &'static [&'static str] {
        &[]
    }
    fn props_poll_interval(&self) -> Duration {
        Duration::from_secs(600)
    }
    fn props_discovery_interval(&self) -> Duration {
        Duration::from_secs(1800)
    }
    fn props_discovery_window_hours(&self) -> i64 {
        24
    }
    fn props_ramp(&self) -> &'static [RampTier] {
        &PROPS_RAMP
    }
}
