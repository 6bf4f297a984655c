//! Concrete sport modules.
//!
//! One file per sport; each implements [`crate::sport_module::SportModule`]
//! with that sport's markets, regions, and polling cadences.

pub mod americanfootball_nfl;
pub mod baseball_mlb;
pub mod basketball_nba;
pub mod basketball_ncaab;
pub mod icehockey_nhl;

use std::sync::Arc;

use crate::registry::{RegistryError, SportRegistry};

/// Registers the sports this deployment polls by default.
pub fn register_defaults(registry: &SportRegistry) -> Result<(), RegistryError> {
    registry.register(Arc::new(basketball_nba::BasketballNba))?;
    registry.register(Arc::new(basketball_ncaab::BasketballNcaab))?;
    registry.register(Arc::new(americanfootball_nfl::AmericanFootballNfl))?;
    registry.register(Arc::new(baseball_mlb::BaseballMlb))?;
    registry.register(Arc::new(icehockey_nhl::IceHockeyNhl))?;
    Ok(())
}
