//! Process-wide registration of enabled sport modules.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::sport_module::SportModule;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("sport {0} is already registered")]
    DuplicateSport(String),
}

/// Mapping from sport key to sport module. Populated at startup; reads
/// are concurrent-safe, writes only occur during registration.
pub struct SportRegistry {
    sports: RwLock<HashMap<String, Arc<dyn SportModule>>>,
}

impl SportRegistry {
    pub fn new() -> Self {
        Self {
            sports: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, module: Arc<dyn SportModule>) -> Result<(), RegistryError> {
        let key = module.sport_key().to_string();
        let mut sports = self.sports.write().unwrap_or_else(|e| e.into_inner());
        if sports.contains_key(&key) {
            return Err(RegistryError::DuplicateSport(key));
        }
        sports.insert(key, module);
        Ok(())
    }

    pub fn get(&self, sport_key: &str) -> Option<Arc<dyn SportModule>> {
        self.sports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(sport_key)
            .cloned()
    }

    /// All registered modules, sorted by sport key so worker spawn
    /// order is deterministic.
    pub fn all(&self) -> Vec<Arc<dyn SportModule>> {
        let sports = self.sports.read().unwrap_or_else(|e| e.into_inner());
        let mut modules: Vec<_> = sports.values().cloned().collect();
        modules.sort_by_key(|m| m.sport_key());
        modules
    }

    pub fn len(&self) -> usize {
        self.sports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sports;

    #[test]
    fn test_register_defaults() {
        let registry = SportRegistry::new();
        sports::register_defaults(&registry).unwrap();
        assert!(registry.len() >= 4);
        assert!(registry.get("basketball_nba").is_some());
        assert!(registry.get("curling_mixed_doubles").is_none());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = SportRegistry::new();
        sports::register_defaults(&registry).unwrap();
        let err = registry
            .register(Arc::new(crate::sports::basketball_nba::BasketballNba))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSport(k) if k == "basketball_nba"));
    }

    #[test]
    fn test_all_is_sorted_by_key() {
        let registry = SportRegistry::new();
        sports::register_defaults(&registry).unwrap();
        let keys: Vec<_> = registry.all().iter().map(|m| m.sport_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
