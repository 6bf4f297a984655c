//! Discovered-event tracking for props polling.
//!
//! Props markets are per-event: the discovery worker refreshes the set
//! of events worth polling from the vendor's event listing, and the
//! props poller drains the events whose cadence has elapsed. One
//! instance is shared per sport.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use std::collections::HashSet;
use std::time::Instant;

use crate::sport_module::SportModule;
use crate::types::{EventStatus, SportEvent};

/// Events that commenced longer ago than this fall out of tracking.
const LIVE_RETENTION_HOURS: f64 = 6.0;

#[derive(Debug, Clone)]
struct TrackedEvent {
    event: SportEvent,
    last_polled: Option<Instant>,
}

/// Shared set of events discovered for props polling.
pub struct DiscoveredEvents {
    events: DashMap<String, TrackedEvent>,
}

impl DiscoveredEvents {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    /// Replaces the tracked set with the listed events inside the
    /// discovery window. Poll bookkeeping survives for ids already
    /// tracked; events that fell out of the window are dropped.
    pub fn refresh(
        &self,
        listed: Vec<SportEvent>,
        window_hours: i64,
        now: DateTime<Utc>,
    ) -> usize {
        let in_window: Vec<SportEvent> = listed
            .into_iter()
            .filter(|e| {
                let hours = e.hours_to_commence(now);
                hours <= window_hours as f64 && hours >= -LIVE_RETENTION_HOURS
            })
            .collect();

        let keep: HashSet<&str> = in_window.iter().map(|e| e.event_id.as_str()).collect();
        self.events.retain(|id, _| keep.contains(id.as_str()));

        for event in in_window {
            match self.events.entry(event.event_id.clone()) {
                Entry::Occupied(mut occupied) => {
                    // Vendor is authoritative for commence time and teams.
                    occupied.get_mut().event = event;
                }
                Entry::Vacant(vacant) => {
                    debug!("tracking {} for props polling", event.event_id);
                    vacant.insert(TrackedEvent {
                        event,
                        last_polled: None,
                    });
                }
            }
        }

        self.events.len()
    }

    /// Events whose props cadence has elapsed per the sport's ramp.
    /// Never-polled events are always due.
    pub fn due_events(&self, sport: &dyn SportModule, now: DateTime<Utc>) -> Vec<SportEvent> {
        self.events
            .iter()
            .filter_map(|entry| {
                let tracked = entry.value();
                let hours = tracked.event.hours_to_commence(now);
                let is_live = tracked.event.status == EventStatus::Live || hours < 0.0;
                let cadence = sport.props_interval(hours.max(0.0), is_live);
                let due = tracked
                    .last_polled
                    .map(|at| at.elapsed() >= cadence)
                    .unwrap_or(true);
                due.then(|| tracked.event.clone())
            })
            .collect()
    }

    pub fn mark_polled(&self, event_id: &str) {
        if let Some(mut tracked) = self.events.get_mut(event_id) {
            tracked.last_polled = Some(Instant::now());
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for DiscoveredEvents {
    fn default() -> Self {
        Self::new()
    }
}
