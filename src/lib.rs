//! # Oddsflow
//!
//! A high-performance Rust library for real-time multi-sport odds
//! ingestion. Oddsflow polls vendor APIs per sport, detects which
//! quotes moved since the last observation, archives the changes
//! transactionally, and publishes them onto Redis Streams for
//! downstream consumers.
//!
//! ## Overview
//!
//! The pipeline for one poll tick of a sport:
//!
//! fetch (vendor adapter) -> detect (delta engine, cache-backed) ->
//! write (transactional archive writer) -> publish (per-sport stream)
//! -> cache write-through.
//!
//! In parallel, the lifecycle tracker promotes events
//! `upcoming -> live -> completed` on wall-clock and captures closing
//! lines the moment an event goes live.
//!
//! ## Architecture
//!
//! ### Sport Layer
//! Compile-time sport modules (markets, regions, poll cadences,
//! validation) registered into a process-wide registry; the scheduler
//! is polymorphic over the capability set.
//!
//! ### Detection Layer
//! One batched cache lookup per poll classifies every quote as
//! New/PriceOnly/PointOnly/Both/None; only changes proceed.
//!
//! ### Persistence Layer
//! The writer owns the archive: events and books are upserted, the
//! prior current row per identity is demoted, and new observations
//! land with `is_latest = true`, all in one transaction. Stream
//! publishing and page warming are post-commit and best-effort.

// Core Types
/// Common types and data structures
pub mod types;
/// Quote validation boundary
pub mod validator;

// Sport Layer
/// Process-wide sport registration
pub mod registry;
/// Trait for per-sport configuration modules
pub mod sport_module;
/// Concrete sport modules (NBA, NFL, MLB, NHL)
pub mod sports;

// Ingestion Layer
/// Cache-backed change detection
pub mod delta_engine;
/// Discovered-event tracking for props polling
pub mod props_discovery;
/// Per-sport polling orchestration
pub mod scheduler;
/// Vendor adapters (The Odds API)
pub mod vendor;

// Persistence & Publishing
/// Transactional archive writer
pub mod writer;
/// Redis Streams publisher
pub mod stream;
/// Event lifecycle tracking and closing-line capture
pub mod lifecycle;

// Infrastructure
/// PostgreSQL archive integration
pub mod database;
/// Metrics and observability
pub mod metrics;
/// Page-manager warm/close client
pub mod page_manager;
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use delta_engine::DeltaEngine;
pub use lifecycle::LifecycleTracker;
pub use registry::SportRegistry;
pub use scheduler::Scheduler;
pub use settings::Settings;
pub use sport_module::SportModule;
pub use writer::ArchiveWriter;
