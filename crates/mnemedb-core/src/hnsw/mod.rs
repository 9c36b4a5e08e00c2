//! HNSW (Hierarchical Navigable Small World) index implementation.
//!
//! This module provides approximate nearest-neighbor search over an
//! in-memory multilayer graph, with durable snapshots and timer-driven
//! maintenance.
//!
//! # Module Organization
//!
//! - `params`: index parameters and profiles
//! - `graph`: the graph core (arena, layers, best-first search)
//! - `index`: the public `HnswIndex` wrapper and its concurrency model
//! - `persistence`: versioned snapshot save/load
//! - `maintenance`: periodic persist/prune worker
//! - `rng`: seedable level-assignment PRNG

// ============================================================================
// Core modules
// ============================================================================
mod graph;
mod index;
mod maintenance;
mod ordered_float;
mod params;
mod persistence;
mod rng;


// ============================================================================
// Public API
// ============================================================================
pub use graph::{CompactReport, Metadata, NodeId, SearchHit, INSERTED_AT_KEY};
pub use index::{BatchSearchOptions, HnswIndex, IndexState, IndexStats, SearchOptions};
pub use maintenance::{MaintenanceConfig, MaintenanceHandle};
pub use params::HnswParams;
pub use persistence::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
