//! # `MnemeDB` Core
//!
//! Pattern memory engine: an in-memory HNSW approximate nearest-neighbor
//! index with durable snapshots, time-based retention, and a buffered
//! pattern-ingestion adapter.
//!
//! ## Features
//!
//! - **Native HNSW**: multilayer graph with deterministic construction
//!   under a fixed seed, coarse reader-writer locking, and per-query
//!   deadlines
//! - **Durable snapshots**: versioned binary format written atomically,
//!   with in-memory upgrade of older versions
//! - **Retention**: age-based pruning driven by the reserved `inserted_at`
//!   metadata key, plus orphan-removing compaction
//! - **Ingestion**: confidence-filtered, batched pattern indexing with a
//!   deterministic unit-vector encoder
//!
//! ## Quick Start
//!
//! ```rust
//! use mnemedb_core::{DistanceMetric, HnswIndex, HnswParams, Metadata, SearchOptions};
//!
//! let index = HnswIndex::new(HnswParams::new(DistanceMetric::Cosine))?;
//! let id = index.insert(vec![1.0, 0.0, 0.0], Metadata::new())?;
//!
//! let hits = index.search(&[1.0, 0.0, 0.0], 1, SearchOptions::default())?;
//! assert_eq!(hits[0].node_id, id);
//! # Ok::<(), mnemedb_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod distance;
pub mod error;
pub mod events;
pub mod hnsw;
pub mod indexer;

#[cfg(test)]
mod events_tests;

pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use events::{EventBus, OpEvent, OpKind, ParamsSnapshot};
pub use hnsw::{
    BatchSearchOptions, CompactReport, HnswIndex, HnswParams, IndexState, IndexStats,
    MaintenanceConfig, MaintenanceHandle, Metadata, NodeId, SearchHit, SearchOptions,
    INSERTED_AT_KEY,
};
pub use indexer::{
    BatchAdmission, IndexOutcome, IndexerConfig, IndexerStats, Pattern, PatternEncoder,
    PatternIndexer,
};
