//! Public HNSW index.
//!
//! `HnswIndex` wraps the graph core behind a single coarse
//! `parking_lot::RwLock`: insert, prune, compact, and load serialize on the
//! write lock; searches share the read lock and run fully in parallel. An
//! insert that has returned is therefore visible to every search that starts
//! afterwards, and no reader can ever observe a half-linked node.
//!
//! # Module Organization
//!
//! - `mod`: construction, insert, stats, lifecycle state
//! - `search`: single and batch queries
//! - `vacuum`: compaction and age-based pruning

mod search;
mod vacuum;

pub use search::{BatchSearchOptions, SearchOptions};

use super::graph::{GraphCore, Metadata, NodeId};
use super::params::HnswParams;
use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::events::{EventBus, OpEvent, OpKind, ParamsSnapshot};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

/// Lifecycle state of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexState {
    /// No live nodes. Accepts insert, search (returns empty), persist.
    Empty = 0,
    /// Normal operation.
    Active = 1,
    /// A compaction pass is running; reads are still served.
    Compacting = 2,
    /// A snapshot is being written; reads are still served.
    Persisting = 3,
}

impl From<u8> for IndexState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::Compacting,
            3 => Self::Persisting,
            _ => Self::Empty,
        }
    }
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    /// Live node count.
    pub count: usize,
    /// Current entry point, if any.
    pub entry_point: Option<NodeId>,
    /// Fixed dimension, once determined.
    pub dimension: Option<usize>,
    /// Degree cap for layers >= 1.
    pub m: usize,
    /// Default search width.
    pub ef_search: usize,
    /// Configured metric.
    pub metric: DistanceMetric,
    /// Estimated resident bytes (vectors + adjacency + bookkeeping).
    pub memory_estimate: usize,
    /// Lifecycle state at the time of the call.
    pub state: IndexState,
}

/// Approximate nearest-neighbor index over float vectors.
pub struct HnswIndex {
    pub(crate) core: RwLock<GraphCore>,
    pub(crate) state: AtomicU8,
    pub(crate) persist_guard: AtomicBool,
    pub(crate) events: EventBus,
    pub(crate) persist_path: Option<PathBuf>,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.read();
        f.debug_struct("HnswIndex")
            .field("count", &core.len())
            .field("params", core.params())
            .field("state", &self.state())
            .finish()
    }
}

impl HnswIndex {
    /// Creates an empty index.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the parameters fail validation
    /// (`m >= 2`, both ef values `>= 1`).
    pub fn new(params: HnswParams) -> Result<Self> {
        Self::with_seed(params, 0x9E37_79B9_7F4A_7C15)
    }

    /// Creates an empty index with a fixed level-assignment seed.
    ///
    /// Identical seeds and identical insert sequences build identical
    /// graphs, which tests rely on.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the parameters fail validation.
    pub fn with_seed(params: HnswParams, seed: u64) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            core: RwLock::new(GraphCore::new(params, seed)),
            state: AtomicU8::new(IndexState::Empty as u8),
            persist_guard: AtomicBool::new(false),
            events: EventBus::new(),
            persist_path: None,
        })
    }

    /// Sets the default snapshot path used by `persist(None)`.
    #[must_use]
    pub fn with_persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    /// Rebuilds an index from already-validated parts (snapshot loading).
    pub(crate) fn from_core(core: GraphCore) -> Self {
        let state = if core.is_empty() {
            IndexState::Empty
        } else {
            IndexState::Active
        };
        Self {
            core: RwLock::new(core),
            state: AtomicU8::new(state as u8),
            persist_guard: AtomicBool::new(false),
            events: EventBus::new(),
            persist_path: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        IndexState::from(self.state.load(Ordering::Acquire))
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.read().len()
    }

    /// True when the index holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.read().is_empty()
    }

    /// The telemetry bus for this index.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Inserts a vector with metadata and returns the assigned id.
    ///
    /// The first successful insert fixes the index dimension unless the
    /// configuration declared one.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch`, `InvalidVector`, or `CapacityExceeded`; the
    /// index is unchanged on error.
    pub fn insert(&self, vector: Vec<f32>, metadata: Metadata) -> Result<NodeId> {
        let started = Instant::now();
        let result = {
            let mut core = self.core.write();
            core.insert(vector, metadata)
        };
        if result.is_ok() {
            self.state
                .store(IndexState::Active as u8, Ordering::Release);
        }
        self.emit(OpKind::Insert, started, result.is_ok(), usize::from(result.is_ok()));
        result
    }

    /// Inserts a batch, returning one result per input in input order.
    ///
    /// Best-effort: a rejected slot does not abort the rest. All slots are
    /// processed under a single write-lock acquisition.
    pub fn batch_insert(
        &self,
        items: Vec<(Vec<f32>, Metadata)>,
    ) -> Vec<Result<NodeId>> {
        let started = Instant::now();
        let results: Vec<Result<NodeId>> = {
            let mut core = self.core.write();
            items
                .into_iter()
                .map(|(vector, metadata)| core.insert(vector, metadata))
                .collect()
        };
        let inserted = results.iter().filter(|r| r.is_ok()).count();
        if inserted > 0 {
            self.state
                .store(IndexState::Active as u8, Ordering::Release);
        }
        self.emit(OpKind::Insert, started, true, inserted);
        results
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let core = self.core.read();
        let params = core.params();
        IndexStats {
            count: core.len(),
            entry_point: core.entry_point(),
            dimension: core.dimension(),
            m: params.m,
            ef_search: params.ef_search,
            metric: params.metric,
            memory_estimate: core.memory_estimate(),
            state: self.state(),
        }
    }

    /// Validates every structural invariant of the graph.
    ///
    /// Intended for tests and post-load verification; walks the whole graph.
    ///
    /// # Errors
    ///
    /// Returns an internal error describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        self.core.read().validate_invariants()
    }

    pub(crate) fn params_snapshot(&self) -> ParamsSnapshot {
        let core = self.core.read();
        let params = core.params();
        ParamsSnapshot {
            m: params.m,
            ef_construction: params.ef_construction,
            ef_search: params.ef_search,
            metric: params.metric,
            dimension: core.dimension(),
        }
    }

    pub(crate) fn emit(&self, op: OpKind, started: Instant, ok: bool, items: usize) {
        self.events.emit(&OpEvent {
            op,
            duration: started.elapsed(),
            items,
            ok,
            params: self.params_snapshot(),
        });
    }

    /// Restores Empty/Active according to the current node count.
    pub(crate) fn settle_state(&self) {
        let state = if self.core.read().is_empty() {
            IndexState::Empty
        } else {
            IndexState::Active
        };
        self.state.store(state as u8, Ordering::Release);
    }
}
