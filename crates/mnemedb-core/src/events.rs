//! Operation telemetry for the index.
//!
//! Every public index operation emits one [`OpEvent`] carrying its duration,
//! a result summary, and a snapshot of the parameters in force. Consumers
//! register observers through [`EventBus::subscribe`]; the surrounding
//! framework wires its metrics and alerting channels there without the index
//! knowing about them.

use crate::distance::DistanceMetric;
use std::sync::Arc;
use std::time::Duration;

/// The public operation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Single or batch insert.
    Insert,
    /// Single query.
    Search,
    /// Concurrent multi-query search.
    SearchBatch,
    /// Orphan removal and over-degree repair.
    Compact,
    /// Age-based deletion.
    Prune,
    /// Snapshot write.
    Persist,
    /// Snapshot load.
    Load,
}

impl OpKind {
    /// Lowercase name used in log records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Search => "search",
            Self::SearchBatch => "search_batch",
            Self::Compact => "compact",
            Self::Prune => "prune",
            Self::Persist => "persist",
            Self::Load => "load",
        }
    }
}

/// Immutable snapshot of the parameters in force when an event fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsSnapshot {
    /// Degree cap for layers >= 1.
    pub m: usize,
    /// Candidate width during construction.
    pub ef_construction: usize,
    /// Default candidate width during search.
    pub ef_search: usize,
    /// Configured metric.
    pub metric: DistanceMetric,
    /// Fixed dimension, if already determined.
    pub dimension: Option<usize>,
}

/// A single telemetry record.
#[derive(Debug, Clone)]
pub struct OpEvent {
    /// Which operation ran.
    pub op: OpKind,
    /// Wall-clock duration of the operation.
    pub duration: Duration,
    /// Result cardinality: nodes inserted, results returned, nodes removed,
    /// bytes written, depending on `op`.
    pub items: usize,
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Parameters in force when the event fired.
    pub params: ParamsSnapshot,
}

type Observer = Arc<dyn Fn(&OpEvent) + Send + Sync>;

/// Observer registry for [`OpEvent`]s.
///
/// Subscription is cheap; emission clones nothing and calls each observer
/// synchronously. Observers must not call back into the index.
pub struct EventBus {
    observers: parking_lot::RwLock<Vec<(u64, Observer)>>,
    next_token: std::sync::atomic::AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: parking_lot::RwLock::new(Vec::new()),
            next_token: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Registers an observer and returns a token for [`EventBus::unsubscribe`].
    pub fn subscribe<F>(&self, observer: F) -> u64
    where
        F: Fn(&OpEvent) + Send + Sync + 'static,
    {
        let token = self
            .next_token
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.observers.write().push((token, Arc::new(observer)));
        token
    }

    /// Removes a previously registered observer.
    ///
    /// Returns true if the token was found.
    pub fn unsubscribe(&self, token: u64) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(t, _)| *t != token);
        observers.len() != before
    }

    /// Emits an event to every observer and to the `tracing` layer.
    #[allow(clippy::cast_possible_truncation)]
    pub fn emit(&self, event: &OpEvent) {
        tracing::debug!(
            op = event.op.as_str(),
            duration_us = event.duration.as_micros() as u64,
            items = event.items,
            ok = event.ok,
            "index op"
        );
        for (_, observer) in self.observers.read().iter() {
            observer(event);
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}
