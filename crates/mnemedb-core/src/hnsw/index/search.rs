//! Query methods for `HnswIndex`.

use super::HnswIndex;
use crate::error::{Error, Result};
use crate::events::OpKind;
use crate::hnsw::graph::SearchHit;
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Per-query options for [`HnswIndex::search`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Candidate-list width override; defaults to the configured `ef_search`.
    pub ef: Option<usize>,
    /// Absolute deadline. When it passes mid-search the call returns
    /// [`Error::Canceled`] promptly (checked between candidate expansions).
    pub deadline: Option<Instant>,
}

/// Options for [`HnswIndex::search_batch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSearchOptions {
    /// Candidate-list width override applied to every query.
    pub ef: Option<usize>,
    /// Worker-pool width; defaults to the number of CPU cores.
    pub max_concurrency: Option<usize>,
    /// Per-query budget. A slot that exceeds it resolves to
    /// [`Error::Timeout`] without affecting its siblings.
    pub timeout: Option<Duration>,
}

impl HnswIndex {
    /// Returns the `k` nearest neighbors of `query`, ascending by distance
    /// (ties by lower id). An empty index yields an empty list, never an
    /// error.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] or [`Error::InvalidVector`] for a bad
    /// query against a non-empty index; [`Error::Canceled`] when the
    /// deadline trips.
    pub fn search(&self, query: &[f32], k: usize, options: SearchOptions) -> Result<Vec<SearchHit>> {
        let started = Instant::now();
        let result = {
            let core = self.core.read();
            let ef = options.ef.unwrap_or(core.params().ef_search);
            core.search(query, k, ef, options.deadline)
        };
        let items = result.as_ref().map_or(0, Vec::len);
        self.emit(OpKind::Search, started, result.is_ok(), items);
        result
    }

    /// Runs many independent queries concurrently on a bounded worker pool.
    ///
    /// Slots come back in input order regardless of completion order; a
    /// timed-out or failed slot carries its own error while the remaining
    /// slots still resolve. The call returns once every slot has resolved.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] only if the worker pool cannot be built;
    /// per-query failures stay inside their slot.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        options: BatchSearchOptions,
    ) -> Result<Vec<Result<Vec<SearchHit>>>> {
        let started = Instant::now();

        let run = || -> Vec<Result<Vec<SearchHit>>> {
            queries
                .par_iter()
                .map(|query| self.search_one_slot(query, k, &options))
                .collect()
        };

        let results = match options.max_concurrency {
            None => run(),
            Some(width) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(width.max(1))
                    .build()
                    .map_err(|e| Error::Internal(format!("worker pool: {e}")))?;
                pool.install(run)
            }
        };

        let items = results
            .iter()
            .map(|slot| slot.as_ref().map_or(0, Vec::len))
            .sum();
        self.emit(OpKind::SearchBatch, started, true, items);
        Ok(results)
    }

    /// One batch slot: per-query deadline, `Canceled` mapped to `Timeout`.
    #[allow(clippy::cast_possible_truncation)]
    fn search_one_slot(
        &self,
        query: &[f32],
        k: usize,
        options: &BatchSearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let slot_started = Instant::now();
        let deadline = options.timeout.map(|t| slot_started + t);

        let core = self.core.read();
        let ef = options.ef.unwrap_or(core.params().ef_search);
        core.search(query, k, ef, deadline).map_err(|e| match e {
            Error::Canceled => Error::Timeout {
                elapsed_ms: slot_started.elapsed().as_millis() as u64,
            },
            other => other,
        })
    }
}
