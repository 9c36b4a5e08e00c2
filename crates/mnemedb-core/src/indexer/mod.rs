//! Buffered pattern ingestion.
//!
//! The [`PatternIndexer`] sits between the detection pipeline and the HNSW
//! index: it drops records below the confidence floor, encodes the rest into
//! unit vectors, and batches inserts. A buffer flushes when it reaches
//! `batch_size`, when the flush timer fires `batch_timeout` after the first
//! record entered an empty buffer, or on an explicit [`PatternIndexer::flush`].
//!
//! # Module Organization
//!
//! - `pattern`: the ingested domain record
//! - `encoder`: deterministic record-to-vector encoding

mod encoder;
mod pattern;

#[cfg(test)]
mod encoder_tests;

pub use encoder::{PatternEncoder, DEFAULT_DIMENSION};
pub use pattern::Pattern;

use crate::error::{Error, Result};
use crate::hnsw::{
    HnswIndex, IndexStats, Metadata, SearchHit, SearchOptions, INSERTED_AT_KEY,
};
use crossbeam_channel::{after, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ingestion configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Records with confidence below this floor (or without one) are dropped.
    pub confidence_floor: f32,
    /// Encoder output dimension.
    pub dimension: usize,
    /// Buffer size that triggers an immediate flush.
    pub batch_size: usize,
    /// Flush deadline counted from the first record entering an empty buffer.
    pub batch_timeout: Duration,
    /// Hard bound on the buffer; reaching it forces a flush before admission.
    pub buffer_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.7,
            dimension: DEFAULT_DIMENSION,
            batch_size: 100,
            batch_timeout: Duration::from_secs(5),
            buffer_capacity: 10_000,
        }
    }
}

impl IndexerConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(Error::Config(format!(
                "confidence_floor must be in [0, 1], got {}",
                self.confidence_floor
            )));
        }
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be >= 1".into()));
        }
        if self.buffer_capacity < self.batch_size {
            return Err(Error::Config(format!(
                "buffer_capacity {} is below batch_size {}",
                self.buffer_capacity, self.batch_size
            )));
        }
        Ok(())
    }
}

/// Admission verdict for a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Buffered for the next flush.
    Accepted,
    /// Dropped before vectorization.
    Rejected,
}

/// Admission counts for a batch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchAdmission {
    /// Records buffered.
    pub accepted: usize,
    /// Records dropped by the confidence filter.
    pub rejected: usize,
}

/// Ingestion statistics.
#[derive(Debug, Clone)]
pub struct IndexerStats {
    /// Records currently buffered.
    pub buffer_size: usize,
    /// Records successfully inserted into the index.
    pub indexed: u64,
    /// Records dropped (confidence filter or insert failure).
    pub rejected: u64,
    /// Non-empty flushes performed.
    pub flushes: u64,
    /// Statistics of the underlying index.
    pub index_stats: IndexStats,
}

enum TimerCmd {
    Arm,
    Cancel,
    Shutdown,
}

struct Inner {
    index: Arc<HnswIndex>,
    encoder: PatternEncoder,
    config: IndexerConfig,
    buffer: Mutex<VecDeque<Pattern>>,
    indexed: AtomicU64,
    rejected: AtomicU64,
    flushes: AtomicU64,
    timer_tx: Sender<TimerCmd>,
}

impl Inner {
    /// Drains the buffer, encodes, and batch-inserts. Returns the number of
    /// records that made it into the index.
    fn flush(&self) -> usize {
        // Cancel before draining so an Arm sent by a concurrent producer
        // cannot be swallowed by this flush's cancellation.
        let _ = self.timer_tx.send(TimerCmd::Cancel);

        let drained: Vec<Pattern> = {
            let mut buffer = self.buffer.lock();
            buffer.drain(..).collect()
        };
        if drained.is_empty() {
            return 0;
        }

        let now = unix_now();
        let items: Vec<(Vec<f32>, Metadata)> = drained
            .iter()
            .map(|p| (self.encoder.encode(p), stored_metadata(p, now)))
            .collect();

        let results = self.index.batch_insert(items);
        let mut inserted = 0_u64;
        for result in &results {
            match result {
                Ok(_) => inserted += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "pattern insert rejected during flush");
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.indexed.fetch_add(inserted, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        usize::try_from(inserted).unwrap_or(usize::MAX)
    }
}

/// Buffered, confidence-filtered ingestion adapter in front of a shared
/// [`HnswIndex`].
pub struct PatternIndexer {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PatternIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternIndexer")
            .field("buffer_size", &self.inner.buffer.lock().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl PatternIndexer {
    /// Creates an indexer in front of `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is inconsistent.
    pub fn new(index: Arc<HnswIndex>, config: IndexerConfig) -> Result<Self> {
        config.validate()?;
        let (timer_tx, timer_rx) = unbounded();

        let inner = Arc::new(Inner {
            index,
            encoder: PatternEncoder::new(config.dimension),
            buffer: Mutex::new(VecDeque::with_capacity(config.batch_size)),
            indexed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            timer_tx,
            config,
        });

        let timeout = inner.config.batch_timeout;
        let weak = Arc::downgrade(&inner);
        let worker = std::thread::Builder::new()
            .name("mnemedb-flush-timer".into())
            .spawn(move || timer_worker(&weak, &timer_rx, timeout))
            .map_err(|e| Error::Internal(format!("flush timer spawn: {e}")))?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    /// Admits or rejects a single record.
    ///
    /// Accepted records are buffered; the actual insert happens at the next
    /// flush. A full buffer is flushed inline before admission.
    pub fn index(&self, pattern: Pattern) -> IndexOutcome {
        let floor = self.inner.config.confidence_floor;
        if !pattern.confidence.is_some_and(|c| c >= floor) {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            return IndexOutcome::Rejected;
        }

        let mut pending = Some(pattern);
        loop {
            enum Push {
                Full,
                FlushNow,
                ArmTimer,
                Done,
            }

            let decision = {
                let mut buffer = self.inner.buffer.lock();
                if buffer.len() >= self.inner.config.buffer_capacity {
                    Push::Full
                } else {
                    let was_empty = buffer.is_empty();
                    if let Some(p) = pending.take() {
                        buffer.push_back(p);
                    }
                    if buffer.len() >= self.inner.config.batch_size {
                        Push::FlushNow
                    } else if was_empty {
                        Push::ArmTimer
                    } else {
                        Push::Done
                    }
                }
            };

            match decision {
                Push::Full => {
                    self.inner.flush();
                }
                Push::FlushNow => {
                    self.inner.flush();
                    return IndexOutcome::Accepted;
                }
                Push::ArmTimer => {
                    let _ = self.inner.timer_tx.send(TimerCmd::Arm);
                    return IndexOutcome::Accepted;
                }
                Push::Done => return IndexOutcome::Accepted,
            }
        }
    }

    /// Admits a batch of records, returning the admission counts.
    pub fn index_batch(&self, patterns: Vec<Pattern>) -> BatchAdmission {
        let mut admission = BatchAdmission::default();
        for pattern in patterns {
            match self.index(pattern) {
                IndexOutcome::Accepted => admission.accepted += 1,
                IndexOutcome::Rejected => admission.rejected += 1,
            }
        }
        admission
    }

    /// Encodes `pattern` and searches the index for its nearest neighbors.
    ///
    /// Buffered records are not searchable until flushed.
    ///
    /// # Errors
    ///
    /// Propagates index search errors.
    pub fn find_similar(&self, pattern: &Pattern, k: usize) -> Result<Vec<SearchHit>> {
        let query = self.inner.encoder.encode(pattern);
        self.search_vector(&query, k)
    }

    /// Searches the index with a raw query vector.
    ///
    /// # Errors
    ///
    /// Propagates index search errors.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.inner
            .index
            .search(query, k, SearchOptions::default())
    }

    /// Flushes the buffer now. Returns the number of records inserted.
    pub fn flush(&self) -> usize {
        self.inner.flush()
    }

    /// Current ingestion statistics.
    #[must_use]
    pub fn stats(&self) -> IndexerStats {
        IndexerStats {
            buffer_size: self.inner.buffer.lock().len(),
            indexed: self.inner.indexed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            index_stats: self.inner.index.stats(),
        }
    }

    /// The shared index behind this indexer.
    #[must_use]
    pub fn hnsw(&self) -> &Arc<HnswIndex> {
        &self.inner.index
    }

    /// Flushes outstanding records and stops the flush timer.
    pub fn close(mut self) -> usize {
        let flushed = self.inner.flush();
        self.stop_worker();
        flushed
    }

    fn stop_worker(&mut self) {
        let _ = self.inner.timer_tx.send(TimerCmd::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PatternIndexer {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn timer_worker(inner: &Weak<Inner>, rx: &Receiver<TimerCmd>, timeout: Duration) {
    'idle: loop {
        match rx.recv() {
            Err(_) | Ok(TimerCmd::Shutdown) => break,
            Ok(TimerCmd::Cancel) => {}
            Ok(TimerCmd::Arm) => {
                let fire = after(timeout);
                loop {
                    select! {
                        recv(rx) -> cmd => match cmd {
                            Err(_) | Ok(TimerCmd::Shutdown) => break 'idle,
                            Ok(TimerCmd::Cancel) => continue 'idle,
                            Ok(TimerCmd::Arm) => {}
                        },
                        recv(fire) -> _ => {
                            if let Some(inner) = inner.upgrade() {
                                inner.flush();
                            }
                            continue 'idle;
                        }
                    }
                }
            }
        }
    }
}

/// Metadata stored alongside an encoded pattern. The reserved
/// `inserted_at` key drives age-based pruning.
fn stored_metadata(pattern: &Pattern, now: u64) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("pattern_kind".into(), json!(pattern.kind));
    if let Some(id) = &pattern.id {
        metadata.insert("pattern_id".into(), json!(id));
    }
    if let Some(confidence) = pattern.confidence {
        metadata.insert("confidence".into(), json!(confidence));
    }
    if !pattern.description.is_empty() {
        metadata.insert("description".into(), json!(pattern.description));
    }
    if !pattern.tags.is_empty() {
        metadata.insert("tags".into(), json!(pattern.tags));
    }
    if !pattern.metrics.is_empty() {
        metadata.insert("metrics".into(), json!(pattern.metrics));
    }
    if let Some(detected_at) = pattern.detected_at {
        metadata.insert("detected_at".into(), json!(detected_at));
    }
    metadata.insert(INSERTED_AT_KEY.into(), json!(now));
    metadata
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
