//! Timer-driven background maintenance.
//!
//! Periodic persistence and age-based pruning run on a dedicated worker
//! thread fed by `crossbeam_channel` tickers. Each firing is a single-shot
//! task: the worker never holds an index lock across a wait. Shutdown is
//! two-phase: the tickers stop first, then a final snapshot is flushed
//! before the worker is released.

use super::index::HnswIndex;
use crossbeam_channel::{bounded, never, select, tick, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Schedule for the background worker. Any `None` interval disables that
/// activity.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceConfig {
    /// How often to write a snapshot.
    pub persist_interval: Option<Duration>,
    /// Snapshot target; falls back to the index's configured persist path.
    pub persist_path: Option<PathBuf>,
    /// How often to run age-based pruning.
    pub prune_interval: Option<Duration>,
    /// Age cutoff handed to `prune_by_age` on each prune tick.
    pub prune_max_age: Option<Duration>,
}

/// Handle to a running maintenance worker.
///
/// Dropping the handle stops the worker without a final snapshot; call
/// [`MaintenanceHandle::shutdown`] for the flushing stop.
pub struct MaintenanceHandle {
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
    index: Arc<HnswIndex>,
    persist_path: Option<PathBuf>,
}

impl std::fmt::Debug for MaintenanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceHandle")
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl MaintenanceHandle {
    /// Spawns the worker thread for `index` under `config`.
    #[must_use]
    pub fn spawn(index: Arc<HnswIndex>, config: MaintenanceConfig) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker_index = Arc::clone(&index);
        let persist_path = config.persist_path.clone();

        let worker = std::thread::Builder::new()
            .name("mnemedb-maintenance".into())
            .spawn(move || {
                let persist_tick = config
                    .persist_interval
                    .map_or_else(never, tick);
                let prune_tick = config.prune_interval.map_or_else(never, tick);

                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(persist_tick) -> _ => {
                            let path = config.persist_path.as_deref();
                            if let Err(e) = worker_index.persist(path) {
                                tracing::warn!(error = %e, "periodic persist failed");
                            }
                        }
                        recv(prune_tick) -> _ => {
                            if let Some(max_age) = config.prune_max_age {
                                let removed = worker_index.prune_by_age(max_age);
                                if removed > 0 {
                                    tracing::debug!(removed, "periodic prune");
                                }
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn maintenance thread");

        Self {
            stop_tx,
            worker: Some(worker),
            index,
            persist_path,
        }
    }

    /// Stops the worker and flushes a final snapshot.
    ///
    /// Phase one cancels the timers so no further maintenance writes start;
    /// phase two joins the worker and writes the closing snapshot once all
    /// in-flight operations have drained through the index locks.
    ///
    /// # Errors
    ///
    /// Propagates the final persist failure. No snapshot is attempted when
    /// neither the schedule nor the index carries a persist path.
    pub fn shutdown(mut self) -> crate::error::Result<()> {
        self.signal_stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let path = self.persist_path.as_deref();
        if path.is_some() || self.index.persist_path.is_some() {
            self.index.persist(path)?;
        }
        Ok(())
    }

    fn signal_stop(&self) {
        let _ = self.stop_tx.try_send(());
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
