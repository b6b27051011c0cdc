//! Background flush/refresh task.

use super::state::CoalescedCore;
use concord_core::{CoalescingConfig, ConfigError};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Owns the pump task and its shutdown signal.
pub(crate) struct Pump {
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Pump {
    /// Spawn the pump on the current tokio runtime. Fails outside one.
    pub(crate) fn spawn<V>(core: Arc<CoalescedCore<V>>, config: CoalescingConfig) -> Result<Self, ConfigError>
    where
        V: Clone + Send + Sync + 'static,
    {
        let handle = Handle::try_current().map_err(|e| ConfigError::Invalid {
            field: "runtime".to_string(),
            value: "none".to_string(),
            reason: e.to_string(),
        })?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = handle.spawn(run(core, config, shutdown_rx));
        Ok(Self {
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Signal the pump and wait for it to exit. Later calls return at once.
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Coalescing pump exited abnormally");
            }
        }
    }
}

/// Alternate between flush and refresh until told to stop. Flush and refresh
/// never overlap on one instance. The stop arm drains the buffer once more
/// before returning.
async fn run<V>(core: Arc<CoalescedCore<V>>, config: CoalescingConfig, mut shutdown_rx: watch::Receiver<bool>)
where
    V: Clone + Send + Sync + 'static,
{
    let start = Instant::now();
    let mut flush_interval = interval_at(start + config.flush_interval, config.flush_interval);
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut refresh_interval = interval_at(start + config.refresh_interval, config.refresh_interval);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let namespace = core.keyspace().namespace().to_string();
    tracing::info!(
        namespace = %namespace,
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        refresh_interval_ms = config.refresh_interval.as_millis() as u64,
        "Coalescing pump started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!(namespace = %namespace, "Coalescing pump shutting down");
                    break;
                }
            }

            _ = flush_interval.tick() => {
                core.flush().await;
            }

            _ = refresh_interval.tick() => {
                core.refresh().await;
            }
        }
    }

    core.flush().await;

    let snapshot = core.stats.snapshot();
    tracing::info!(
        namespace = %namespace,
        flushes = snapshot.flushes,
        flushed_writes = snapshot.flushed_writes,
        flushed_deletes = snapshot.flushed_deletes,
        refreshes = snapshot.refreshes,
        refresh_evictions = snapshot.refresh_evictions,
        errors = snapshot.errors,
        "Coalescing pump stopped"
    );
}
