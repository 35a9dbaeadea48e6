//! Debounced serialize-and-store of the sketch layer.
//!
//! Mutation notifications arrive in bursts (every vertex drag fires one).
//! A background task restarts its timer on each notification and only
//! serializes once the layer has been quiet for the configured delay. The
//! layer is read when the timer fires, so the stored document always reflects
//! the latest in-memory state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::document::DocumentSerializer;
use crate::projection::Projection;
use crate::storage::{DocumentStorage, StoreResult};
use crate::vector::SharedLayer;

/// Default quiet period before a burst of mutations is persisted.
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(1000);

/// Timing and projection settings for the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Quiet period after the last mutation.
    pub delay: Duration,
    /// Projection the layer's coordinates are in.
    pub source_projection: Projection,
    /// Projection written to the document.
    pub target_projection: Projection,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_SAVE_DELAY,
            source_projection: Projection::WebMercator,
            target_projection: Projection::Wgs84,
        }
    }
}

enum Signal {
    Mutated,
    Flush(oneshot::Sender<()>),
}

/// Coalesces mutation notifications into single store operations.
///
/// Dropping the debouncer stops the task; a pending burst is persisted first.
#[derive(Debug)]
pub struct PersistenceDebouncer {
    signals: mpsc::UnboundedSender<Signal>,
    last_result: watch::Receiver<Option<StoreResult>>,
    task: JoinHandle<()>,
}

struct Worker {
    layer: SharedLayer,
    serializer: Arc<dyn DocumentSerializer>,
    storage: Arc<dyn DocumentStorage>,
    config: PersistenceConfig,
    last_result: watch::Sender<Option<StoreResult>>,
}

impl PersistenceDebouncer {
    /// Spawn the persistence task on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        layer: SharedLayer,
        serializer: Arc<dyn DocumentSerializer>,
        storage: Arc<dyn DocumentStorage>,
        config: PersistenceConfig,
    ) -> Self {
        let (signals, rx) = mpsc::unbounded_channel();
        let (result_tx, last_result) = watch::channel(None);
        let worker = Worker {
            layer,
            serializer,
            storage,
            config,
            last_result: result_tx,
        };
        let task = tokio::spawn(worker.run(rx));
        Self {
            signals,
            last_result,
            task,
        }
    }

    /// Record that the layer changed.
    pub fn notify_mutated(&self) {
        if self.signals.send(Signal::Mutated).is_err() {
            tracing::warn!("persistence task is gone, mutation not saved");
        }
    }

    /// Persist a pending burst now and wait for the store to finish.
    ///
    /// Does nothing if no mutation is pending.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.signals.send(Signal::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Ids returned by the most recent successful store.
    #[must_use]
    pub fn last_result(&self) -> Option<StoreResult> {
        self.last_result.borrow().clone()
    }

    /// Stop accepting notifications, persist a pending burst and wait for the task.
    pub async fn shutdown(self) {
        let Self { signals, task, .. } = self;
        drop(signals);
        if let Err(e) = task.await {
            tracing::warn!("persistence task ended abnormally: {e}");
        }
    }
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = rx.recv().await {
            let ack = match signal {
                Signal::Flush(ack) => {
                    // nothing pending
                    let _ = ack.send(());
                    continue;
                }
                Signal::Mutated => self.wait_for_quiet(&mut rx).await,
            };
            self.save().await;
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        tracing::debug!("persistence task stopped");
    }

    /// Wait until no mutation arrived for a full delay.
    ///
    /// Returns the flush acknowledgement if a flush cut the wait short.
    async fn wait_for_quiet(&self, rx: &mut mpsc::UnboundedReceiver<Signal>) -> Option<oneshot::Sender<()>> {
        let sleep = tokio::time::sleep(self.config.delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return None,
                signal = rx.recv() => match signal {
                    Some(Signal::Mutated) => {
                        sleep.as_mut().reset(tokio::time::Instant::now() + self.config.delay);
                    }
                    Some(Signal::Flush(ack)) => return Some(ack),
                    // sender dropped: persist what is pending
                    None => return None,
                },
            }
        }
    }

    async fn save(&self) {
        let document = {
            let layer = self.layer.read();
            self.serializer.serialize(
                &layer,
                self.config.source_projection,
                self.config.target_projection,
            )
        };
        let Some(document) = document else {
            tracing::debug!("nothing to persist");
            return;
        };
        match self.storage.store(&document, self.serializer.document_type()).await {
            Ok(Some(result)) => {
                tracing::info!(file_id = %result.file_id, "sketch persisted");
                self.last_result.send_replace(Some(result));
            }
            Ok(None) => tracing::debug!("storage declined the document"),
            Err(e) => tracing::warn!("Failed to persist sketch: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::GeoJsonSerializer;
    use crate::geometry::{Coordinate, Feature, Geometry};
    use crate::storage::MemoryDocumentStorage;
    use crate::vector::VectorLayer;

    fn planar(delay_ms: u64) -> PersistenceConfig {
        PersistenceConfig {
            delay: Duration::from_millis(delay_ms),
            source_projection: Projection::Planar,
            target_projection: Projection::Planar,
        }
    }

    fn point(x: f64) -> Feature {
        Feature::new(Geometry::Point(Coordinate::new(x, 0.0)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_stored_once_with_latest_state() {
        let layer = SharedLayer::new(VectorLayer::new("sketch"));
        let storage = Arc::new(MemoryDocumentStorage::new());
        let debouncer = PersistenceDebouncer::spawn(
            layer.clone(),
            Arc::new(GeoJsonSerializer),
            storage.clone(),
            planar(1000),
        );

        let start = tokio::time::Instant::now();
        for i in 0..5 {
            layer.write().upsert(point(f64::from(i)));
            debouncer.notify_mutated();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // last mutation happened at t=400ms
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(storage.store_count(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let history = storage.history();
        assert_eq!(history.len(), 1);
        let fired_after = history[0].at - start;
        assert!(fired_after >= Duration::from_millis(1400), "fired at {fired_after:?}");
        assert!(fired_after <= Duration::from_millis(1410), "fired at {fired_after:?}");
        assert!(history[0].document.contains("[4.0,0.0]"));
        assert!(debouncer.last_result().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_layer_makes_no_store_call() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let debouncer = PersistenceDebouncer::spawn(
            SharedLayer::new(VectorLayer::new("sketch")),
            Arc::new(GeoJsonSerializer),
            storage.clone(),
            planar(1000),
        );
        debouncer.notify_mutated();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(storage.store_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_persists_immediately() {
        let layer = SharedLayer::new(VectorLayer::new("sketch"));
        let storage = Arc::new(MemoryDocumentStorage::new());
        let debouncer = PersistenceDebouncer::spawn(
            layer.clone(),
            Arc::new(GeoJsonSerializer),
            storage.clone(),
            planar(60_000),
        );
        layer.write().upsert(point(1.0));
        debouncer.notify_mutated();
        debouncer.flush().await;
        assert_eq!(storage.store_count(), 1);

        // nothing pending any more
        debouncer.flush().await;
        assert_eq!(storage.store_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_store_separately() {
        let layer = SharedLayer::new(VectorLayer::new("sketch"));
        let storage = Arc::new(MemoryDocumentStorage::new());
        let debouncer = PersistenceDebouncer::spawn(
            layer.clone(),
            Arc::new(GeoJsonSerializer),
            storage.clone(),
            planar(0),
        );
        layer.write().upsert(point(1.0));
        debouncer.notify_mutated();
        tokio::time::sleep(Duration::from_millis(10)).await;
        layer.write().upsert(point(2.0));
        debouncer.notify_mutated();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(storage.store_count(), 2);

        debouncer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_persists_pending_burst() {
        let layer = SharedLayer::new(VectorLayer::new("sketch"));
        let storage = Arc::new(MemoryDocumentStorage::new());
        let debouncer = PersistenceDebouncer::spawn(
            layer.clone(),
            Arc::new(GeoJsonSerializer),
            storage.clone(),
            planar(1000),
        );
        layer.write().upsert(point(1.0));
        debouncer.notify_mutated();
        debouncer.shutdown().await;
        assert_eq!(storage.store_count(), 1);
    }
}
