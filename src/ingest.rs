//! Bounded ingest channel from Collectors into the Telemetry Store.
//!
//! Spec Design Note (spec.md §9): "Background workers communicating via
//! shared mutable store -> keep the single-writer daemon loop; Collectors
//! push samples through a bounded channel so that backpressure is observable
//! and does not stall the decision loop." A `Collector` (see `ports`) never
//! writes into `TelemetryStore` directly; it pushes through an `IngestHandle`
//! instead, and a single drain task applies the writes.

use tokio::sync::mpsc;

use crate::domain::{Event, Metrics};
use crate::telemetry::TelemetryStore;

enum IngestMessage {
    Sample { member: String, metrics: Metrics },
    Event(Event),
}

/// Raised when the bounded channel is saturated. The caller (a Collector
/// task) observes this directly rather than blocking; per spec.md §7 a
/// dropped sample is a transient, recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestFull;

impl std::fmt::Display for IngestFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ingest channel is full")
    }
}

impl std::error::Error for IngestFull {}

/// Cheap to clone: one handle per Collector task, all feeding the same
/// bounded channel.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestMessage>,
}

impl IngestHandle {
    /// Non-blocking. `Err(IngestFull)` means the channel is saturated; the
    /// caller drops the sample rather than stalling its own collection loop.
    pub fn try_push_sample(&self, member: impl Into<String>, metrics: Metrics) -> Result<(), IngestFull> {
        self.tx
            .try_send(IngestMessage::Sample { member: member.into(), metrics })
            .map_err(|_| IngestFull)
    }

    pub fn try_push_event(&self, event: Event) -> Result<(), IngestFull> {
        self.tx.try_send(IngestMessage::Event(event)).map_err(|_| IngestFull)
    }
}

/// Spawn the single task that drains the ingest channel into `store`,
/// applying writes in arrival order. Returns a cloneable handle for
/// Collectors plus the drain task's `JoinHandle`; drop every `IngestHandle`
/// clone to let the task observe channel closure and return.
pub fn spawn(store: TelemetryStore, capacity: usize) -> (IngestHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                IngestMessage::Sample { member, metrics } => store.add_sample(&member, metrics, None),
                IngestMessage::Event(event) => store.add_event(event),
            }
        }
    });
    (IngestHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryPolicy;

    #[test]
    fn try_push_sample_surfaces_backpressure_when_channel_is_full() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = IngestHandle { tx };
        assert!(handle.try_push_sample("sl", Metrics::default()).is_ok());
        assert!(handle.try_push_sample("sl", Metrics::default()).is_err());
    }

    #[tokio::test]
    async fn spawned_drain_task_writes_samples_into_the_store() {
        let store = TelemetryStore::new(TelemetryPolicy::default()).unwrap();
        let (handle, task) = spawn(store.clone(), 8);

        handle.try_push_sample("sl", Metrics::default()).unwrap();
        handle.try_push_sample("sl", Metrics::default()).unwrap();
        drop(handle);
        task.await.unwrap();

        assert_eq!(store.get_samples("sl", std::time::Instant::now() - std::time::Duration::from_secs(5)).len(), 2);
    }
}
