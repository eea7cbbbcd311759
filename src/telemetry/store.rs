//! In-memory time-series telemetry store.
//!
//! One writer lock per registry (samples, events); readers always receive
//! owned copies.

use std::collections::HashMap;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::TelemetryPolicy;
use crate::domain::{Event, Metrics, Sample, Score};
use crate::error::TelemetryError;

use super::ring::BoundedRing;

type EventSubscriber = dyn Fn(Event) + Send + Sync;

/// Bounded, shared telemetry store. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct TelemetryStore {
    inner: Arc<Inner>,
}

struct Inner {
    policy: TelemetryPolicy,
    samples: RwLock<HashMap<String, BoundedRing<Sample>>>,
    events: RwLock<BoundedRing<Event>>,
    last_cleanup: RwLock<Option<Instant>>,
    subscriber: RwLock<Option<Box<EventSubscriber>>>,
}

/// Rough per-sample footprint used for the memory-pressure estimate. Not
/// exact (String fields vary), just a stable order-of-magnitude budget.
const ESTIMATED_SAMPLE_BYTES: usize = size_of::<Sample>() + 96;

/// Newest samples per member that downsampling under memory pressure must
/// never touch, so recent history stays queryable at full resolution.
const DOWNSAMPLE_KEEP_NEWEST: usize = 100;

impl TelemetryStore {
    pub fn new(policy: TelemetryPolicy) -> Result<Self, TelemetryError> {
        if policy.per_member_capacity == 0 || policy.event_capacity == 0 {
            return Err(TelemetryError::InvalidConfiguration(
                "ring capacities must be non-zero".into(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                events: RwLock::new(BoundedRing::new(policy.event_capacity)),
                samples: RwLock::new(HashMap::new()),
                last_cleanup: RwLock::new(None),
                subscriber: RwLock::new(None),
                policy,
            }),
        })
    }

    /// Install a best-effort event subscriber. Invoked off the critical
    /// path — never while holding the store's locks.
    pub fn set_subscriber<F>(&self, subscriber: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        *self.inner.subscriber.write() = Some(Box::new(subscriber));
    }

    /// O(1) amortised. Overwrites the oldest sample when the per-member ring
    /// is full.
    pub fn add_sample(&self, member: &str, metrics: Metrics, score: Option<Score>) {
        let sample = Sample {
            member: member.to_string(),
            timestamp: Instant::now(),
            metrics,
            score,
        };

        {
            let mut samples = self.inner.samples.write();
            let ring = samples
                .entry(member.to_string())
                .or_insert_with(|| BoundedRing::new(self.inner.policy.per_member_capacity));
            ring.push(sample);
        }

        self.maybe_apply_pressure();
        self.maybe_cleanup();
    }

    pub fn add_event(&self, event: Event) {
        {
            let mut events = self.inner.events.write();
            events.push(event.clone());
        }

        // Publish outside the lock; a saturated/absent subscriber drops the
        // event rather than stalling ingest.
        if let Some(subscriber) = self.inner.subscriber.read().as_ref() {
            subscriber(event);
        }
    }

    /// Oldest-first snapshot copy of samples for `member` observed at or
    /// after `since`.
    pub fn get_samples(&self, member: &str, since: Instant) -> Vec<Sample> {
        self.inner
            .samples
            .read()
            .get(member)
            .map(|ring| {
                ring.iter()
                    .filter(|s| s.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Oldest-first snapshot copy of events at or after `since` (wall-clock,
    /// matching `Event::timestamp`), most-recent `limit` kept if given.
    pub fn get_events(&self, since: chrono::DateTime<chrono::Utc>, limit: Option<usize>) -> Vec<Event> {
        let events = self.inner.events.read();
        let mut out: Vec<Event> = events.iter().filter(|e| e.timestamp >= since).cloned().collect();
        if let Some(limit) = limit {
            if out.len() > limit {
                let drop = out.len() - limit;
                out.drain(0..drop);
            }
        }
        out
    }

    pub fn members(&self) -> Vec<String> {
        self.inner.samples.read().keys().cloned().collect()
    }

    /// Drop entries older than retention; drop empty per-member rings.
    pub fn cleanup(&self) {
        let cutoff = Instant::now()
            .checked_sub(self.inner.policy.retention)
            .unwrap_or_else(Instant::now);

        let mut samples = self.inner.samples.write();
        samples.retain(|member, ring| {
            ring.drop_while_front(|s| s.timestamp < cutoff);
            if ring.is_empty() {
                debug!(member, "dropping empty telemetry ring after cleanup");
                false
            } else {
                true
            }
        });

        *self.inner.last_cleanup.write() = Some(Instant::now());
    }

    fn maybe_cleanup(&self) {
        let should_run = match *self.inner.last_cleanup.read() {
            Some(last) => last.elapsed() >= self.inner.policy.cleanup_interval,
            None => true,
        };
        if should_run {
            self.cleanup();
        }
    }

    /// Estimate current memory usage; downsample oldest-heavy rings before
    /// evicting if the budget is exceeded.
    fn maybe_apply_pressure(&self) {
        let budget_bytes = self.inner.policy.max_ram_mb as usize * 1024 * 1024;
        let mut samples = self.inner.samples.write();
        let total: usize = samples.values().map(|r| r.len() * ESTIMATED_SAMPLE_BYTES).sum();

        if total <= budget_bytes {
            return;
        }

        warn!(
            estimated_bytes = total,
            budget_bytes, "telemetry memory pressure: downsampling older rings"
        );

        let factor = self.inner.policy.downsample_factor.max(2);
        // Downsample the largest rings first; they contributed the most to
        // the overrun.
        let mut members: Vec<(String, usize)> = samples
            .iter()
            .map(|(m, r)| (m.clone(), r.len()))
            .collect();
        members.sort_by(|a, b| b.1.cmp(&a.1));

        for (member, _) in members {
            let current: usize = samples.values().map(|r| r.len() * ESTIMATED_SAMPLE_BYTES).sum();
            if current <= budget_bytes {
                break;
            }
            if let Some(ring) = samples.get_mut(&member) {
                ring.downsample(factor, DOWNSAMPLE_KEEP_NEWEST);
            }
        }
    }

    /// Release all buffers. Idempotent.
    pub fn close(&self) {
        self.inner.samples.write().clear();
        *self.inner.events.write() = BoundedRing::new(self.inner.policy.event_capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryPolicy;

    fn policy(per_member: usize) -> TelemetryPolicy {
        TelemetryPolicy {
            per_member_capacity: per_member,
            event_capacity: 16,
            max_ram_mb: 128,
            ..TelemetryPolicy::default()
        }
    }

    #[test]
    fn add_and_read_samples_oldest_first() {
        let store = TelemetryStore::new(policy(10)).unwrap();
        let t0 = Instant::now();
        for _ in 0..5 {
            store.add_sample("sl", Metrics::default(), None);
        }
        let samples = store.get_samples("sl", t0);
        assert_eq!(samples.len(), 5);
        for pair in samples.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let store = TelemetryStore::new(policy(3)).unwrap();
        for _ in 0..5 {
            store.add_sample("lte", Metrics::default(), None);
        }
        let samples = store.get_samples("lte", Instant::now() - std::time::Duration::from_secs(10));
        assert_eq!(samples.len(), 3);
    }

    #[test]
    fn memory_pressure_downsamples_but_keeps_newest() {
        let tiny = TelemetryStore::new(TelemetryPolicy {
            per_member_capacity: 1000,
            event_capacity: 16,
            max_ram_mb: 1,
            downsample_factor: 3,
            ..TelemetryPolicy::default()
        })
        .unwrap();
        for i in 0..1000 {
            let mut m = Metrics::default();
            m.latency_ms = Some(i as f64);
            tiny.add_sample("sl", m, None);
        }
        let remaining = tiny.get_samples("sl", Instant::now() - std::time::Duration::from_secs(3600));
        assert!(remaining.len() < 1000, "downsampling must have reduced the ring below capacity");
        assert!(!remaining.is_empty(), "downsampling must not evict every sample");

        // The newest 100 samples (latency_ms 900..1000) must survive intact
        // and in order, regardless of how the older portion was thinned.
        let tail: Vec<f64> = remaining.iter().rev().take(100).rev().map(|s| s.metrics.latency_ms.unwrap()).collect();
        let expected: Vec<f64> = (900..1000).map(|i| i as f64).collect();
        assert_eq!(tail, expected, "newest 100 samples must be intact and in order");
    }

    #[test]
    fn close_is_idempotent() {
        let store = TelemetryStore::new(policy(10)).unwrap();
        store.add_sample("sl", Metrics::default(), None);
        store.close();
        store.close();
        assert!(store.members().is_empty());
    }
}
