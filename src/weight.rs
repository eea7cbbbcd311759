//! Hybrid Weight Manager: `base_weight -> effective_weight` via short-lived,
//! expiring adjustments.
//!
//! Adjustments expire by elapsed time rather than an active timer task,
//! checked lazily whenever they're read.

use std::collections::HashMap;

use parking_lot::RwLock;
use std::time::{Duration, Instant};

use crate::domain::{AdjustmentType, WeightAdjustment};

const FLOOR: u8 = 5;
const CEILING: u8 = 100;

#[derive(Debug, Clone, Default)]
pub struct WeightSummary {
    pub base_weight: u8,
    pub effective_weight: u8,
    pub active_adjustments: usize,
}

/// Thread-safe. Cheap to share via `Arc` at the call site (the engine holds
/// one instance for the process lifetime).
pub struct WeightManager {
    base_weights: RwLock<HashMap<String, u8>>,
    adjustments: RwLock<HashMap<String, Vec<WeightAdjustment>>>,
}

impl WeightManager {
    pub fn new(base_weights: HashMap<String, u8>) -> Self {
        Self {
            base_weights: RwLock::new(base_weights),
            adjustments: RwLock::new(HashMap::new()),
        }
    }

    /// Never mutates `base_weight`; returns `floor` if
    /// the member is unknown.
    pub fn get_effective_weight(&self, member: &str) -> u8 {
        let base = *self.base_weights.read().get(member).unwrap_or(&FLOOR);
        let delta = self.live_adjustment_total(member);
        clamp_weight(base as f64 + delta)
    }

    pub fn apply_temporary_adjustment(
        &self,
        member: &str,
        amount: f64,
        reason: impl Into<String>,
        kind: AdjustmentType,
        duration: Duration,
    ) {
        let adjustment = WeightAdjustment {
            member: member.to_string(),
            amount: amount.abs(),
            reason: reason.into(),
            kind,
            expires_at: Instant::now() + duration,
        };
        self.adjustments
            .write()
            .entry(member.to_string())
            .or_default()
            .push(adjustment);
    }

    /// Live (non-expired) adjustments, expired entries dropped lazily.
    pub fn get_active_adjustments(&self) -> HashMap<String, Vec<WeightAdjustment>> {
        let now = Instant::now();
        let mut adjustments = self.adjustments.write();
        adjustments.retain(|_, v| {
            v.retain(|a| !a.is_expired(now));
            !v.is_empty()
        });
        adjustments.clone()
    }

    pub fn get_weight_summary(&self) -> HashMap<String, WeightSummary> {
        let bases = self.base_weights.read().clone();
        bases
            .into_iter()
            .map(|(member, base)| {
                let delta = self.live_adjustment_total(&member);
                let summary = WeightSummary {
                    base_weight: base,
                    effective_weight: clamp_weight(base as f64 + delta),
                    active_adjustments: self
                        .adjustments
                        .read()
                        .get(&member)
                        .map(|v| v.iter().filter(|a| !a.is_expired(Instant::now())).count())
                        .unwrap_or(0),
                };
                (member, summary)
            })
            .collect()
    }

    fn live_adjustment_total(&self, member: &str) -> f64 {
        let now = Instant::now();
        self.adjustments
            .read()
            .get(member)
            .map(|v| v.iter().filter(|a| !a.is_expired(now)).map(|a| a.signed_amount()).sum())
            .unwrap_or(0.0)
    }
}

fn clamp_weight(value: f64) -> u8 {
    value.round().clamp(FLOOR as f64, CEILING as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> WeightManager {
        let mut bases = HashMap::new();
        bases.insert("starlink".to_string(), 90);
        bases.insert("cellular".to_string(), 60);
        WeightManager::new(bases)
    }

    #[test]
    fn unknown_member_returns_floor() {
        let m = manager();
        assert_eq!(m.get_effective_weight("ghost"), FLOOR);
    }

    #[test]
    fn penalty_never_raises_boost_never_lowers() {
        let m = manager();
        m.apply_temporary_adjustment("cellular", 50.0, "roaming", AdjustmentType::Penalty, Duration::from_secs(60));
        assert!(m.get_effective_weight("cellular") <= 60);

        let m2 = manager();
        m2.apply_temporary_adjustment("cellular", 50.0, "bonus test", AdjustmentType::Boost, Duration::from_secs(60));
        assert!(m2.get_effective_weight("cellular") >= 60);
    }

    #[test]
    fn effective_weight_clamped_to_floor_and_ceiling() {
        let m = manager();
        m.apply_temporary_adjustment("cellular", 1000.0, "huge penalty", AdjustmentType::Penalty, Duration::from_secs(60));
        assert_eq!(m.get_effective_weight("cellular"), FLOOR);

        m.apply_temporary_adjustment("starlink", 1000.0, "huge boost", AdjustmentType::Boost, Duration::from_secs(60));
        assert_eq!(m.get_effective_weight("starlink"), CEILING);
    }

    #[test]
    fn expired_adjustments_are_dropped_lazily() {
        let m = manager();
        m.apply_temporary_adjustment("cellular", 20.0, "brief", AdjustmentType::Penalty, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(m.get_effective_weight("cellular"), 60);
        assert!(m.get_active_adjustments().get("cellular").is_none());
    }

    #[test]
    fn base_weight_is_never_mutated() {
        let m = manager();
        m.apply_temporary_adjustment("cellular", 10.0, "p", AdjustmentType::Penalty, Duration::from_secs(60));
        m.get_effective_weight("cellular");
        assert_eq!(*m.base_weights.read().get("cellular").unwrap(), 60);
    }
}
