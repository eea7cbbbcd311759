//! Starlink Condition Analyser.
//!
//! Produces `WeightAdjustment`s rather than mutating weight directly — the
//! Hybrid Weight Manager is the only component that owns adjustment state.

use crate::config::StarlinkThresholds;
use crate::domain::{AdjustmentType, Metrics, WeightAdjustment};
use std::time::Instant;

/// Scale a penalty by how far the observed value exceeds its alarm
/// threshold, capped at `max`. "Up to N points" reads as
/// proportional-with-cap rather than a fixed step.
fn scaled_penalty(observed: f64, threshold: f64, max: f64, full_scale_at: f64) -> f64 {
    if observed <= threshold {
        return 0.0;
    }
    let ratio = ((observed - threshold) / (full_scale_at - threshold).max(f64::EPSILON)).clamp(0.0, 1.0);
    max * ratio
}

pub fn assess(member: &str, metrics: &Metrics, t: &StarlinkThresholds) -> Vec<WeightAdjustment> {
    let mut adjustments = Vec::new();
    let now = Instant::now();

    if let Some(obstruction) = metrics.obstruction_pct {
        let penalty = scaled_penalty(obstruction, t.obstruction_pct_alarm, t.obstruction_penalty, 50.0);
        if penalty > 0.0 {
            adjustments.push(WeightAdjustment {
                member: member.to_string(),
                amount: penalty,
                reason: format!("obstruction {:.1}% above alarm threshold", obstruction),
                kind: AdjustmentType::Penalty,
                expires_at: now + t.obstruction_duration,
            });
        }
    }

    if let Some(outages) = metrics.outages {
        if outages > t.outage_count_alarm {
            let penalty = scaled_penalty(outages as f64, t.outage_count_alarm as f64, t.outage_penalty, t.outage_count_alarm as f64 * 3.0);
            adjustments.push(WeightAdjustment {
                member: member.to_string(),
                amount: penalty,
                reason: format!("{} outages in window above alarm threshold", outages),
                kind: AdjustmentType::Penalty,
                expires_at: now + t.outage_duration,
            });
        }
    }

    let thermal = metrics.thermal_throttle.unwrap_or(false) || metrics.thermal_shutdown.unwrap_or(false);
    if thermal {
        adjustments.push(WeightAdjustment {
            member: member.to_string(),
            amount: t.thermal_penalty,
            reason: "thermal throttle or shutdown reported".to_string(),
            kind: AdjustmentType::Penalty,
            expires_at: now + t.thermal_duration,
        });
    }

    adjustments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> StarlinkThresholds {
        StarlinkThresholds::default()
    }

    #[test]
    fn no_adjustments_when_healthy() {
        let mut m = Metrics::default();
        m.obstruction_pct = Some(2.0);
        m.outages = Some(0);
        m.thermal_throttle = Some(false);
        m.thermal_shutdown = Some(false);
        assert!(assess("sl", &m, &thresholds()).is_empty());
    }

    #[test]
    fn obstruction_above_threshold_produces_capped_penalty() {
        let mut m = Metrics::default();
        m.obstruction_pct = Some(100.0);
        let adjustments = assess("sl", &m, &thresholds());
        assert_eq!(adjustments.len(), 1);
        assert!(adjustments[0].amount <= thresholds().obstruction_penalty);
        assert_eq!(adjustments[0].kind, AdjustmentType::Penalty);
    }

    #[test]
    fn outage_count_above_threshold_produces_emergency_duration_penalty() {
        let mut m = Metrics::default();
        m.outages = Some(10);
        let adjustments = assess("sl", &m, &thresholds());
        assert_eq!(adjustments.len(), 1);
        assert!(adjustments[0].amount > 0.0);
    }

    #[test]
    fn thermal_condition_produces_fixed_penalty() {
        let mut m = Metrics::default();
        m.thermal_shutdown = Some(true);
        let adjustments = assess("sl", &m, &thresholds());
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].amount, thresholds().thermal_penalty);
    }

    #[test]
    fn multiple_conditions_produce_multiple_adjustments() {
        let mut m = Metrics::default();
        m.obstruction_pct = Some(40.0);
        m.outages = Some(20);
        m.thermal_throttle = Some(true);
        let adjustments = assess("sl", &m, &thresholds());
        assert_eq!(adjustments.len(), 3);
    }
}
