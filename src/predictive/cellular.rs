//! Cellular Stability Analyser.
//!
//! Pure function of a `Metrics` snapshot and the cellular threshold policy;
//! holds no state. Generalizes a single z-score check into a weighted
//! degradation index.

use crate::config::CellularThresholds;
use crate::domain::{Assessment, CellularStatus, Metrics, RecommendAction};

/// Signal degradation index in [0,1]: additive contributions from RSRP, RSRQ
/// and SINR being below their degraded thresholds, each clamped before
/// summing.
fn signal_degradation_index(metrics: &Metrics, t: &CellularThresholds) -> f64 {
    let mut index = 0.0;

    if let Some(rsrp) = metrics.rsrp {
        if rsrp < t.rsrp_degraded {
            index += 0.4 * ((t.rsrp_degraded - rsrp) / 20.0).clamp(0.0, 1.0);
        }
    }
    if let Some(rsrq) = metrics.rsrq {
        if rsrq < t.rsrq_degraded {
            index += 0.3 * ((t.rsrq_degraded - rsrq) / 10.0).clamp(0.0, 1.0);
        }
    }
    if let Some(sinr) = metrics.sinr {
        if sinr < t.sinr_degraded {
            index += 0.3 * ((t.sinr_degraded - sinr) / 10.0).clamp(0.0, 1.0);
        }
    }

    index.clamp(0.0, 1.0)
}

/// Assess cellular stability from one telemetry snapshot and its score.
///
/// `score` is the member's current composite score (from `scoring::score`);
/// `predictive_risk` is supplied by the trend analyser (0 when unavailable).
pub fn assess(metrics: &Metrics, score: f64, predictive_risk: f64, t: &CellularThresholds) -> Assessment {
    let degradation = signal_degradation_index(metrics, t);

    let variance_alarm = metrics.signal_variance.map(|v| v > t.variance_alarm).unwrap_or(false);
    let handoff_alarm = metrics.cell_changes.map(|c| c >= t.handoff_alarm).unwrap_or(false);
    let throughput_degraded = metrics.throughput_kbps.map(|v| v < t.throughput_alarm_kbps).unwrap_or(false);

    let mut reasoning = Vec::new();
    if variance_alarm {
        reasoning.push("signal variance above alarm threshold".to_string());
    }
    if handoff_alarm {
        reasoning.push("cell handoffs above alarm threshold in window".to_string());
    }
    if throughput_degraded {
        reasoning.push("throughput below degraded threshold".to_string());
    }
    if degradation > 0.0 {
        reasoning.push(format!("signal degradation index {:.2}", degradation));
    }

    // First matching recommendation wins; remaining checks still contribute
    // to `reasoning` above.
    let (status, recommend_action) = if score < t.critical_score || predictive_risk > t.critical_predictive_risk {
        (CellularStatus::Critical, RecommendAction::FailoverNow)
    } else if score < t.unhealthy_score {
        (CellularStatus::Unhealthy, RecommendAction::PrepareFailover)
    } else if predictive_risk > t.prepare_predictive_risk {
        (CellularStatus::Degraded, RecommendAction::PrepareFailover)
    } else if degradation > t.monitor_degradation_index || variance_alarm || handoff_alarm || throughput_degraded {
        (CellularStatus::Degraded, RecommendAction::Monitor)
    } else {
        (CellularStatus::Healthy, RecommendAction::None)
    };

    if reasoning.is_empty() {
        reasoning.push("no cellular stability concerns observed".to_string());
    }

    Assessment {
        score,
        status,
        predictive_risk,
        recommend_action,
        reasoning,
    }
}

/// Combined predictive-failover risk, computed only while `prepare_failover`
/// is the standing recommendation. Returns `true` if the
/// combined risk exceeds the firing threshold.
pub fn predictive_failover_fires(metrics: &Metrics, assessment: &Assessment, t: &CellularThresholds) -> bool {
    if assessment.recommend_action != RecommendAction::PrepareFailover {
        return false;
    }

    let degradation = signal_degradation_index(metrics, t);
    let variance_alarm = metrics.signal_variance.map(|v| v > t.variance_alarm).unwrap_or(false);
    let handoff_alarm = metrics.cell_changes.map(|c| c >= t.handoff_alarm).unwrap_or(false);
    let throughput_degraded = metrics.throughput_kbps.map(|v| v < t.throughput_alarm_kbps).unwrap_or(false);

    let risk = 0.4 * (1.0 - assessment.score / 100.0)
        + 0.3 * assessment.predictive_risk
        + 0.3 * degradation
        + 0.1 * (variance_alarm as u8 as f64)
        + 0.1 * (handoff_alarm as u8 as f64)
        + 0.1 * (throughput_degraded as u8 as f64);

    risk > t.predictive_failover_risk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> CellularThresholds {
        CellularThresholds::default()
    }

    #[test]
    fn healthy_signal_yields_none_recommendation() {
        let mut m = Metrics::default();
        m.rsrp = Some(-70.0);
        m.rsrq = Some(-6.0);
        m.sinr = Some(18.0);
        let a = assess(&m, 95.0, 0.0, &thresholds());
        assert_eq!(a.status, CellularStatus::Healthy);
        assert_eq!(a.recommend_action, RecommendAction::None);
    }

    #[test]
    fn low_score_forces_failover_now() {
        let m = Metrics::default();
        let a = assess(&m, 20.0, 0.0, &thresholds());
        assert_eq!(a.status, CellularStatus::Critical);
        assert_eq!(a.recommend_action, RecommendAction::FailoverNow);
    }

    #[test]
    fn high_predictive_risk_forces_failover_now() {
        let m = Metrics::default();
        let a = assess(&m, 80.0, 0.95, &thresholds());
        assert_eq!(a.recommend_action, RecommendAction::FailoverNow);
    }

    #[test]
    fn degraded_signal_at_least_monitor() {
        let mut m = Metrics::default();
        m.rsrp = Some(-115.0);
        m.rsrq = Some(-18.0);
        m.sinr = Some(-2.0);
        let a = assess(&m, 85.0, 0.0, &thresholds());
        assert!(matches!(a.recommend_action, RecommendAction::Monitor | RecommendAction::PrepareFailover));
    }

    #[test]
    fn predictive_failover_requires_prepare_standing_recommendation() {
        let m = Metrics::default();
        let a = assess(&m, 95.0, 0.0, &thresholds());
        assert_eq!(a.recommend_action, RecommendAction::None);
        assert!(!predictive_failover_fires(&m, &a, &thresholds()));
    }

    #[test]
    fn predictive_failover_fires_above_combined_risk_threshold() {
        let mut m = Metrics::default();
        m.signal_variance = Some(10.0);
        m.cell_changes = Some(3);
        m.throughput_kbps = Some(10.0);
        m.rsrp = Some(-118.0);
        m.rsrq = Some(-19.0);
        m.sinr = Some(-3.0);
        let a = assess(&m, 40.0, 0.85, &thresholds());
        assert_eq!(a.recommend_action, RecommendAction::PrepareFailover);
        assert!(predictive_failover_fires(&m, &a, &thresholds()));
    }
}
