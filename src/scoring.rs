//! Scoring: deterministic `Metrics -> Score`.
//!
//! Stateless — `score()` is a pure function of its inputs (metrics, the
//! previous EWMA value and the smoothing factor), so the engine owns the
//! one piece of state (the previous EWMA) and this module holds none.

use crate::config::{MetricCurve, ScoringThresholds};
use crate::domain::{Grade, Metrics, NetworkType, Score, ScoreAdjustments, ScoreComponents};

struct Contribution {
    weight: f64,
    quality: f64,
}

/// Piecewise-linear interpolation across the five named breakpoints
/// (excellent/good/fair/poor/unusable). The breakpoints may be ascending or
/// descending in `value` — ascending encodes a "lower is better" metric,
/// descending a "higher is better" one — interpolation direction is
/// inferred from the curve itself, so callers never pass an inversion flag.
fn curve_quality(value: f64, curve: &MetricCurve) -> f64 {
    let points = [
        (curve.excellent, 1.0),
        (curve.good, 0.85),
        (curve.fair, 0.65),
        (curve.poor, 0.35),
        (curve.unusable, 0.0),
    ];
    let ascending = points[0].0 <= points[points.len() - 1].0;

    if ascending {
        if value <= points[0].0 {
            return points[0].1;
        }
        if value >= points[points.len() - 1].0 {
            return points[points.len() - 1].1;
        }
        for pair in points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if value >= x0 && value <= x1 {
                let t = (value - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
    } else {
        if value >= points[0].0 {
            return points[0].1;
        }
        if value <= points[points.len() - 1].0 {
            return points[points.len() - 1].1;
        }
        for pair in points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if value <= x0 && value >= x1 {
                let t = (x0 - value) / (x0 - x1);
                return y0 + t * (y1 - y0);
            }
        }
    }
    points[points.len() - 1].1
}

fn weighted_average(contributions: &[Contribution]) -> f64 {
    let total_weight: f64 = contributions.iter().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let sum: f64 = contributions.iter().map(|c| c.weight * c.quality).sum();
    100.0 * sum / total_weight
}

fn network_type_quality(metrics: &Metrics) -> Option<f64> {
    let nt = NetworkType::from_label(metrics.network_type.as_deref()?)?;
    Some(match nt {
        NetworkType::G5 => 1.0,
        NetworkType::Lte => 0.75,
        NetworkType::G3 => 0.4,
        NetworkType::G2 => 0.1,
    })
}

fn band_quality(metrics: &Metrics) -> Option<f64> {
    // Unknown/unrecognised bands are neutral; a
    // present-but-unparseable band still contributes a mid-score rather
    // than being excluded.
    metrics.band.as_ref().map(|_| 0.5)
}

fn modem_quality(metrics: &Metrics) -> Option<f64> {
    match (metrics.thermal_shutdown, metrics.thermal_throttle) {
        (Some(true), _) => Some(0.0),
        (_, Some(true)) => Some(0.4),
        (Some(false), _) | (_, Some(false)) => Some(1.0),
        (None, None) => None,
    }
}

fn signal_contributions(metrics: &Metrics, t: &ScoringThresholds) -> Vec<Contribution> {
    let mut out = Vec::new();
    if let Some(v) = metrics.rsrp {
        out.push(Contribution { weight: 0.15, quality: curve_quality(v, &t.rsrp) });
    }
    if let Some(v) = metrics.rsrq {
        out.push(Contribution { weight: 0.10, quality: curve_quality(v, &t.rsrq) });
    }
    if let Some(v) = metrics.sinr {
        out.push(Contribution { weight: 0.10, quality: curve_quality(v, &t.sinr) });
    }
    out
}

fn connectivity_contributions(metrics: &Metrics, t: &ScoringThresholds) -> Vec<Contribution> {
    let mut out = Vec::new();
    if let Some(v) = metrics.latency_ms {
        out.push(Contribution { weight: 0.20, quality: curve_quality(v, &t.latency_ms) });
    }
    if let Some(v) = metrics.loss_pct {
        out.push(Contribution { weight: 0.15, quality: curve_quality(v, &t.loss_pct) });
    }
    if let Some(v) = metrics.jitter_ms {
        out.push(Contribution { weight: 0.05, quality: curve_quality(v, &t.jitter_ms) });
    }
    out
}

fn stability_contributions(metrics: &Metrics, t: &ScoringThresholds) -> Vec<Contribution> {
    let mut out = Vec::new();
    if let Some(v) = metrics.signal_variance {
        out.push(Contribution { weight: 0.08, quality: curve_quality(v, &t.signal_variance) });
    }
    if let Some(v) = metrics.cell_changes {
        out.push(Contribution { weight: 0.04, quality: curve_quality(v as f64, &t.cell_changes) });
    }
    if let Some(v) = metrics.throughput_kbps {
        out.push(Contribution { weight: 0.03, quality: curve_quality(v, &t.throughput_kbps) });
    }
    out
}

fn quality_contributions(metrics: &Metrics) -> Vec<Contribution> {
    let mut out = Vec::new();
    if let Some(q) = network_type_quality(metrics) {
        out.push(Contribution { weight: 0.05, quality: q });
    }
    if let Some(q) = band_quality(metrics) {
        out.push(Contribution { weight: 0.03, quality: q });
    }
    if let Some(q) = modem_quality(metrics) {
        out.push(Contribution { weight: 0.02, quality: q });
    }
    out
}

/// Compute the composite score for one `Metrics` snapshot.
///
/// `previous_ewma` is the member's last known EWMA (`None` on first
/// observation); `alpha` should come from `Config::ewma_alpha()` so the
/// smoothing time-constant matches `history_window_s`.
pub fn score(metrics: &Metrics, thresholds: &ScoringThresholds, previous_ewma: Option<f64>, alpha: f64) -> Score {
    let signal = signal_contributions(metrics, thresholds);
    let connectivity = connectivity_contributions(metrics, thresholds);
    let stability = stability_contributions(metrics, thresholds);
    let quality = quality_contributions(metrics);

    let components = ScoreComponents {
        signal: weighted_average(&signal),
        connectivity: weighted_average(&connectivity),
        stability: weighted_average(&stability),
        quality: weighted_average(&quality),
    };

    // Global renormalization: every leaf metric contributes its target
    // weight unless missing, in which case the remaining weights are
    // renormalized so partial telemetry still yields a usable score.
    let all: Vec<Contribution> = signal
        .into_iter()
        .chain(connectivity)
        .chain(stability)
        .chain(quality)
        .collect();
    let instant = weighted_average(&all);

    let mut bonuses = ScoreAdjustments::default();
    if let Some(label) = &metrics.network_type {
        if let Some(nt) = NetworkType::from_label(label) {
            bonuses.network_type_bonus = nt.score_bonus();
        }
    }

    let mut penalties = ScoreAdjustments::default();
    if let Some(variance) = metrics.signal_variance {
        if variance > thresholds.variance_alarm {
            penalties.variance_penalty = 5.0;
        }
    }
    if let Some(changes) = metrics.cell_changes {
        if changes > thresholds.handoff_alarm {
            penalties.handoff_penalty = 3.0;
        }
    }
    if let Some(throughput) = metrics.throughput_kbps {
        if throughput < thresholds.throughput_alarm_kbps {
            penalties.throughput_penalty = 2.0;
        }
    }

    let bonus_total = bonuses.network_type_bonus;
    let penalty_total = penalties.variance_penalty + penalties.handoff_penalty + penalties.throughput_penalty;

    let adjusted = (instant + bonus_total - penalty_total).clamp(0.0, 100.0);
    let ewma = match previous_ewma {
        Some(prev) => alpha * adjusted + (1.0 - alpha) * prev,
        None => adjusted,
    };

    // `final` blends the fresh instant reading with the smoothed EWMA (spec
    // §3) so a single noisy sample can't swing the engine's candidate value
    // as hard as a sustained trend does. Reduces to `adjusted` exactly when
    // there is no prior EWMA (first observation).
    const FINAL_INSTANT_WEIGHT: f64 = 0.6;
    let blended_final = (FINAL_INSTANT_WEIGHT * adjusted + (1.0 - FINAL_INSTANT_WEIGHT) * ewma).clamp(0.0, 100.0);

    Score {
        instant: adjusted,
        ewma,
        r#final: blended_final,
        grade: Grade::from_final(blended_final),
        components,
        bonuses,
        penalties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringThresholds;

    fn thresholds() -> ScoringThresholds {
        ScoringThresholds::default()
    }

    #[test]
    fn empty_metrics_score_zero_grade_f() {
        let s = score(&Metrics::default(), &thresholds(), None, 0.3);
        assert_eq!(s.r#final, 0.0);
        assert_eq!(s.grade, Grade::F);
    }

    #[test]
    fn final_always_in_bounds() {
        let mut m = Metrics::default();
        m.rsrp = Some(-60.0);
        m.rsrq = Some(-5.0);
        m.sinr = Some(25.0);
        m.latency_ms = Some(5.0);
        m.loss_pct = Some(0.0);
        m.jitter_ms = Some(1.0);
        m.network_type = Some("5G NSA".into());
        let s = score(&m, &thresholds(), None, 0.3);
        assert!(s.r#final >= 0.0 && s.r#final <= 100.0);
        assert_eq!(s.grade, Grade::APlus);
    }

    #[test]
    fn scoring_is_deterministic() {
        let mut m = Metrics::default();
        m.latency_ms = Some(80.0);
        m.loss_pct = Some(0.3);
        let a = score(&m, &thresholds(), Some(70.0), 0.3);
        let b = score(&m, &thresholds(), Some(70.0), 0.3);
        assert_eq!(a.r#final, b.r#final);
        assert_eq!(a.ewma, b.ewma);
    }

    #[test]
    fn variance_alarm_strict_inequality_at_threshold() {
        let mut m = Metrics::default();
        m.signal_variance = Some(thresholds().variance_alarm);
        let s = score(&m, &thresholds(), None, 0.3);
        assert_eq!(s.penalties.variance_penalty, 0.0);

        m.signal_variance = Some(thresholds().variance_alarm + 0.01);
        let s2 = score(&m, &thresholds(), None, 0.3);
        assert_eq!(s2.penalties.variance_penalty, 5.0);
    }

    #[test]
    fn ewma_converges_on_constant_input() {
        let mut m = Metrics::default();
        m.latency_ms = Some(40.0);
        m.loss_pct = Some(0.1);
        let mut ewma = None;
        let mut last = 0.0;
        for _ in 0..200 {
            let s = score(&m, &thresholds(), ewma, 0.3);
            ewma = Some(s.ewma);
            last = s.ewma;
        }
        let s = score(&m, &thresholds(), ewma, 0.3);
        assert!((s.ewma - last).abs() < 1e-6);
    }

    #[test]
    fn partial_telemetry_is_renormalized_and_usable() {
        let mut m = Metrics::default();
        m.latency_ms = Some(20.0); // excellent
        let s = score(&m, &thresholds(), None, 0.3);
        assert!(s.r#final > 50.0);
    }
}
