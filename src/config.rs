//! Typed configuration surface.
//!
//! One top-level struct composing nested, independently-defaultable policy
//! structs, with `Duration` fields serialized via a small helper module.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::MemberClass;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub members: Vec<MemberConfig>,
    pub predictive: bool,
    pub decision: DecisionPolicy,
    pub telemetry: TelemetryPolicy,
    pub scoring: ScoringThresholds,
    pub cellular: CellularThresholds,
    pub starlink: StarlinkThresholds,
    pub class_priority: Option<Vec<MemberClass>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            predictive: true,
            decision: DecisionPolicy::default(),
            telemetry: TelemetryPolicy::default(),
            scoring: ScoringThresholds::default(),
            cellular: CellularThresholds::default(),
            starlink: StarlinkThresholds::default(),
            class_priority: None,
        }
    }
}

impl Config {
    /// Parse and validate a TOML configuration document. The crate itself
    /// never reads files or watches for changes (configuration
    /// loading/persistence is an external collaborator, spec.md §1) — this
    /// is the narrow "given the text, produce a validated `Config`" seam an
    /// external loader calls into.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|e| ConfigError::InvalidToml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate bounds and uniqueness; fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::NoMembers);
        }

        let mut seen = std::collections::HashSet::new();
        for m in &self.members {
            if !seen.insert(&m.name) {
                return Err(ConfigError::DuplicateMember(m.name.clone()));
            }
            if m.base_weight > 100 {
                return Err(ConfigError::WeightOutOfRange {
                    member: m.name.clone(),
                    value: m.base_weight,
                });
            }
        }

        let hours = self.telemetry.retention.as_secs() / 3600;
        if !(1..=168).contains(&hours) {
            return Err(ConfigError::RetentionOutOfRange(hours as u32));
        }
        if !(1..=128).contains(&self.telemetry.max_ram_mb) {
            return Err(ConfigError::RamBudgetOutOfRange(self.telemetry.max_ram_mb));
        }

        Ok(())
    }

    /// EWMA smoothing factor derived from the history window and tick
    /// period, so the EMA time constant matches `history_window_s` (Open
    /// Question 1 in DESIGN.md).
    pub fn ewma_alpha(&self) -> f64 {
        let n = (self.decision.history_window.as_secs_f64()
            / self.decision.tick_period.as_secs_f64())
        .max(1.0);
        2.0 / (n + 1.0)
    }

    pub fn class_priority(&self, class: MemberClass) -> u8 {
        if let Some(order) = &self.class_priority {
            order
                .iter()
                .position(|c| *c == class)
                .map(|p| p as u8)
                .unwrap_or_else(|| class.default_priority())
        } else {
            class.default_priority()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub name: String,
    pub interface: String,
    pub class: MemberClass,
    pub base_weight: u8,
    pub data_limit_mb: Option<u64>,
    pub is_primary: bool,
}

/// Decision engine tick, dwell, hysteresis and cooldown policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPolicy {
    #[serde(with = "duration_secs")]
    pub tick_period: Duration,
    pub switch_margin: f64,
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    #[serde(with = "duration_secs")]
    pub fail_min_duration: Duration,
    #[serde(with = "duration_secs")]
    pub restore_min_duration: Duration,
    #[serde(with = "duration_secs")]
    pub history_window: Duration,
    pub min_samples: usize,
    pub prepare_failover_penalty: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            switch_margin: 10.0,
            cooldown: Duration::from_secs(5),
            fail_min_duration: Duration::from_secs(10),
            restore_min_duration: Duration::from_secs(20),
            history_window: Duration::from_secs(300),
            min_samples: 3,
            prepare_failover_penalty: 15.0,
        }
    }
}

/// Telemetry store bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPolicy {
    #[serde(with = "duration_secs")]
    pub retention: Duration,
    pub max_ram_mb: u32,
    pub per_member_capacity: usize,
    pub event_capacity: usize,
    pub downsample_factor: usize,
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for TelemetryPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            max_ram_mb: 16,
            per_member_capacity: 1000,
            event_capacity: 1000,
            downsample_factor: 3,
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// Scoring curve thresholds. Each metric maps through five
/// points: excellent, good, fair, poor, unusable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricCurve {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
    pub unusable: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringThresholds {
    pub rsrp: MetricCurve,
    pub rsrq: MetricCurve,
    pub sinr: MetricCurve,
    pub latency_ms: MetricCurve,
    pub loss_pct: MetricCurve,
    pub jitter_ms: MetricCurve,
    pub signal_variance: MetricCurve,
    pub cell_changes: MetricCurve,
    pub throughput_kbps: MetricCurve,
    pub variance_alarm: f64,
    pub handoff_alarm: u32,
    pub throughput_alarm_kbps: f64,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            // dBm, higher is better
            rsrp: MetricCurve { excellent: -80.0, good: -90.0, fair: -100.0, poor: -110.0, unusable: -120.0 },
            // dB, higher is better
            rsrq: MetricCurve { excellent: -8.0, good: -10.0, fair: -12.0, poor: -15.0, unusable: -20.0 },
            // dB, higher is better
            sinr: MetricCurve { excellent: 20.0, good: 13.0, fair: 5.0, poor: 0.0, unusable: -5.0 },
            // ms, lower is better (inverted curve)
            latency_ms: MetricCurve { excellent: 20.0, good: 50.0, fair: 100.0, poor: 200.0, unusable: 500.0 },
            // percent, lower is better (inverted curve)
            loss_pct: MetricCurve { excellent: 0.0, good: 0.5, fair: 1.0, poor: 5.0, unusable: 15.0 },
            // ms, lower is better (inverted curve)
            jitter_ms: MetricCurve { excellent: 5.0, good: 15.0, fair: 30.0, poor: 60.0, unusable: 120.0 },
            // dB, lower is better (inverted curve)
            signal_variance: MetricCurve { excellent: 1.0, good: 3.0, fair: 6.0, poor: 8.0, unusable: 15.0 },
            // count, lower is better (inverted curve)
            cell_changes: MetricCurve { excellent: 0.0, good: 1.0, fair: 2.0, poor: 4.0, unusable: 8.0 },
            // kbps, higher is better
            throughput_kbps: MetricCurve { excellent: 10_000.0, good: 2_000.0, fair: 500.0, poor: 100.0, unusable: 20.0 },
            variance_alarm: 8.0,
            handoff_alarm: 2,
            throughput_alarm_kbps: 50.0,
        }
    }
}

/// Cellular stability analyser thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellularThresholds {
    pub rsrp_degraded: f64,
    pub rsrq_degraded: f64,
    pub sinr_degraded: f64,
    pub unhealthy_score: f64,
    pub critical_score: f64,
    pub critical_predictive_risk: f64,
    pub prepare_predictive_risk: f64,
    pub monitor_degradation_index: f64,
    pub predictive_failover_risk: f64,
    /// Signal-variance alarm (dB) above which the stability alarm fires.
    pub variance_alarm: f64,
    /// Cell-handoff count alarm (changes in window) at or above which the
    /// handoff alarm fires.
    pub handoff_alarm: u32,
    /// Throughput (kbps) below which the throughput-degraded flag fires.
    pub throughput_alarm_kbps: f64,
    /// Weight penalty applied when `Metrics::roaming` is observed true.
    pub roaming_penalty: f64,
    #[serde(with = "duration_secs")]
    pub roaming_duration: Duration,
}

impl Default for CellularThresholds {
    fn default() -> Self {
        Self {
            rsrp_degraded: -100.0,
            rsrq_degraded: -12.0,
            sinr_degraded: 5.0,
            unhealthy_score: 50.0,
            critical_score: 30.0,
            critical_predictive_risk: 0.9,
            prepare_predictive_risk: 0.7,
            monitor_degradation_index: 0.6,
            predictive_failover_risk: 0.8,
            variance_alarm: 8.0,
            handoff_alarm: 2,
            throughput_alarm_kbps: 50.0,
            roaming_penalty: 25.0,
            roaming_duration: Duration::from_secs(300),
        }
    }
}

/// Starlink condition analyser penalty policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarlinkThresholds {
    pub obstruction_pct_alarm: f64,
    pub obstruction_penalty: f64,
    #[serde(with = "duration_secs")]
    pub obstruction_duration: Duration,
    pub outage_count_alarm: u32,
    pub outage_penalty: f64,
    #[serde(with = "duration_secs")]
    pub outage_duration: Duration,
    pub thermal_penalty: f64,
    #[serde(with = "duration_secs")]
    pub thermal_duration: Duration,
}

impl Default for StarlinkThresholds {
    fn default() -> Self {
        Self {
            obstruction_pct_alarm: 10.0,
            obstruction_penalty: 20.0,
            obstruction_duration: Duration::from_secs(300),
            outage_count_alarm: 3,
            outage_penalty: 30.0,
            outage_duration: Duration::from_secs(900),
            thermal_penalty: 10.0,
            thermal_duration: Duration::from_secs(300),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_rejects_no_members() {
        let cfg = Config::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::NoMembers)));
    }

    #[test]
    fn duplicate_member_names_rejected() {
        let mut cfg = Config::default();
        cfg.members.push(MemberConfig {
            name: "sl".into(),
            interface: "wwan0".into(),
            class: MemberClass::Starlink,
            base_weight: 90,
            data_limit_mb: None,
            is_primary: true,
        });
        cfg.members.push(MemberConfig {
            name: "sl".into(),
            interface: "wwan1".into(),
            class: MemberClass::Cellular,
            base_weight: 70,
            data_limit_mb: None,
            is_primary: false,
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateMember(_))));
    }

    #[test]
    fn ewma_alpha_tracks_window() {
        let cfg = Config::default();
        let alpha = cfg.ewma_alpha();
        assert!(alpha > 0.0 && alpha < 1.0);
    }

    #[test]
    fn from_toml_str_round_trips_a_valid_config() {
        let mut cfg = Config::default();
        cfg.members.push(MemberConfig {
            name: "sl".into(),
            interface: "wwan0".into(),
            class: MemberClass::Starlink,
            base_weight: 90,
            data_limit_mb: None,
            is_primary: true,
        });
        let text = toml::to_string(&cfg).expect("serializable");

        let parsed = Config::from_toml_str(&text).expect("valid config parses");
        assert_eq!(parsed.members.len(), 1);
        assert_eq!(parsed.members[0].name, "sl");
    }

    #[test]
    fn from_toml_str_rejects_malformed_toml() {
        assert!(matches!(Config::from_toml_str("not = [valid"), Err(ConfigError::InvalidToml(_))));
    }

    #[test]
    fn from_toml_str_rejects_a_validated_but_empty_config() {
        let text = toml::to_string(&Config::default()).expect("serializable");
        assert!(matches!(Config::from_toml_str(&text), Err(ConfigError::NoMembers)));
    }
}
