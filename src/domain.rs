//! Core data model: Member, Metrics, Score, Sample, Event and the small
//! supporting types shared by every other module.
//!
//! Metrics fields are `Option<T>` rather than numeric sentinels so "unknown"
//! can never be confused with a real zero reading (spec Design Note:
//! optional pointer fields as sentinels must become tagged variants).

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed tagged variant over uplink class. Collapses the source's two
/// parallel Starlink class enums into one (see DESIGN.md Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberClass {
    Starlink,
    Cellular,
    WiFi,
    Lan,
}

impl MemberClass {
    /// Default tie-break priority: Starlink > Cellular > Wi-Fi > LAN.
    /// Lower value wins ties. Operator-overridable via `Config`.
    pub fn default_priority(self) -> u8 {
        match self {
            MemberClass::Starlink => 0,
            MemberClass::Cellular => 1,
            MemberClass::WiFi => 2,
            MemberClass::Lan => 3,
        }
    }
}

/// A configured uplink. Identity is `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub interface: String,
    pub class: MemberClass,
    pub base_weight: u8,
    pub data_limit: Option<DataLimit>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLimit {
    pub cap_mb: u64,
    pub used_mb: u64,
}

impl DataLimit {
    pub fn usage_ratio(&self) -> f64 {
        if self.cap_mb == 0 {
            return 0.0;
        }
        (self.used_mb as f64 / self.cap_mb as f64).clamp(0.0, 1.0)
    }
}

/// Network access technology generation, used for scoring bonuses/penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    G5,
    Lte,
    G3,
    G2,
}

impl NetworkType {
    pub fn from_label(label: &str) -> Option<Self> {
        let upper = label.to_ascii_uppercase();
        if upper.contains("5G") {
            Some(NetworkType::G5)
        } else if upper.contains("LTE") || upper.contains("4G") {
            Some(NetworkType::Lte)
        } else if upper.contains("UMTS") || upper.contains("3G") || upper.contains("HSPA") {
            Some(NetworkType::G3)
        } else if upper.contains("GSM") || upper.contains("2G") || upper.contains("EDGE") {
            Some(NetworkType::G2)
        } else {
            None
        }
    }

    /// Additive bonus/penalty to the final score.
    pub fn score_bonus(self) -> f64 {
        match self {
            NetworkType::G5 => 15.0,
            NetworkType::Lte => 10.0,
            NetworkType::G3 => 0.0,
            NetworkType::G2 => -20.0,
        }
    }
}

/// A telemetry snapshot. Every field is optional: missing means unknown and
/// never contributes zero to scoring. Immutable once recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub latency_ms: Option<f64>,
    pub loss_pct: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub throughput_kbps: Option<f64>,

    pub rsrp: Option<f64>,
    pub rsrq: Option<f64>,
    pub sinr: Option<f64>,
    pub signal_variance: Option<f64>,
    pub cell_changes: Option<u32>,
    pub cell_id: Option<String>,
    pub network_type: Option<String>,
    pub band: Option<String>,

    pub obstruction_pct: Option<f64>,
    pub outages: Option<u32>,
    pub thermal_throttle: Option<bool>,
    pub thermal_shutdown: Option<bool>,
    pub roaming: Option<bool>,
}

/// Letter grade derived monotonically from `Score::final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    F,
    D,
    C,
    CPlus,
    B,
    BPlus,
    A,
    APlus,
}

impl Grade {
    pub fn from_final(final_score: f64) -> Self {
        if final_score >= 95.0 {
            Grade::APlus
        } else if final_score >= 90.0 {
            Grade::A
        } else if final_score >= 85.0 {
            Grade::BPlus
        } else if final_score >= 80.0 {
            Grade::B
        } else if final_score >= 75.0 {
            Grade::CPlus
        } else if final_score >= 70.0 {
            Grade::C
        } else if final_score >= 60.0 {
            Grade::D
        } else {
            Grade::F
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub signal: f64,
    pub connectivity: f64,
    pub stability: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreAdjustments {
    pub network_type_bonus: f64,
    pub variance_penalty: f64,
    pub handoff_penalty: f64,
    pub throughput_penalty: f64,
}

/// Composite health score in [0,100], produced by the Scoring component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub instant: f64,
    pub ewma: f64,
    pub r#final: f64,
    pub grade: Grade,
    pub components: ScoreComponents,
    pub bonuses: ScoreAdjustments,
    pub penalties: ScoreAdjustments,
}

/// An append-only telemetry entry.
#[derive(Debug, Clone)]
pub struct Sample {
    pub member: String,
    pub timestamp: Instant,
    pub metrics: Metrics,
    pub score: Option<Score>,
}

/// Kind tag for Events, enumerated per the spec's Design Note ("string-typed
/// recommendation and status fields -> enumerate them").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Switch,
    SwitchFailed,
    SwitchSuppressed,
    InsufficientData,
    MemberDemoted,
    WeightAdjusted,
    ResourcePressure,
}

/// An append-only, decision- or state-relevant occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub member: Option<String>,
    pub reason: String,
    pub detail: String,
}

impl Event {
    pub fn new(kind: EventKind, member: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            member,
            reason: reason.into(),
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Per-class cellular health verdict. Derived, never stored beyond one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellularStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendAction {
    None,
    Monitor,
    PrepareFailover,
    FailoverNow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub score: f64,
    pub status: CellularStatus,
    pub predictive_risk: f64,
    pub recommend_action: RecommendAction,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
    InsufficientData,
}

/// Per-member rolling trend state, recomputed each tick from the window.
#[derive(Debug, Clone)]
pub struct TrendState {
    pub latency_slope: Option<f64>,
    pub loss_slope: Option<f64>,
    pub signal_slope: Option<f64>,
    pub stddev_latency: Option<f64>,
    pub last_update: Instant,
}

impl TrendState {
    pub fn empty(now: Instant) -> Self {
        Self {
            latency_slope: None,
            loss_slope: None,
            signal_slope: None,
            stddev_latency: None,
            last_update: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentType {
    Penalty,
    Boost,
}

/// A named, time-bounded delta to a member's weight.
#[derive(Debug, Clone)]
pub struct WeightAdjustment {
    pub member: String,
    pub amount: f64,
    pub reason: String,
    pub kind: AdjustmentType,
    pub expires_at: Instant,
}

impl WeightAdjustment {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Signed contribution to the aggregate adjustment: penalties never
    /// raise, boosts never lower.
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            AdjustmentType::Penalty => -self.amount.abs(),
            AdjustmentType::Boost => self.amount.abs(),
        }
    }
}

/// Derived per-member health state (not persisted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Unknown,
    Healthy,
    Degraded,
    Failed,
}
