//! Adaptive Monitor Controller: selects a probing mode and emits
//! ping/API-call policy for Collectors to honour.
//!
//! Interval selection is driven purely by policy thresholds; no internal
//! state.

use crate::domain::DataLimit;

const DISABLED_THRESHOLD: f64 = 0.95;
const EMERGENCY_THRESHOLD: f64 = 0.85;
const STANDBY_THRESHOLD: f64 = 0.50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Active,
    Standby,
    Emergency,
    Disabled,
}

impl MonitorMode {
    pub fn probe_interval_secs(self) -> u64 {
        match self {
            MonitorMode::Active => 5,
            MonitorMode::Standby => 60,
            MonitorMode::Emergency => 300,
            MonitorMode::Disabled => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub mode: MonitorMode,
    pub ping_size_bytes: u16,
    pub skip_location_calls: bool,
}

/// Select the monitor mode and derived probe policy for one member.
///
/// `data_limit` is `None` when the member has no data cap, which always
/// selects `Active` regardless of `is_primary`.
pub fn select(data_limit: Option<&DataLimit>, is_primary: bool) -> ProbePolicy {
    let mode = match data_limit {
        None => MonitorMode::Active,
        Some(limit) => {
            let usage = limit.usage_ratio();
            if usage >= DISABLED_THRESHOLD {
                MonitorMode::Disabled
            } else if usage >= EMERGENCY_THRESHOLD {
                MonitorMode::Emergency
            } else if usage >= STANDBY_THRESHOLD && !is_primary {
                MonitorMode::Standby
            } else {
                MonitorMode::Active
            }
        }
    };

    let ping_size_bytes = match mode {
        MonitorMode::Active => 64,
        _ => 8,
    };

    ProbePolicy {
        mode,
        ping_size_bytes,
        skip_location_calls: matches!(mode, MonitorMode::Standby | MonitorMode::Emergency | MonitorMode::Disabled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(cap_mb: u64, used_mb: u64) -> DataLimit {
        DataLimit { cap_mb, used_mb }
    }

    #[test]
    fn no_cap_is_always_active() {
        let policy = select(None, false);
        assert_eq!(policy.mode, MonitorMode::Active);
        assert_eq!(policy.ping_size_bytes, 64);
    }

    #[test]
    fn usage_above_disabled_threshold_disables_probing() {
        let l = limit(1000, 960);
        let policy = select(Some(&l), false);
        assert_eq!(policy.mode, MonitorMode::Disabled);
        assert_eq!(policy.ping_size_bytes, 8);
    }

    #[test]
    fn usage_above_emergency_threshold_selects_emergency() {
        let l = limit(1000, 900);
        assert_eq!(select(Some(&l), false).mode, MonitorMode::Emergency);
    }

    #[test]
    fn standby_only_applies_to_non_primary_members() {
        let l = limit(1000, 600);
        assert_eq!(select(Some(&l), false).mode, MonitorMode::Standby);
        assert_eq!(select(Some(&l), true).mode, MonitorMode::Active);
    }

    #[test]
    fn low_usage_selects_active() {
        let l = limit(1000, 100);
        assert_eq!(select(Some(&l), false).mode, MonitorMode::Active);
    }
}
