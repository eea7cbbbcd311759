//! Typed error taxonomy for the decision engine.
//!
//! Mirrors the error kinds enumerated in the specification: configuration
//! errors are fatal at startup, telemetry/resource errors are recoverable,
//! and controller/collector errors are classified transient vs. permanent so
//! callers know whether to retry next tick or take the member out of
//! rotation.

use thiserror::Error;

/// Raised by configuration loading/validation. Fatal at startup; surfaced as
/// a rejected update at reconfiguration time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate member name: {0}")]
    DuplicateMember(String),

    #[error("unknown member class: {0}")]
    UnknownClass(String),

    #[error("base_weight for {member} out of range [0,100]: {value}")]
    WeightOutOfRange { member: String, value: u8 },

    #[error("retention_hours out of range [1,168]: {0}")]
    RetentionOutOfRange(u32),

    #[error("max_ram_mb out of range [1,128]: {0}")]
    RamBudgetOutOfRange(u32),

    #[error("no members configured")]
    NoMembers,

    #[error("failed to parse TOML configuration: {0}")]
    InvalidToml(String),
}

/// Raised by the telemetry store. Resource pressure is handled internally
/// (downsample, then evict) and never surfaces as an error; this variant is
/// for genuinely rejected (oversized) configurations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("unknown member: {0}")]
    UnknownMember(String),

    #[error("store configuration rejected: {0}")]
    InvalidConfiguration(String),
}

/// Classification for errors raised by the external routing `Controller`.
#[derive(Debug, Error, Clone)]
pub enum ControllerError {
    #[error("controller transient error: {0}")]
    Transient(String),

    #[error("controller permanent error: {0}")]
    Permanent(String),
}

impl ControllerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ControllerError::Permanent(_))
    }
}

/// Classification for errors raised by a `Collector`.
#[derive(Debug, Error, Clone)]
pub enum CollectorError {
    #[error("collector transient error: {0}")]
    Transient(String),

    #[error("collector permanent error: {0}")]
    Permanent(String),
}

impl CollectorError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, CollectorError::Permanent(_))
    }
}
