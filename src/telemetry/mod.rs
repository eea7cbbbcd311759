//! Telemetry Store: bounded per-member sample rings and a
//! shared event ring, owned exclusively by this module. Pure data; no
//! policy.

pub(crate) mod ring;
mod store;

pub use store::TelemetryStore;
