//! Predictive Analysers: pure functions over telemetry, no
//! shared mutable state, invoked synchronously from the Decision Engine's
//! tick.

pub mod cellular;
pub mod starlink;
pub mod trend;
