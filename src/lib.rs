//! Multi-WAN failover decision engine.
//!
//! Telemetry flows in through `telemetry::TelemetryStore`; `scoring` and
//! `predictive` turn it into health assessments; `weight` and `rules` adjust
//! member priority; `decision::DecisionEngine` ties it together into a
//! periodic tick that calls out to a `ports::Controller`.

pub mod config;
pub mod decision;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod monitor;
pub mod ports;
pub mod predictive;
pub mod rules;
pub mod scoring;
pub mod telemetry;
pub mod weight;

pub use config::Config;
pub use decision::DecisionEngine;
pub use domain::{Event, EventKind, Member, MemberClass, Metrics, Score};
pub use error::{CollectorError, ConfigError, ControllerError, TelemetryError};
pub use ingest::{IngestFull, IngestHandle};
pub use ports::{Collector, Controller};
pub use telemetry::TelemetryStore;
