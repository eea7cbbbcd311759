//! Controller and Collector trait shapes.
//!
//! `async-trait` is used for object safety on stable Rust.

use async_trait::async_trait;

use crate::domain::Metrics;
use crate::error::{CollectorError, ControllerError};

/// Switches the active WAN member. The Decision Engine's daemon loop is the
/// only caller.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn switch(&self, from: Option<&str>, to: &str) -> Result<(), ControllerError>;
    async fn validate(&self, member: &str) -> Result<(), ControllerError>;
    fn get_members(&self) -> Vec<String>;
    fn get_current_member(&self) -> Option<String>;
}

/// Produces `Metrics` for one member. The Decision Engine never depends on a
/// concrete `Collector` — only on the samples it writes into the Telemetry
/// Store.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> Result<Metrics, CollectorError>;
    fn member_name(&self) -> &str;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::RwLock;

    /// In-memory `Controller` test seam: a pluggable observer for
    /// assertions.
    pub struct MockController {
        members: Vec<String>,
        current: RwLock<Option<String>>,
        pub fail_next_switch: RwLock<Option<ControllerError>>,
        pub switches: RwLock<Vec<(Option<String>, String)>>,
    }

    impl MockController {
        pub fn new(members: Vec<String>, current: Option<String>) -> Self {
            Self {
                members,
                current: RwLock::new(current),
                fail_next_switch: RwLock::new(None),
                switches: RwLock::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Controller for MockController {
        async fn switch(&self, from: Option<&str>, to: &str) -> Result<(), ControllerError> {
            if let Some(err) = self.fail_next_switch.write().take() {
                return Err(err);
            }
            self.switches.write().push((from.map(str::to_string), to.to_string()));
            *self.current.write() = Some(to.to_string());
            Ok(())
        }

        async fn validate(&self, member: &str) -> Result<(), ControllerError> {
            if self.members.iter().any(|m| m == member) {
                Ok(())
            } else {
                Err(ControllerError::Permanent(format!("unknown member {member}")))
            }
        }

        fn get_members(&self) -> Vec<String> {
            self.members.clone()
        }

        fn get_current_member(&self) -> Option<String> {
            self.current.read().clone()
        }
    }
}
