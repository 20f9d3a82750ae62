//! Driving cycles: the action executor, the iteration controller and the cycle driver.

pub mod cycle_driver;
pub mod executor;
pub mod iteration;

use std::time::Duration;

use crate::retry::RetryPolicy;

pub use cycle_driver::CycleDriver;
pub use executor::{ActionExecutor, Attempt, Checkpoint, Invocation, renewing};
pub use iteration::IterationController;

/// Bounds and timings for a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub retry: RetryPolicy,
    /// Lease lifetime; renewed on every commit and every ttl/3 while waiting
    pub lease_ttl: Duration,
    /// Per-action timeout for a single collaborator call
    pub action_timeout: Duration,
    /// Pause before each remediation attempt
    pub iteration_cooldown: Duration,
    /// Collaborator calls allowed per cycle, retries included
    pub max_actions: Option<u32>,
    /// Wall-clock bound per cycle, from creation
    pub deadline: Option<Duration>,
    /// Post CI summaries and reviews on the PR
    pub post_comments: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lease_ttl: Duration::from_secs(900),
            action_timeout: Duration::from_secs(600),
            iteration_cooldown: Duration::from_secs(1),
            max_actions: None,
            deadline: None,
            post_comments: true,
        }
    }
}
