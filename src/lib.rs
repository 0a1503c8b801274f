//! Fleet autoscaler decision engine
//!
//! A run evaluates one scaling group: the node elects itself master (in
//! cluster mode), the configured plugins vote on the scaling direction, and
//! the executor applies the combined decision through the group's policies,
//! notifying webhooks around the policy call.

pub mod auth;
pub mod cloud;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod identity;
pub mod plugins;
pub mod runner;
pub mod scaling_group;
pub mod util;
pub mod webhook;

pub use decision::{HookType, NodeStatus, ScaleDirection, ScaleEvent};
pub use error::{AutoscaleError, AutoscaleResult};
pub use scaling_group::ScalingGroup;

/// Version banner printed at startup
pub fn version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
