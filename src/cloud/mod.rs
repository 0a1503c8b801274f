//! Cloud capabilities consumed by the decision engine
//!
//! The engine never talks to a provider SDK directly. Everything it needs is
//! expressed by the [`CloudApi`] trait:
//!
//! - **Autoscale**: scaling group, its state and launch configuration, policy execution
//! - **Compute**: server details (name and network map)
//! - **Monitoring**: entities, checks and metric data points
//! - **Load balancers**: live stats and usage history
//!
//! ## Implementations
//!
//! - [`rackspace::RackspaceCloud`]: REST binding using endpoints from the identity catalog
//! - [`memory::InMemoryCloud`]: in-memory fixture with call counters, for tests and simulation

pub mod memory;
pub mod rackspace;

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Error)]
pub enum CloudError {
    /// Transport failure (connect, timeout, TLS)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body did not have the expected shape
    #[error("unable to decode response: {0}")]
    Decode(String),

    /// The service catalog has no endpoint for a service in this region
    #[error("no endpoint for service '{0}' in the service catalog")]
    MissingEndpoint(String),
}

/// The remote scaling group object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingGroupInfo {
    pub id: String,
    pub name: Option<String>,
}

/// Snapshot of a scaling group's membership and capacities
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupState {
    /// Server ids currently in service, in the order the API returns them
    pub active: Vec<String>,
    pub active_capacity: u32,
    pub pending_capacity: u32,
    pub desired_capacity: u32,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub load_balancers: Vec<LoadBalancerRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerRef {
    pub load_balancer_id: u64,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerDetails {
    pub id: String,
    pub name: String,
    /// Network name ("public", "private", ...) to addresses
    pub networks: HashMap<String, Vec<IpAddr>>,
}

impl ServerDetails {
    pub fn addresses(&self) -> impl Iterator<Item = &IpAddr> {
        self.networks.values().flatten()
    }
}

/// A monitored host, keyed by the agent id (which equals the server id)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    pub id: String,
    pub label: String,
    pub agent_id: Option<String>,
    /// Address alias ("public0_v4", ...) to address
    pub ip_addresses: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub id: String,
    pub check_type: String,
    pub label: Option<String>,
}

/// Parameters for creating a monitoring check on an entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSpec {
    pub label: String,
    #[serde(rename = "type")]
    pub check_type: String,
    pub details: serde_json::Value,
    pub period: u32,
    pub timeout: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub average: f64,
}

/// Live connection counters of a load balancer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadBalancerStats {
    pub current_conn: f64,
    pub current_conn_ssl: f64,
}

/// One historical usage record of a load balancer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UsageRecord {
    pub average_num_connections: f64,
    pub average_num_connections_ssl: f64,
}

/// Everything the decision engine needs from the cloud provider
///
/// Implementations must be `Send + Sync`; a run only ever calls them
/// sequentially, one request at a time.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn get_scaling_group(&self, group_id: &str) -> CloudResult<ScalingGroupInfo>;

    async fn get_group_state(&self, group_id: &str) -> CloudResult<GroupState>;

    async fn get_launch_config(&self, group_id: &str) -> CloudResult<LaunchConfig>;

    async fn get_server(&self, server_id: &str) -> CloudResult<ServerDetails>;

    async fn list_entities(&self) -> CloudResult<Vec<Entity>>;

    async fn list_checks(&self, entity_id: &str) -> CloudResult<Vec<Check>>;

    async fn create_check(&self, entity_id: &str, spec: &CheckSpec) -> CloudResult<()>;

    async fn get_metric_points(
        &self,
        entity_id: &str,
        check_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        points: u32,
    ) -> CloudResult<Vec<MetricPoint>>;

    async fn get_load_balancer_stats(&self, lb_id: u64) -> CloudResult<LoadBalancerStats>;

    async fn get_load_balancer_usage(
        &self,
        lb_id: u64,
        since: DateTime<Utc>,
    ) -> CloudResult<Vec<UsageRecord>>;

    async fn execute_policy(&self, group_id: &str, policy_id: &str) -> CloudResult<()>;
}
