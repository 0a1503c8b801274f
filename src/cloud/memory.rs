//! In-memory cloud (no network)
//!
//! Holds scaling groups, servers, monitoring entities and load balancers in
//! memory. It's useful for:
//! - Testing the decision engine without a provider account
//! - Simulating a run against a hand-written fleet
//!
//! Every call is recorded in a [`CallLog`] so tests can assert which remote
//! operations a run performed (or did not perform).

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{
    Check, CheckSpec, CloudApi, CloudError, CloudResult, Entity, GroupState, LaunchConfig,
    LoadBalancerStats, MetricPoint, ScalingGroupInfo, ServerDetails, UsageRecord,
};

/// Record of the remote operations performed so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallLog {
    pub get_scaling_group: usize,
    pub get_group_state: usize,
    pub get_launch_config: usize,
    pub get_server: Vec<String>,
    pub list_entities: usize,
    pub list_checks: usize,
    pub created_checks: Vec<(String, CheckSpec)>,
    pub metric_queries: Vec<String>,
    pub load_balancer_lookups: Vec<u64>,
    pub executed_policies: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Inner {
    groups: HashMap<String, (ScalingGroupInfo, GroupState)>,
    launch_configs: HashMap<String, LaunchConfig>,
    servers: HashMap<String, ServerDetails>,
    entities: Vec<Entity>,
    checks: HashMap<String, Vec<Check>>,
    metrics: HashMap<String, Vec<MetricPoint>>,
    lb_stats: HashMap<u64, LoadBalancerStats>,
    lb_usage: HashMap<u64, Vec<UsageRecord>>,
    failing_servers: HashSet<String>,
    failing_load_balancers: HashSet<u64>,
    failing_state: bool,
    failing_policies: bool,
    next_check_id: usize,
    calls: CallLog,
}

#[derive(Debug, Default)]
pub struct InMemoryCloud {
    inner: Mutex<Inner>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a poisoned fixture only happens after a panicking test
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a scaling group with the given active servers (capacity follows the list).
    pub fn with_group(self, group_id: &str, active: &[&str]) -> Self {
        let state = GroupState {
            active: active.iter().map(|s| s.to_string()).collect(),
            active_capacity: active.len() as u32,
            pending_capacity: 0,
            desired_capacity: active.len() as u32,
            paused: false,
        };
        self.with_group_state(group_id, state)
    }

    pub fn with_group_state(self, group_id: &str, state: GroupState) -> Self {
        let info = ScalingGroupInfo {
            id: group_id.to_string(),
            name: Some(format!("group {group_id}")),
        };
        self.lock().groups.insert(group_id.to_string(), (info, state));
        self
    }

    pub fn with_launch_config(self, group_id: &str, launch: LaunchConfig) -> Self {
        self.lock()
            .launch_configs
            .insert(group_id.to_string(), launch);
        self
    }

    pub fn with_server(self, server: ServerDetails) -> Self {
        self.lock().servers.insert(server.id.clone(), server);
        self
    }

    /// Make every lookup of this server fail with a 500.
    pub fn with_failing_server(self, server_id: &str) -> Self {
        self.lock().failing_servers.insert(server_id.to_string());
        self
    }

    /// Make every usage lookup of this load balancer fail with a 500.
    pub fn with_failing_load_balancer(self, lb_id: u64) -> Self {
        self.lock().failing_load_balancers.insert(lb_id);
        self
    }

    /// Make group state lookups fail.
    pub fn with_failing_state(self) -> Self {
        self.lock().failing_state = true;
        self
    }

    /// Make policy execution fail.
    pub fn with_failing_policies(self) -> Self {
        self.lock().failing_policies = true;
        self
    }

    /// Add a monitoring entity for an agent; its entity id is `en-<agent_id>`.
    pub fn with_entity(self, agent_id: &str) -> Self {
        let entity = Entity {
            id: format!("en-{agent_id}"),
            label: format!("server-{agent_id}"),
            agent_id: Some(agent_id.to_string()),
            ip_addresses: HashMap::from([("private0_v4".to_string(), "10.0.0.1".to_string())]),
        };
        self.lock().entities.push(entity);
        self
    }

    pub fn with_check(self, entity_id: &str, check_type: &str) -> Self {
        {
            let mut inner = self.lock();
            inner.next_check_id += 1;
            let check = Check {
                id: format!("ch{}", inner.next_check_id),
                check_type: check_type.to_string(),
                label: None,
            };
            inner
                .checks
                .entry(entity_id.to_string())
                .or_default()
                .push(check);
        }
        self
    }

    /// Store metric averages for an entity, oldest first, one per minute up to now.
    pub fn with_metric_values(self, entity_id: &str, values: &[f64]) -> Self {
        let now = Utc::now();
        let count = values.len() as i64;
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &average)| MetricPoint {
                timestamp: now - Duration::seconds(60 * (count - 1 - i as i64)),
                average,
            })
            .collect();
        self.lock().metrics.insert(entity_id.to_string(), points);
        self
    }

    pub fn with_load_balancer(
        self,
        lb_id: u64,
        stats: LoadBalancerStats,
        usage: Vec<UsageRecord>,
    ) -> Self {
        {
            let mut inner = self.lock();
            inner.lb_stats.insert(lb_id, stats);
            inner.lb_usage.insert(lb_id, usage);
        }
        self
    }

    /// Snapshot of the calls performed so far.
    pub fn calls(&self) -> CallLog {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl CloudApi for InMemoryCloud {
    async fn get_scaling_group(&self, group_id: &str) -> CloudResult<ScalingGroupInfo> {
        let mut inner = self.lock();
        inner.calls.get_scaling_group += 1;
        inner
            .groups
            .get(group_id)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| CloudError::NotFound(format!("scaling group {group_id}")))
    }

    async fn get_group_state(&self, group_id: &str) -> CloudResult<GroupState> {
        let mut inner = self.lock();
        inner.calls.get_group_state += 1;
        if inner.failing_state {
            return Err(CloudError::Status {
                status: 500,
                body: "state unavailable".to_string(),
            });
        }
        inner
            .groups
            .get(group_id)
            .map(|(_, state)| state.clone())
            .ok_or_else(|| CloudError::NotFound(format!("scaling group {group_id}")))
    }

    async fn get_launch_config(&self, group_id: &str) -> CloudResult<LaunchConfig> {
        let mut inner = self.lock();
        inner.calls.get_launch_config += 1;
        Ok(inner
            .launch_configs
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_server(&self, server_id: &str) -> CloudResult<ServerDetails> {
        let mut inner = self.lock();
        inner.calls.get_server.push(server_id.to_string());
        if inner.failing_servers.contains(server_id) {
            return Err(CloudError::Status {
                status: 500,
                body: format!("server {server_id} unavailable"),
            });
        }
        inner
            .servers
            .get(server_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("server {server_id}")))
    }

    async fn list_entities(&self) -> CloudResult<Vec<Entity>> {
        let mut inner = self.lock();
        inner.calls.list_entities += 1;
        Ok(inner.entities.clone())
    }

    async fn list_checks(&self, entity_id: &str) -> CloudResult<Vec<Check>> {
        let mut inner = self.lock();
        inner.calls.list_checks += 1;
        Ok(inner.checks.get(entity_id).cloned().unwrap_or_default())
    }

    async fn create_check(&self, entity_id: &str, spec: &CheckSpec) -> CloudResult<()> {
        let mut inner = self.lock();
        debug!("in-memory cloud: creating {} check on {entity_id}", spec.check_type);
        inner
            .calls
            .created_checks
            .push((entity_id.to_string(), spec.clone()));
        inner.next_check_id += 1;
        let check = Check {
            id: format!("ch{}", inner.next_check_id),
            check_type: spec.check_type.clone(),
            label: Some(spec.label.clone()),
        };
        inner
            .checks
            .entry(entity_id.to_string())
            .or_default()
            .push(check);
        Ok(())
    }

    async fn get_metric_points(
        &self,
        entity_id: &str,
        _check_id: &str,
        _metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        points: u32,
    ) -> CloudResult<Vec<MetricPoint>> {
        let mut inner = self.lock();
        inner.calls.metric_queries.push(entity_id.to_string());
        let in_window: Vec<MetricPoint> = inner
            .metrics
            .get(entity_id)
            .map(|all| {
                all.iter()
                    .filter(|p| p.timestamp >= from && p.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let skip = in_window.len().saturating_sub(points as usize);
        Ok(in_window.into_iter().skip(skip).collect())
    }

    async fn get_load_balancer_stats(&self, lb_id: u64) -> CloudResult<LoadBalancerStats> {
        let mut inner = self.lock();
        inner.calls.load_balancer_lookups.push(lb_id);
        inner
            .lb_stats
            .get(&lb_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("load balancer {lb_id}")))
    }

    async fn get_load_balancer_usage(
        &self,
        lb_id: u64,
        _since: DateTime<Utc>,
    ) -> CloudResult<Vec<UsageRecord>> {
        let inner = self.lock();
        if inner.failing_load_balancers.contains(&lb_id) {
            return Err(CloudError::Status {
                status: 500,
                body: format!("load balancer {lb_id} unavailable"),
            });
        }
        inner
            .lb_usage
            .get(&lb_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("load balancer {lb_id}")))
    }

    async fn execute_policy(&self, group_id: &str, policy_id: &str) -> CloudResult<()> {
        let mut inner = self.lock();
        if inner.failing_policies {
            return Err(CloudError::Status {
                status: 403,
                body: "cooldown in effect".to_string(),
            });
        }
        inner
            .calls
            .executed_policies
            .push((group_id.to_string(), policy_id.to_string()));
        Ok(())
    }
}
