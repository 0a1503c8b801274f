//! Handle on one scaling group for the duration of a run
//!
//! All remote state is fetched lazily and memoized in a
//! `OnceCell<Option<T>>`. The first outcome sticks for the life of the
//! handle, failures included: every decision of a run is made against one
//! snapshot, and a failed lookup is not retried. A long-running process
//! would need a fresh handle per evaluation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::cloud::{CloudApi, GroupState, LaunchConfig, ScalingGroupInfo, ServerDetails};
use crate::config::ScalingGroupConfig;
use crate::decision::{HookType, NodeStatus, ScaleDirection, ScaleEvent};
use crate::error::AutoscaleError;
use crate::identity::IdentityResolver;
use crate::webhook::WebhookNotifier;

/// Per-run cache of server details, failures included
#[derive(Debug, Default)]
pub struct ServerCache {
    entries: Mutex<HashMap<String, Option<ServerDetails>>>,
}

impl ServerCache {
    fn get(&self, server_id: &str) -> Option<Option<ServerDetails>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(server_id)
            .cloned()
    }

    fn insert(&self, server_id: &str, details: Option<ServerDetails>) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(server_id.to_string(), details);
    }
}

pub struct ScalingGroup {
    config: ScalingGroupConfig,
    cloud: Arc<dyn CloudApi>,
    identity: IdentityResolver,
    webhooks: WebhookNotifier,

    remote_group: OnceCell<Option<ScalingGroupInfo>>,
    state: OnceCell<Option<GroupState>>,
    launch_config: OnceCell<Option<LaunchConfig>>,
    node_id: OnceCell<Option<Uuid>>,
    servers: ServerCache,
}

impl ScalingGroup {
    pub fn new(
        config: ScalingGroupConfig,
        cloud: Arc<dyn CloudApi>,
        webhooks: WebhookNotifier,
    ) -> Self {
        Self {
            config,
            cloud,
            identity: IdentityResolver::default(),
            webhooks,
            remote_group: OnceCell::new(),
            state: OnceCell::new(),
            launch_config: OnceCell::new(),
            node_id: OnceCell::new(),
            servers: ServerCache::default(),
        }
    }

    pub fn with_identity_resolver(mut self, identity: IdentityResolver) -> Self {
        self.identity = identity;
        self
    }

    /// Name of the group in the configuration file
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn group_id(&self) -> &str {
        &self.config.group_id
    }

    pub fn config(&self) -> &ScalingGroupConfig {
        &self.config
    }

    pub fn cloud(&self) -> &dyn CloudApi {
        self.cloud.as_ref()
    }

    pub async fn remote_group(&self) -> Option<&ScalingGroupInfo> {
        self.remote_group
            .get_or_init(|| async {
                match self.cloud.get_scaling_group(&self.config.group_id).await {
                    Ok(group) => Some(group),
                    Err(e) => {
                        error!(
                            "unable to get scaling group '{}': {e}",
                            self.config.group_id
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    pub async fn state(&self) -> Option<&GroupState> {
        self.state
            .get_or_init(|| async {
                if self.remote_group().await.is_none() {
                    return None;
                }
                match self.cloud.get_group_state(&self.config.group_id).await {
                    Ok(state) => Some(state),
                    Err(e) => {
                        error!("unable to get state of '{}': {e}", self.config.group_id);
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    pub async fn launch_config(&self) -> Option<&LaunchConfig> {
        self.launch_config
            .get_or_init(|| async {
                if self.remote_group().await.is_none() {
                    return None;
                }
                match self.cloud.get_launch_config(&self.config.group_id).await {
                    Ok(launch) => Some(launch),
                    Err(e) => {
                        error!(
                            "unable to get launch config of '{}': {e}",
                            self.config.group_id
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Active server ids; empty when the state is unavailable.
    pub async fn active_servers(&self) -> &[String] {
        self.state()
            .await
            .map(|state| state.active.as_slice())
            .unwrap_or(&[])
    }

    /// Server details, fetched once per run.
    pub async fn server(&self, server_id: &str) -> Option<ServerDetails> {
        if let Some(cached) = self.servers.get(server_id) {
            return cached;
        }

        let details = match self.cloud.get_server(server_id).await {
            Ok(details) => Some(details),
            Err(e) => {
                error!("{}", AutoscaleError::remote(format!("server {server_id}"), e));
                None
            }
        };
        self.servers.insert(server_id, details.clone());
        details
    }

    pub async fn server_name(&self, server_id: &str) -> Option<String> {
        self.server(server_id).await.map(|server| server.name)
    }

    /// Id of the server this process runs on, resolved once.
    pub async fn node_id(&self) -> Option<Uuid> {
        *self
            .node_id
            .get_or_init(|| self.identity.resolve(self))
            .await
    }

    /// Run the master election for this node.
    #[instrument(skip(self), fields(group = %self.config.name))]
    pub async fn is_master(&self) -> NodeStatus {
        let Some(node_id) = self.node_id().await else {
            error!("failed to get server uuid");
            return NodeStatus::Unknown;
        };

        let status = elect(&node_id, self.active_servers().await);
        match status {
            NodeStatus::Master => info!("node is a master, continuing"),
            NodeStatus::Slave => info!("node is not a master, nothing to do"),
            NodeStatus::Unknown => error!("unknown cluster state"),
        }
        status
    }

    /// Execute the group's policy for a direction.
    #[instrument(skip(self), fields(group = %self.config.name))]
    pub async fn execute_policy(&self, direction: ScaleDirection) -> ScaleEvent {
        let Some(policy_id) = self.config.policy_for(direction) else {
            return ScaleEvent::NoAction;
        };

        match self
            .cloud
            .execute_policy(&self.config.group_id, policy_id)
            .await
        {
            Ok(()) => {
                debug!("policy {policy_id} executed");
                ScaleEvent::Success
            }
            Err(source) => {
                let e = AutoscaleError::PolicyExecution {
                    policy_id: policy_id.to_string(),
                    source,
                };
                error!("error scaling {direction}: {e}");
                ScaleEvent::Error
            }
        }
    }

    pub async fn execute_webhook(&self, direction: ScaleDirection, hook: HookType) {
        self.webhooks.notify(&self.config, direction, hook).await;
    }
}

/// Classify a node against the active list.
///
/// The first active server, or the first two when there are several, are
/// masters. The remote API's ordering is the only tie-break; no active
/// server means the cluster state is unknown.
pub fn elect(node_id: &Uuid, active: &[String]) -> NodeStatus {
    if active.is_empty() {
        return NodeStatus::Unknown;
    }

    let masters = &active[..active.len().min(2)];
    let is_master = masters
        .iter()
        .any(|master| Uuid::parse_str(master).is_ok_and(|id| id == *node_id));

    if is_master {
        NodeStatus::Master
    } else {
        NodeStatus::Slave
    }
}
