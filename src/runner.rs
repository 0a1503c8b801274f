//! One evaluation of a scaling group, from election to policy execution

use tracing::{error, info, instrument};

use crate::decision::{NodeStatus, ScaleEvent};
use crate::error::AutoscaleError;
use crate::executor::ScalingExecutor;
use crate::plugins::{self, DecisionPlugin};
use crate::scaling_group::ScalingGroup;

/// Outcome of a run
#[derive(Debug)]
pub struct RunOutcome {
    pub event: ScaleEvent,
    /// Election result; `None` when not running in cluster mode
    pub node_status: Option<NodeStatus>,
    /// Why the run ended in an error, when known
    pub cause: Option<AutoscaleError>,
}

impl RunOutcome {
    fn new(event: ScaleEvent) -> Self {
        Self {
            event,
            node_status: None,
            cause: None,
        }
    }

    fn failed(cause: AutoscaleError) -> Self {
        Self {
            event: ScaleEvent::Error,
            node_status: None,
            cause: Some(cause),
        }
    }

    /// Whether the process should report success.
    ///
    /// A slave has nothing to do and succeeds; a node that could not be
    /// classified fails.
    pub fn is_success(&self) -> bool {
        match self.event {
            ScaleEvent::Success | ScaleEvent::NoAction => true,
            ScaleEvent::NotMaster => self.node_status == Some(NodeStatus::Slave),
            ScaleEvent::Error => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Drives one evaluation of a group
pub struct Autoscaler {
    plugins: Vec<Box<dyn DecisionPlugin>>,
    executor: ScalingExecutor,
    cluster: bool,
}

impl Autoscaler {
    pub fn new(
        plugins: Vec<Box<dyn DecisionPlugin>>,
        executor: ScalingExecutor,
        cluster: bool,
    ) -> Self {
        Self {
            plugins,
            executor,
            cluster,
        }
    }

    async fn log_membership(&self, group: &ScalingGroup) {
        let mut members = Vec::new();
        for server_id in group.active_servers().await {
            let name = group.server_name(server_id).await.unwrap_or_default();
            members.push(format!("({name}, {server_id})"));
        }
        info!("server(s) in scaling group: {}", members.join(", "));

        if let Some(state) = group.state().await {
            info!("current active servers: {}", state.active_capacity);
        }
    }

    #[instrument(skip_all, fields(group = %group.name(), cluster = self.cluster))]
    pub async fn run(&self, group: &ScalingGroup) -> RunOutcome {
        if group.state().await.is_none() {
            error!("scaling group '{}' is unavailable", group.group_id());
            return RunOutcome::new(ScaleEvent::Error);
        }

        self.log_membership(group).await;

        info!("cluster mode enabled: {}", self.cluster);
        let mut node_status = None;
        if self.cluster {
            let status = group.is_master().await;
            node_status = Some(status);
            match status {
                NodeStatus::Master => {}
                NodeStatus::Slave => {
                    return RunOutcome {
                        event: ScaleEvent::NotMaster,
                        node_status,
                        cause: None,
                    };
                }
                NodeStatus::Unknown => {
                    return RunOutcome {
                        event: ScaleEvent::NotMaster,
                        node_status,
                        cause: Some(AutoscaleError::ElectionIndeterminate),
                    };
                }
            }
        }

        let Some(direction) = plugins::make_decision(&self.plugins, group).await else {
            error!("no plugin returned data, unable to decide");
            return RunOutcome {
                node_status,
                ..RunOutcome::failed(AutoscaleError::NoData)
            };
        };
        info!("combined decision: {direction}");

        RunOutcome {
            node_status,
            ..RunOutcome::new(self.executor.execute(group, direction).await)
        }
    }
}
