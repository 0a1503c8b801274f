use tracing::{info, instrument, warn};

use crate::decision::{HookType, ScaleDirection, ScaleEvent};
use crate::scaling_group::ScalingGroup;

/// Turns a decision into a policy execution wrapped in webhooks
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalingExecutor {
    dry_run: bool,
}

impl ScalingExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Apply a direction to the group.
    ///
    /// A group is never scaled down below one active server, nor when its
    /// state is unavailable. In dry-run mode
    /// nothing remote is touched, webhooks included.
    #[instrument(skip(self, group), fields(group = %group.name(), dry_run = self.dry_run))]
    pub async fn execute(&self, group: &ScalingGroup, direction: ScaleDirection) -> ScaleEvent {
        if direction == ScaleDirection::Nothing {
            info!("cluster within target parameters, no action");
            return ScaleEvent::NoAction;
        }

        if direction == ScaleDirection::Down && group.active_servers().await.len() <= 1 {
            warn!("scale down requested but at most one active server known, no action");
            return ScaleEvent::NoAction;
        }

        let Some(policy_id) = group.config().policy_for(direction) else {
            return ScaleEvent::NoAction;
        };

        if self.dry_run {
            info!("dry run: would execute policy {policy_id} to scale {direction}");
            return ScaleEvent::Success;
        }

        info!("scaling {direction} using policy {policy_id}");
        group.execute_webhook(direction, HookType::Pre).await;

        let event = group.execute_policy(direction).await;
        if event == ScaleEvent::Success {
            group.execute_webhook(direction, HookType::Post).await;
        }
        event
    }
}
