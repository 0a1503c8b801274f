//! Decision plugins
//!
//! A plugin looks at one kind of signal and votes on the scaling direction
//! of a group. The set of plugins is closed: the configuration names them and
//! [`load_plugins`] resolves each name through a static registry.
//!
//! | name            | alias    | signal                                   |
//! |-----------------|----------|------------------------------------------|
//! | `agent_metrics` | `raxmon` | monitoring agent metric across servers   |
//! | `load_balancer` | `raxclb` | connection counts of the load balancers  |

pub mod agent_metrics;
pub mod load_balancer;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ScalingGroupConfig;
use crate::decision::{ScaleDirection, aggregate};
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::scaling_group::ScalingGroup;

pub const DEFAULT_MAX_SAMPLE: usize = 10;

/// A source of scaling votes
#[async_trait]
pub trait DecisionPlugin: Send + Sync {
    /// Canonical registry name
    fn name(&self) -> &'static str;

    /// Vote on the scaling direction of the group.
    ///
    /// Positive means up, negative down, zero steady. `None` abstains: the
    /// plugin had no data, which must not be mistaken for a steady vote.
    async fn make_decision(&self, group: &ScalingGroup) -> Option<i64>;
}

/// Run-wide options shared by all plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginOptions {
    /// Upper bound on the servers sampled per run
    pub max_sample: usize,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            max_sample: DEFAULT_MAX_SAMPLE,
        }
    }
}

type Constructor =
    fn(&ScalingGroupConfig, &Value, &PluginOptions) -> AutoscaleResult<Box<dyn DecisionPlugin>>;

const REGISTRY: &[(&str, Constructor)] = &[
    (agent_metrics::NAME, agent_metrics::AgentMetrics::from_config),
    ("raxmon", agent_metrics::AgentMetrics::from_config),
    (load_balancer::NAME, load_balancer::LoadBalancerPlugin::from_config),
    ("raxclb", load_balancer::LoadBalancerPlugin::from_config),
];

fn constructor(name: &str) -> Option<Constructor> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, constructor)| *constructor)
}

/// Names accepted in a group's `plugins` section.
pub fn registered_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Instantiate every plugin configured for the group.
///
/// An unknown name fails the whole load. Plugins come back in name order of
/// the configuration keys; votes are summed, so the order never changes the
/// decision.
pub fn load_plugins(
    config: &ScalingGroupConfig,
    options: &PluginOptions,
) -> AutoscaleResult<Vec<Box<dyn DecisionPlugin>>> {
    config
        .plugins
        .iter()
        .map(|(name, plugin_config)| {
            let constructor = constructor(name).ok_or_else(|| {
                AutoscaleError::config(format!(
                    "unknown plugin '{name}' in group '{}'",
                    config.name
                ))
            })?;
            debug!("loading plugin {name}");
            constructor(config, plugin_config, options)
        })
        .collect()
}

/// Ask every plugin for its vote, one after another.
pub async fn collect_votes(
    plugins: &[Box<dyn DecisionPlugin>],
    group: &ScalingGroup,
) -> Vec<Option<i64>> {
    let mut votes = Vec::with_capacity(plugins.len());
    for plugin in plugins {
        let vote = plugin.make_decision(group).await;
        match vote {
            Some(vote) => info!("plugin {} voted {vote}", plugin.name()),
            None => warn!("plugin {} had no data", plugin.name()),
        }
        votes.push(vote);
    }
    votes
}

/// Combined decision of all plugins; `None` when every plugin abstained.
pub async fn make_decision(
    plugins: &[Box<dyn DecisionPlugin>],
    group: &ScalingGroup,
) -> Option<ScaleDirection> {
    let votes = collect_votes(plugins, group).await;
    aggregate(votes)
}
