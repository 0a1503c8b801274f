//! Votes on the connection load of the group's load balancers

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::cloud::{CloudError, LoadBalancerStats, UsageRecord};
use crate::config::ScalingGroupConfig;
use crate::decision::threshold_vote;
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::scaling_group::ScalingGroup;

use super::{DecisionPlugin, PluginOptions};

pub const NAME: &str = "load_balancer";

/// Weight of the live connection count against the historical mean
const CURRENT_WEIGHT: f64 = 1.5;

fn default_scale_up_threshold() -> f64 {
    50.0
}

fn default_scale_down_threshold() -> f64 {
    1.0
}

fn default_check_time() -> i64 {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadBalancerSettings {
    /// Load balancers to check; empty means those of the launch configuration
    #[serde(default, rename = "loadbalancers")]
    pub load_balancers: Vec<u64>,

    /// `SSL` selects the SSL connection counters
    #[serde(default)]
    pub check_type: String,

    /// Connections per active server
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,

    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,

    /// Hours of usage history blended with the live count
    #[serde(default = "default_check_time")]
    pub check_time: i64,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self {
            load_balancers: Vec::new(),
            check_type: String::new(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            check_time: default_check_time(),
        }
    }
}

impl LoadBalancerSettings {
    pub fn is_ssl(&self) -> bool {
        self.check_type.eq_ignore_ascii_case("ssl")
    }

    /// Usage history window; `None` unless `check_time` is a positive
    /// number of hours that fits a duration.
    pub fn history_window(&self) -> Option<Duration> {
        if self.check_time <= 0 {
            return None;
        }
        Duration::try_hours(self.check_time)
    }

    fn current(&self, stats: &LoadBalancerStats) -> f64 {
        if self.is_ssl() {
            stats.current_conn_ssl
        } else {
            stats.current_conn
        }
    }

    fn historical(&self, record: &UsageRecord) -> f64 {
        if self.is_ssl() {
            record.average_num_connections_ssl
        } else {
            record.average_num_connections
        }
    }
}

/// Live connections blended with the historical mean.
///
/// Without history the live count is used as is.
pub fn blended_connections(current: f64, history: &[f64]) -> f64 {
    if history.is_empty() {
        return current;
    }

    let mean = history.iter().sum::<f64>() / history.len() as f64;
    (current * CURRENT_WEIGHT + mean) / 2.0
}

#[derive(Debug, Clone)]
pub struct LoadBalancerPlugin {
    settings: LoadBalancerSettings,
}

impl LoadBalancerPlugin {
    pub fn new(settings: LoadBalancerSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(
        config: &ScalingGroupConfig,
        plugin_config: &Value,
        _options: &PluginOptions,
    ) -> AutoscaleResult<Box<dyn DecisionPlugin>> {
        let settings = match plugin_config {
            Value::Null => LoadBalancerSettings::default(),
            value => serde_json::from_value(value.clone()).map_err(|e| {
                AutoscaleError::config(format!(
                    "invalid {NAME} settings in group '{}': {e}",
                    config.name
                ))
            })?,
        };
        if settings.history_window().is_none() {
            return Err(AutoscaleError::config(format!(
                "invalid {NAME} check_time {} in group '{}', expected a positive number of hours",
                settings.check_time, config.name
            )));
        }
        Ok(Box::new(Self::new(settings)))
    }

    pub fn settings(&self) -> &LoadBalancerSettings {
        &self.settings
    }

    /// Configured ids, else those attached through the launch configuration.
    async fn load_balancer_ids(&self, group: &ScalingGroup) -> Vec<u64> {
        if !self.settings.load_balancers.is_empty() {
            return self.settings.load_balancers.clone();
        }

        group
            .launch_config()
            .await
            .map(|launch| {
                launch
                    .load_balancers
                    .iter()
                    .map(|lb| lb.load_balancer_id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DecisionPlugin for LoadBalancerPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(plugin = NAME, group = %group.name()))]
    async fn make_decision(&self, group: &ScalingGroup) -> Option<i64> {
        let lb_ids = self.load_balancer_ids(group).await;
        if lb_ids.is_empty() {
            error!(
                "no load balancer found, please either define a load balancer \
                 to check or add one to the scaling group"
            );
            return None;
        }

        let Some(state) = group.state().await else {
            error!("group state unavailable, unable to scale thresholds");
            return None;
        };
        let capacity = f64::from(state.active_capacity);
        let scale_up = self.settings.scale_up_threshold * capacity;
        let scale_down = self.settings.scale_down_threshold * capacity;

        let since = self
            .settings
            .history_window()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let Some(since) = since else {
            error!("invalid check_time {}", self.settings.check_time);
            return None;
        };

        let cloud = group.cloud();
        let mut total = 0;
        let mut answered = 0;

        for lb_id in lb_ids {
            let lookup = async {
                let usage = cloud.get_load_balancer_usage(lb_id, since).await?;
                let stats = cloud.get_load_balancer_stats(lb_id).await?;
                Ok::<_, CloudError>((usage, stats))
            };

            let (usage, stats) = match lookup.await {
                Ok(found) => found,
                Err(CloudError::NotFound(_)) => {
                    error!("load balancer {lb_id} does not exist");
                    return None;
                }
                Err(e) => {
                    warn!("unable to check load balancer {lb_id}, skipping: {e}");
                    continue;
                }
            };

            let history: Vec<f64> = usage
                .iter()
                .map(|record| self.settings.historical(record))
                .collect();
            let connections = blended_connections(self.settings.current(&stats), &history);

            let vote = threshold_vote(connections, scale_up, scale_down);
            match vote {
                1 => info!("load balancer {lb_id} reports scale up ({connections})"),
                -1 => info!("load balancer {lb_id} reports scale down ({connections})"),
                _ => info!("load balancer {lb_id} reports normal ({connections})"),
            }
            total += vote;
            answered += 1;
        }

        if answered == 0 {
            error!("no load balancer could be checked");
            return None;
        }
        Some(total)
    }
}
