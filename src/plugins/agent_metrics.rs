//! Votes on the average of a monitoring agent metric across the group
//!
//! Every active server's monitoring entity gets a check of the configured
//! type (created on first use). The latest point of the metric is sampled
//! from up to `max_sample` entities, visited in random order so successive
//! runs spread their API calls over the whole group.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::cloud::{CheckSpec, CloudApi, Entity};
use crate::config::{
    DEFAULT_CHECK_TYPE, DEFAULT_METRIC_NAME, DEFAULT_SCALE_DOWN_THRESHOLD,
    DEFAULT_SCALE_UP_THRESHOLD, MetricSettings, ScalingGroupConfig,
};
use crate::decision::threshold_vote;
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::scaling_group::ScalingGroup;

use super::{DecisionPlugin, PluginOptions};

pub const NAME: &str = "agent_metrics";

const CONFIG_KEYS: [&str; 2] = [NAME, "raxmon"];
const CHECK_PERIOD_SECS: u32 = 60;
const CHECK_TIMEOUT_SECS: u32 = 30;
const SAMPLE_WINDOW_SECS: i64 = 300;
const SAMPLE_POINTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentMetricSettings {
    pub check_type: String,
    pub metric_name: String,
    pub check_config: Value,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
}

impl Default for AgentMetricSettings {
    fn default() -> Self {
        Self {
            check_type: DEFAULT_CHECK_TYPE.to_string(),
            metric_name: DEFAULT_METRIC_NAME.to_string(),
            check_config: json!({}),
            scale_up_threshold: DEFAULT_SCALE_UP_THRESHOLD,
            scale_down_threshold: DEFAULT_SCALE_DOWN_THRESHOLD,
        }
    }
}

impl AgentMetricSettings {
    fn apply(&mut self, overrides: &MetricSettings) {
        if let Some(check_type) = &overrides.check_type {
            self.check_type = check_type.clone();
        }
        if let Some(metric_name) = &overrides.metric_name {
            self.metric_name = metric_name.clone();
        }
        if let Some(check_config) = &overrides.check_config {
            self.check_config = check_config.clone();
        }
        if let Some(up) = overrides.scale_up_threshold {
            self.scale_up_threshold = up;
        }
        if let Some(down) = overrides.scale_down_threshold {
            self.scale_down_threshold = down;
        }
    }

    /// Settings from a plugin section, layered over the group-level keys.
    pub fn from_plugin_config(
        config: &ScalingGroupConfig,
        plugin_config: &Value,
    ) -> AutoscaleResult<Self> {
        let overrides: MetricSettings = match plugin_config {
            Value::Null => MetricSettings::default(),
            value => serde_json::from_value(value.clone()).map_err(|e| {
                AutoscaleError::config(format!(
                    "invalid {NAME} settings in group '{}': {e}",
                    config.name
                ))
            })?,
        };

        let mut settings = Self::default();
        settings.apply(&config.metrics);
        settings.apply(&overrides);
        Ok(settings)
    }

    /// Effective settings of a group, whether or not it runs this plugin.
    ///
    /// Malformed plugin settings fall back to the group-level keys.
    pub fn for_group(config: &ScalingGroupConfig) -> Self {
        let plugin_config = CONFIG_KEYS
            .iter()
            .find_map(|key| config.plugins.get(*key))
            .unwrap_or(&Value::Null);

        Self::from_plugin_config(config, plugin_config).unwrap_or_else(|e| {
            warn!("{e}");
            let mut settings = Self::default();
            settings.apply(&config.metrics);
            settings
        })
    }

    fn check_label(&self) -> String {
        format!("{}_{}", self.metric_name, self.check_type)
    }
}

#[derive(Debug, Clone)]
pub struct AgentMetrics {
    settings: AgentMetricSettings,
    max_sample: usize,
}

impl AgentMetrics {
    pub fn new(settings: AgentMetricSettings, max_sample: usize) -> Self {
        Self {
            settings,
            max_sample,
        }
    }

    pub fn from_config(
        config: &ScalingGroupConfig,
        plugin_config: &Value,
        options: &PluginOptions,
    ) -> AutoscaleResult<Box<dyn DecisionPlugin>> {
        let settings = AgentMetricSettings::from_plugin_config(config, plugin_config)?;
        Ok(Box::new(Self::new(settings, options.max_sample)))
    }

    pub fn settings(&self) -> &AgentMetricSettings {
        &self.settings
    }

    pub fn check_spec(&self, entity: &Entity) -> CheckSpec {
        // first alias in name order, so repeated runs pick the same address
        let target_alias = entity.ip_addresses.keys().min().cloned();

        CheckSpec {
            label: self.settings.check_label(),
            check_type: self.settings.check_type.clone(),
            details: self.settings.check_config.clone(),
            period: CHECK_PERIOD_SECS,
            timeout: CHECK_TIMEOUT_SECS,
            target_alias,
        }
    }

    /// Create the check on entities that have none of the configured type.
    async fn ensure_checks(&self, cloud: &dyn CloudApi, entities: &[Entity]) {
        info!("ensuring monitoring checks exist");

        for entity in entities {
            let checks = match cloud.list_checks(&entity.id).await {
                Ok(checks) => checks,
                Err(e) => {
                    error!("unable to list checks of entity {}: {e}", entity.id);
                    continue;
                }
            };

            if checks
                .iter()
                .any(|check| check.check_type == self.settings.check_type)
            {
                debug!(
                    "SKIP - check ({}) already exists on server {}",
                    self.settings.check_type,
                    entity.agent_id.as_deref().unwrap_or_default()
                );
                continue;
            }

            let spec = self.check_spec(entity);
            match cloud.create_check(&entity.id, &spec).await {
                Ok(()) => info!(
                    "ADD - check ({}) to server {}",
                    spec.check_type,
                    entity.agent_id.as_deref().unwrap_or_default()
                ),
                Err(e) => error!("unable to create check on entity {}: {e}", entity.id),
            }
        }
    }

    /// Latest average of the metric on one entity.
    async fn sample(&self, cloud: &dyn CloudApi, entity: &Entity) -> Option<f64> {
        let checks = match cloud.list_checks(&entity.id).await {
            Ok(checks) => checks,
            Err(e) => {
                error!("unable to list checks of entity {}: {e}", entity.id);
                return None;
            }
        };

        let to = Utc::now();
        let from = to - Duration::seconds(SAMPLE_WINDOW_SECS);

        for check in checks
            .iter()
            .filter(|check| check.check_type == self.settings.check_type)
        {
            let points = match cloud
                .get_metric_points(
                    &entity.id,
                    &check.id,
                    &self.settings.metric_name,
                    from,
                    to,
                    SAMPLE_POINTS,
                )
                .await
            {
                Ok(points) => points,
                Err(e) => {
                    warn!("unable to read metric of check {}: {e}", check.id);
                    continue;
                }
            };

            if let Some(latest) = points.last() {
                info!("found metric for {}, value: {}", entity.label, latest.average);
                return Some(latest.average);
            }
        }

        None
    }
}

#[async_trait]
impl DecisionPlugin for AgentMetrics {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(plugin = NAME, group = %group.name()))]
    async fn make_decision(&self, group: &ScalingGroup) -> Option<i64> {
        let active: HashSet<&str> = group
            .active_servers()
            .await
            .iter()
            .map(String::as_str)
            .collect();
        if active.is_empty() {
            warn!("no active servers to sample");
            return None;
        }

        let cloud = group.cloud();
        let mut entities: Vec<Entity> = match cloud.list_entities().await {
            Ok(entities) => entities
                .into_iter()
                .filter(|entity| {
                    entity
                        .agent_id
                        .as_deref()
                        .is_some_and(|agent| active.contains(agent))
                })
                .collect(),
            Err(e) => {
                error!("unable to list monitoring entities: {e}");
                return None;
            }
        };

        self.ensure_checks(cloud, &entities).await;

        info!("gathering monitoring data");
        entities.shuffle(&mut rand::thread_rng());

        let mut samples = Vec::new();
        for entity in &entities {
            if samples.len() >= self.max_sample {
                info!(
                    "--max-sample value of {} reached, not gathering any more statistics",
                    self.max_sample
                );
                break;
            }

            if let Some(value) = self.sample(cloud, entity).await {
                samples.push(value);
            }
        }

        if samples.is_empty() {
            error!("no data available");
            return None;
        }

        let average = samples.iter().sum::<f64>() / samples.len() as f64;
        info!(
            "cluster average for {} ({}) at: {average}",
            self.settings.check_type, self.settings.metric_name
        );

        let vote = threshold_vote(
            average,
            self.settings.scale_up_threshold,
            self.settings.scale_down_threshold,
        );
        match vote {
            1 => info!("agent metrics report scale up"),
            -1 => info!("agent metrics report scale down"),
            _ => info!("cluster within target parameters"),
        }
        Some(vote)
    }
}
