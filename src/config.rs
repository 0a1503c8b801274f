use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, trace};

use crate::decision::{HookType, ScaleDirection};
use crate::error::{AutoscaleError, AutoscaleResult};

pub const DEFAULT_CHECK_TYPE: &str = "agent.load_average";
pub const DEFAULT_METRIC_NAME: &str = "1m";
pub const DEFAULT_SCALE_UP_THRESHOLD: f64 = 0.6;
pub const DEFAULT_SCALE_DOWN_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,

    /// Groups are kept raw so that only the selected group has to be valid
    #[serde(default)]
    pub autoscale_groups: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub os_username: Option<String>,
    pub os_password: Option<String>,
    pub os_region_name: Option<String>,
    /// Object-store container holding the config file
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
    pub region: String,
}

impl Config {
    /// Validated configuration of the named group.
    pub fn group(&self, name: &str) -> AutoscaleResult<ScalingGroupConfig> {
        let value = self
            .autoscale_groups
            .get(name)
            .ok_or_else(|| AutoscaleError::config(format!("unable to find group '{name}'")))?;

        ScalingGroupConfig::from_value(value.clone(), name)
    }

    /// Credentials from the command line, falling back to the `auth` section.
    pub fn credentials(
        &self,
        username: Option<String>,
        api_key: Option<String>,
        region: Option<String>,
    ) -> AutoscaleResult<Credentials> {
        fn pick(
            arg: Option<String>,
            config: &Option<String>,
            key: &str,
        ) -> AutoscaleResult<String> {
            arg.or_else(|| config.clone()).ok_or_else(|| {
                AutoscaleError::config(format!(
                    "'{key}' not given and not found in authentication section"
                ))
            })
        }

        Ok(Credentials {
            username: pick(username, &self.auth.os_username, "os_username")?,
            api_key: pick(api_key, &self.auth.os_password, "os_password")?,
            region: pick(region, &self.auth.os_region_name, "os_region_name")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Webhooks {
    #[serde(default)]
    pub scale_up: WebhookPhases,
    #[serde(default)]
    pub scale_down: WebhookPhases,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WebhookPhases {
    #[serde(default)]
    pub pre: Vec<String>,
    #[serde(default)]
    pub post: Vec<String>,
}

/// Group-level metric keys from older configuration files
///
/// They act as defaults for the agent-metric plugin and always feed the
/// webhook body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetricSettings {
    pub check_type: Option<String>,
    pub metric_name: Option<String>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub check_config: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawGroupConfig {
    group_id: Option<String>,
    scale_up_policy: Option<String>,
    scale_down_policy: Option<String>,
    plugins: Option<BTreeMap<String, Value>>,
    webhooks: Option<Webhooks>,
    #[serde(flatten)]
    metrics: MetricSettings,
}

/// Configuration of one scaling group, immutable once validated
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingGroupConfig {
    pub name: String,
    pub group_id: String,
    pub scale_up_policy: String,
    pub scale_down_policy: String,
    /// Plugin name to plugin-specific configuration
    pub plugins: BTreeMap<String, Value>,
    pub webhooks: Webhooks,
    pub metrics: MetricSettings,
}

impl ScalingGroupConfig {
    pub fn from_value(value: Value, name: &str) -> AutoscaleResult<Self> {
        let raw: RawGroupConfig = serde_json::from_value(value).map_err(|e| {
            AutoscaleError::config(format!("invalid configuration for group '{name}': {e}"))
        })?;

        let missing = |key: &str| {
            error!("unable to get value for key '{key}' in group '{name}'");
            AutoscaleError::config(format!("invalid group configuration: '{name}' has no {key}"))
        };

        let config = Self {
            name: name.to_string(),
            group_id: raw.group_id.ok_or_else(|| missing("group_id"))?,
            scale_up_policy: raw.scale_up_policy.ok_or_else(|| missing("scale_up_policy"))?,
            scale_down_policy: raw
                .scale_down_policy
                .ok_or_else(|| missing("scale_down_policy"))?,
            plugins: raw.plugins.ok_or_else(|| missing("plugins"))?,
            webhooks: raw.webhooks.unwrap_or_default(),
            metrics: raw.metrics,
        };

        trace!("validated group config: {config:?}");
        Ok(config)
    }

    /// Policy id to execute for a direction; `None` for `Nothing`.
    pub fn policy_for(&self, direction: ScaleDirection) -> Option<&str> {
        match direction {
            ScaleDirection::Up => Some(&self.scale_up_policy),
            ScaleDirection::Down => Some(&self.scale_down_policy),
            ScaleDirection::Nothing => None,
        }
    }

    pub fn webhook_urls(&self, direction: ScaleDirection, hook: HookType) -> &[String] {
        let phases = match direction {
            ScaleDirection::Up => &self.webhooks.scale_up,
            ScaleDirection::Down => &self.webhooks.scale_down,
            ScaleDirection::Nothing => return &[],
        };

        match hook {
            HookType::Pre => &phases.pre,
            HookType::Post => &phases.post,
        }
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config: &Config| {
            trace!("loaded config with groups {:?}", config.autoscale_groups.keys())
        })
}
