use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::cloud::CloudResult;
use crate::config::ScalingGroupConfig;
use crate::decision::{HookType, ScaleDirection};
use crate::error::AutoscaleError;
use crate::plugins::agent_metrics::AgentMetricSettings;

/// Posts scaling notifications to the URLs configured for a group
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> CloudResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// JSON body sent for a scaling event.
    ///
    /// The seven group/metric keys are always present, whichever plugin
    /// produced the decision; consumers rely on their exact names.
    pub fn payload(
        config: &ScalingGroupConfig,
        direction: ScaleDirection,
        hook: HookType,
    ) -> Value {
        let metrics = AgentMetricSettings::for_group(config);

        json!({
            "group_id": config.group_id,
            "scale_up_policy": config.scale_up_policy,
            "scale_down_policy": config.scale_down_policy,
            "check_type": metrics.check_type,
            "metric_name": metrics.metric_name,
            "scale_up_threshold": metrics.scale_up_threshold,
            "scale_down_threshold": metrics.scale_down_threshold,
            "group_name": config.name,
            "direction": direction,
            "hook": hook,
        })
    }

    /// Post the payload to every URL of the phase, in order.
    ///
    /// Delivery failures are logged and never propagated.
    #[instrument(skip(self, config), fields(group = %config.name))]
    pub async fn notify(
        &self,
        config: &ScalingGroupConfig,
        direction: ScaleDirection,
        hook: HookType,
    ) {
        let urls = config.webhook_urls(direction, hook);
        if urls.is_empty() {
            info!("no webhooks configured for scale_{direction}:{hook}");
            return;
        }

        info!("executing webhook: scale_{direction}:{hook}");
        let payload = Self::payload(config, direction, hook);

        for url in urls {
            if let Err(e) = self.deliver(url, &payload).await {
                error!("{e}");
            }
        }
    }

    async fn deliver(&self, url: &str, payload: &Value) -> Result<(), AutoscaleError> {
        info!("sending POST request to url: '{url}'");

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| AutoscaleError::WebhookDelivery {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        info!("received status code {} from url: '{url}'", status.as_u16());
        if !status.is_success() {
            return Err(AutoscaleError::WebhookDelivery {
                url: url.to_string(),
                reason: format!("status {status}"),
            });
        }

        Ok(())
    }
}
