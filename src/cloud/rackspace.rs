//! REST binding for the Rackspace public cloud
//!
//! Endpoints are looked up in the service catalog of an authenticated
//! [`Session`] for its region, per call, so a missing optional service (for
//! example no load balancer endpoint) only fails the calls that need it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace, warn};

use super::{
    Check, CheckSpec, CloudApi, CloudError, CloudResult, Entity, GroupState, LaunchConfig,
    LoadBalancerRef, LoadBalancerStats, MetricPoint, ScalingGroupInfo, ServerDetails, UsageRecord,
};
use crate::auth::Session;

const AUTOSCALE: &str = "rax:autoscale";
const COMPUTE: &str = "compute";
const MONITORING: &str = "rax:monitor";
const LOAD_BALANCER: &str = "rax:load-balancer";
const OBJECT_STORE: &str = "object-store";

const ENTITY_PAGE_SIZE: u32 = 100;

pub struct RackspaceCloud {
    client: Client,
    session: Session,
}

impl RackspaceCloud {
    pub fn new(session: Session, timeout: Duration) -> CloudResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, session })
    }

    fn endpoint(&self, service_type: &str) -> CloudResult<String> {
        self.session
            .catalog
            .endpoint(service_type, &self.session.region)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-Auth-Token", &self.session.token)
            .header("Accept", "application/json")
    }

    async fn check_status(
        response: reqwest::Response,
        what: &str,
    ) -> CloudResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> CloudResult<T> {
        trace!("GET {url}");
        let response = self
            .authorized(self.client.get(url).query(query))
            .send()
            .await?;
        let response = Self::check_status(response, what).await?;

        response
            .json()
            .await
            .map_err(|e| CloudError::Decode(format!("{what}: {e}")))
    }

    /// Download an object from the object store.
    #[instrument(skip(self))]
    pub async fn download_object(&self, container: &str, object: &str) -> CloudResult<Vec<u8>> {
        let url = format!("{}/{container}/{object}", self.endpoint(OBJECT_STORE)?);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let what = format!("object {container}/{object}");
        let response = Self::check_status(response, &what).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope<T> {
    group: T,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    id: String,
    #[serde(rename = "groupConfiguration")]
    group_configuration: Option<RawGroupConfiguration>,
}

#[derive(Debug, Deserialize)]
struct RawGroupConfiguration {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroupState {
    #[serde(default)]
    active: Vec<RawActiveServer>,
    #[serde(default)]
    active_capacity: u32,
    #[serde(default)]
    pending_capacity: u32,
    #[serde(default)]
    desired_capacity: u32,
    #[serde(default)]
    paused: bool,
}

#[derive(Debug, Deserialize)]
struct RawActiveServer {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLaunchEnvelope {
    launch_configuration: RawLaunchConfiguration,
}

#[derive(Debug, Deserialize)]
struct RawLaunchConfiguration {
    #[serde(default)]
    args: RawLaunchArgs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLaunchArgs {
    #[serde(default)]
    load_balancers: Vec<RawLoadBalancerRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoadBalancerRef {
    load_balancer_id: u64,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: RawServer,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    id: String,
    name: String,
    #[serde(default)]
    addresses: HashMap<String, Vec<RawAddress>>,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    addr: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    values: Vec<T>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    id: String,
    #[serde(default)]
    label: String,
    agent_id: Option<String>,
    #[serde(default)]
    ip_addresses: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    id: String,
    #[serde(rename = "type")]
    check_type: String,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetricPoint {
    timestamp: i64,
    average: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoadBalancerStats {
    #[serde(default)]
    current_conn: f64,
    #[serde(default)]
    current_conn_ssl: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUsage {
    #[serde(default)]
    load_balancer_usage_records: Vec<RawUsageRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUsageRecord {
    #[serde(default)]
    average_num_connections: f64,
    #[serde(default)]
    average_num_connections_ssl: f64,
}

#[async_trait]
impl CloudApi for RackspaceCloud {
    #[instrument(skip(self))]
    async fn get_scaling_group(&self, group_id: &str) -> CloudResult<ScalingGroupInfo> {
        let url = format!("{}/groups/{group_id}", self.endpoint(AUTOSCALE)?);
        let envelope: GroupEnvelope<RawGroup> = self
            .get_json(&url, &[], &format!("scaling group {group_id}"))
            .await?;

        Ok(ScalingGroupInfo {
            id: envelope.group.id,
            name: envelope.group.group_configuration.and_then(|c| c.name),
        })
    }

    #[instrument(skip(self))]
    async fn get_group_state(&self, group_id: &str) -> CloudResult<GroupState> {
        let url = format!("{}/groups/{group_id}/state", self.endpoint(AUTOSCALE)?);
        let envelope: GroupEnvelope<RawGroupState> = self
            .get_json(&url, &[], &format!("state of scaling group {group_id}"))
            .await?;
        let state = envelope.group;

        Ok(GroupState {
            active: state.active.into_iter().map(|server| server.id).collect(),
            active_capacity: state.active_capacity,
            pending_capacity: state.pending_capacity,
            desired_capacity: state.desired_capacity,
            paused: state.paused,
        })
    }

    #[instrument(skip(self))]
    async fn get_launch_config(&self, group_id: &str) -> CloudResult<LaunchConfig> {
        let url = format!("{}/groups/{group_id}/launch", self.endpoint(AUTOSCALE)?);
        let envelope: RawLaunchEnvelope = self
            .get_json(&url, &[], &format!("launch config of {group_id}"))
            .await?;

        Ok(LaunchConfig {
            load_balancers: envelope
                .launch_configuration
                .args
                .load_balancers
                .into_iter()
                .map(|lb| LoadBalancerRef {
                    load_balancer_id: lb.load_balancer_id,
                    port: lb.port,
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn get_server(&self, server_id: &str) -> CloudResult<ServerDetails> {
        let url = format!("{}/servers/{server_id}", self.endpoint(COMPUTE)?);
        let envelope: ServerEnvelope = self
            .get_json(&url, &[], &format!("server {server_id}"))
            .await?;
        let server = envelope.server;

        let networks = server
            .addresses
            .into_iter()
            .map(|(network, addresses)| {
                let parsed = addresses
                    .into_iter()
                    .filter_map(|a| match a.addr.parse::<IpAddr>() {
                        Ok(ip) => Some(ip),
                        Err(_) => {
                            warn!("ignoring malformed address '{}' on {network}", a.addr);
                            None
                        }
                    })
                    .collect();
                (network, parsed)
            })
            .collect();

        Ok(ServerDetails {
            id: server.id,
            name: server.name,
            networks,
        })
    }

    #[instrument(skip(self))]
    async fn list_entities(&self) -> CloudResult<Vec<Entity>> {
        let url = format!("{}/entities", self.endpoint(MONITORING)?);
        let mut entities = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("limit", ENTITY_PAGE_SIZE.to_string())];
            if let Some(marker) = &marker {
                query.push(("marker", marker.clone()));
            }

            let page: Page<RawEntity> = self.get_json(&url, &query, "entities").await?;
            entities.extend(page.values.into_iter().map(|raw| Entity {
                id: raw.id,
                label: raw.label,
                agent_id: raw.agent_id,
                ip_addresses: raw.ip_addresses.unwrap_or_default(),
            }));

            marker = page.metadata.and_then(|m| m.next_marker);
            if marker.is_none() {
                break;
            }
        }

        debug!("listed {} monitoring entities", entities.len());
        Ok(entities)
    }

    #[instrument(skip(self))]
    async fn list_checks(&self, entity_id: &str) -> CloudResult<Vec<Check>> {
        let url = format!("{}/entities/{entity_id}/checks", self.endpoint(MONITORING)?);
        let page: Page<RawCheck> = self
            .get_json(&url, &[], &format!("checks of {entity_id}"))
            .await?;

        Ok(page
            .values
            .into_iter()
            .map(|raw| Check {
                id: raw.id,
                check_type: raw.check_type,
                label: raw.label,
            })
            .collect())
    }

    #[instrument(skip(self, spec), fields(check_type = %spec.check_type))]
    async fn create_check(&self, entity_id: &str, spec: &CheckSpec) -> CloudResult<()> {
        let url = format!("{}/entities/{entity_id}/checks", self.endpoint(MONITORING)?);
        let response = self
            .authorized(self.client.post(&url).json(spec))
            .send()
            .await?;
        Self::check_status(response, &format!("entity {entity_id}")).await?;
        Ok(())
    }

    #[instrument(skip(self, from, to))]
    async fn get_metric_points(
        &self,
        entity_id: &str,
        check_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        points: u32,
    ) -> CloudResult<Vec<MetricPoint>> {
        let url = format!(
            "{}/entities/{entity_id}/checks/{check_id}/metrics/{metric}/plot",
            self.endpoint(MONITORING)?
        );
        let query = [
            ("from", from.timestamp_millis().to_string()),
            ("to", to.timestamp_millis().to_string()),
            ("points", points.to_string()),
        ];
        let page: Page<RawMetricPoint> = self
            .get_json(&url, &query, &format!("metric {metric} of {entity_id}"))
            .await?;

        Ok(page
            .values
            .into_iter()
            .filter_map(|raw| {
                DateTime::from_timestamp_millis(raw.timestamp).map(|timestamp| MetricPoint {
                    timestamp,
                    average: raw.average,
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_load_balancer_stats(&self, lb_id: u64) -> CloudResult<LoadBalancerStats> {
        let url = format!(
            "{}/loadbalancers/{lb_id}/stats",
            self.endpoint(LOAD_BALANCER)?
        );
        let raw: RawLoadBalancerStats = self
            .get_json(&url, &[], &format!("load balancer {lb_id}"))
            .await?;

        Ok(LoadBalancerStats {
            current_conn: raw.current_conn,
            current_conn_ssl: raw.current_conn_ssl,
        })
    }

    #[instrument(skip(self))]
    async fn get_load_balancer_usage(
        &self,
        lb_id: u64,
        since: DateTime<Utc>,
    ) -> CloudResult<Vec<UsageRecord>> {
        let url = format!(
            "{}/loadbalancers/{lb_id}/usage",
            self.endpoint(LOAD_BALANCER)?
        );
        let query = [("startTime", since.format("%Y-%m-%dT%H:%M:%S").to_string())];
        let raw: RawUsage = self
            .get_json(&url, &query, &format!("load balancer {lb_id}"))
            .await?;

        Ok(raw
            .load_balancer_usage_records
            .into_iter()
            .map(|record| UsageRecord {
                average_num_connections: record.average_num_connections,
                average_num_connections_ssl: record.average_num_connections_ssl,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn execute_policy(&self, group_id: &str, policy_id: &str) -> CloudResult<()> {
        let url = format!(
            "{}/groups/{group_id}/policies/{policy_id}/execute",
            self.endpoint(AUTOSCALE)?
        );
        let response = self.authorized(self.client.post(&url)).send().await?;
        Self::check_status(response, &format!("policy {policy_id}")).await?;
        Ok(())
    }
}
