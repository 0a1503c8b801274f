//! REST binding against a mock API

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use fleet_autoscaler::{
    auth::{ServiceCatalog, Session},
    cloud::{CloudApi, CloudError, rackspace::RackspaceCloud},
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::GROUP_ID;

const TOKEN: &str = "token-abc";

fn create_session(base_url: &str, with_load_balancers: bool) -> Session {
    let mut services = vec![
        json!({ "name": "autoscale", "type": "rax:autoscale",
                "endpoints": [{ "region": "DFW", "publicURL": format!("{base_url}/autoscale") }] }),
        json!({ "name": "cloudServersOpenStack", "type": "compute",
                "endpoints": [{ "region": "DFW", "publicURL": format!("{base_url}/compute") }] }),
        json!({ "name": "cloudMonitoring", "type": "rax:monitor",
                "endpoints": [{ "publicURL": format!("{base_url}/monitoring") }] }),
        json!({ "name": "cloudFiles", "type": "object-store",
                "endpoints": [{ "region": "DFW", "publicURL": format!("{base_url}/files") }] }),
    ];
    if with_load_balancers {
        services.push(json!({ "name": "cloudLoadBalancers", "type": "rax:load-balancer",
                "endpoints": [{ "region": "DFW", "publicURL": format!("{base_url}/lb") }] }));
    }

    Session {
        token: TOKEN.to_string(),
        tenant_id: "123".to_string(),
        region: "DFW".to_string(),
        catalog: serde_json::from_value::<ServiceCatalog>(json!(services)).unwrap(),
    }
}

fn create_cloud(server: &MockServer) -> RackspaceCloud {
    RackspaceCloud::new(create_session(&server.uri(), true), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_group_state_keeps_api_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/autoscale/groups/{GROUP_ID}/state")))
        .and(header("X-Auth-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "group": {
                "active": [
                    { "id": "srv-b", "links": [] },
                    { "id": "srv-a", "links": [] }
                ],
                "activeCapacity": 2,
                "pendingCapacity": 1,
                "desiredCapacity": 3,
                "paused": false
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let state = create_cloud(&server).get_group_state(GROUP_ID).await.unwrap();

    assert_eq!(state.active, vec!["srv-b", "srv-a"]);
    assert_eq!(state.active_capacity, 2);
    assert_eq!(state.pending_capacity, 1);
    assert_eq!(state.desired_capacity, 3);
}

#[tokio::test]
async fn test_launch_config_lists_load_balancers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/autoscale/groups/{GROUP_ID}/launch")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "launchConfiguration": {
                "type": "launch_server",
                "args": {
                    "server": { "name": "web" },
                    "loadBalancers": [{ "loadBalancerId": 9876, "port": 80 }]
                }
            }
        })))
        .mount(&server)
        .await;

    let launch = create_cloud(&server).get_launch_config(GROUP_ID).await.unwrap();

    assert_eq!(launch.load_balancers.len(), 1);
    assert_eq!(launch.load_balancers[0].load_balancer_id, 9876);
    assert_eq!(launch.load_balancers[0].port, Some(80));
}

#[tokio::test]
async fn test_server_addresses_are_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/compute/servers/srv-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server": {
                "id": "srv-a",
                "name": "web-1",
                "addresses": {
                    "private": [{ "addr": "10.0.0.5", "version": 4 }],
                    "public": [
                        { "addr": "2001:db8::1", "version": 6 },
                        { "addr": "198.51.100.7", "version": 4 }
                    ]
                }
            }
        })))
        .mount(&server)
        .await;

    let details = create_cloud(&server).get_server("srv-a").await.unwrap();

    assert_eq!(details.name, "web-1");
    assert_eq!(details.addresses().count(), 3);
    assert!(
        details
            .addresses()
            .any(|ip| *ip == "10.0.0.5".parse::<std::net::IpAddr>().unwrap())
    );
}

#[tokio::test]
async fn test_entities_are_paginated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monitoring/entities"))
        .and(query_param("marker", "en2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{ "id": "en2", "label": "web-2", "agent_id": "srv-b" }],
            "metadata": { "next_marker": null }
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/monitoring/entities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{
                "id": "en1",
                "label": "web-1",
                "agent_id": "srv-a",
                "ip_addresses": { "private0_v4": "10.0.0.5" }
            }],
            "metadata": { "next_marker": "en2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entities = create_cloud(&server).list_entities().await.unwrap();

    let ids: Vec<_> = entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["en1", "en2"]);
    assert_eq!(entities[0].ip_addresses["private0_v4"], "10.0.0.5");
    assert!(entities[1].ip_addresses.is_empty());
}

#[tokio::test]
async fn test_metric_points_are_queried_in_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monitoring/entities/en1/checks/ch1/metrics/1m/plot"))
        .and(query_param("points", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                { "numPoints": 4, "timestamp": 1_700_000_000_000i64, "average": 0.25 },
                { "numPoints": 4, "timestamp": 1_700_000_060_000i64, "average": 0.75 }
            ],
            "metadata": {}
        })))
        .mount(&server)
        .await;

    let to = Utc::now();
    let points = create_cloud(&server)
        .get_metric_points("en1", "ch1", "1m", to - chrono::Duration::minutes(5), to, 2)
        .await
        .unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[1].average, 0.75);
}

#[tokio::test]
async fn test_load_balancer_stats_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lb/loadbalancers/42/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "connectTimeOut": 0,
            "currentConn": 100,
            "currentConnSsl": 3
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lb/loadbalancers/42/usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "loadBalancerUsageRecords": [
                { "averageNumConnections": 5.0, "averageNumConnectionsSsl": 1.0 },
                { "averageNumConnections": 8.0, "averageNumConnectionsSsl": 2.0 }
            ]
        })))
        .mount(&server)
        .await;

    let cloud = create_cloud(&server);
    let stats = cloud.get_load_balancer_stats(42).await.unwrap();
    let usage = cloud
        .get_load_balancer_usage(42, Utc::now() - chrono::Duration::hours(2))
        .await
        .unwrap();

    assert_eq!(stats.current_conn, 100.0);
    assert_eq!(stats.current_conn_ssl, 3.0);
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[1].average_num_connections, 8.0);
}

#[tokio::test]
async fn test_unknown_load_balancer_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lb/loadbalancers/404/stats"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = create_cloud(&server)
        .get_load_balancer_stats(404)
        .await
        .unwrap_err();

    assert_matches!(err, CloudError::NotFound(_));
}

#[tokio::test]
async fn test_missing_catalog_entry_fails_only_that_service() {
    let server = MockServer::start().await;
    let cloud =
        RackspaceCloud::new(create_session(&server.uri(), false), Duration::from_secs(5)).unwrap();

    let err = cloud.get_load_balancer_stats(42).await.unwrap_err();
    assert_matches!(err, CloudError::MissingEndpoint(_));
}

#[tokio::test]
async fn test_execute_policy_posts_and_reports_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/autoscale/groups/{GROUP_ID}/policies/up/execute")))
        .and(header("X-Auth-Token", TOKEN))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/autoscale/groups/{GROUP_ID}/policies/down/execute")))
        .respond_with(ResponseTemplate::new(403).set_body_string("cooldown"))
        .expect(1)
        .mount(&server)
        .await;

    let cloud = create_cloud(&server);
    cloud.execute_policy(GROUP_ID, "up").await.unwrap();

    let err = cloud.execute_policy(GROUP_ID, "down").await.unwrap_err();
    assert_matches!(err, CloudError::Status { status: 403, .. });
}

#[tokio::test]
async fn test_create_check_sends_type_and_alias() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/monitoring/entities/en1/checks"))
        .and(wiremock::matchers::body_partial_json(json!({
            "label": "1m_agent.load_average",
            "type": "agent.load_average",
            "period": 60,
            "timeout": 30,
            "target_alias": "private0_v4"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let spec = fleet_autoscaler::cloud::CheckSpec {
        label: "1m_agent.load_average".to_string(),
        check_type: "agent.load_average".to_string(),
        details: json!({}),
        period: 60,
        timeout: 30,
        target_alias: Some("private0_v4".to_string()),
    };

    create_cloud(&server).create_check("en1", &spec).await.unwrap();
}

#[tokio::test]
async fn test_download_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/autoscale/config.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"autoscale_groups\":{}}"))
        .mount(&server)
        .await;

    let cloud = create_cloud(&server);
    let content = cloud.download_object("autoscale", "config.json").await.unwrap();
    assert_eq!(content, b"{\"autoscale_groups\":{}}");

    let err = cloud.download_object("autoscale", "other.json").await.unwrap_err();
    assert_matches!(err, CloudError::NotFound(_));
}
