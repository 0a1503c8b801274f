//! Policy execution, dry-run and webhooks

use std::sync::Arc;
use std::time::Duration;

use fleet_autoscaler::{ScaleDirection, ScaleEvent, executor::ScalingExecutor};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn mount_hook(server: &MockServer, hook_path: &str, status: u16, expected: u64) {
    Mock::given(method("POST"))
        .and(path(hook_path))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_scale_up_calls_hooks_around_policy() {
    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/up/pre"))
        .and(body_partial_json(json!({
            "group_id": GROUP_ID,
            "scale_up_policy": SCALE_UP_POLICY,
            "scale_down_policy": SCALE_DOWN_POLICY,
            "check_type": "agent.load_average",
            "metric_name": "1m",
            "scale_up_threshold": 0.6,
            "scale_down_threshold": 0.4,
            "direction": "up",
            "hook": "pre"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hooks)
        .await;
    mount_hook(&hooks, "/up/post", 200, 1).await;

    let cloud = Arc::new(create_fleet(&server_ids(2)));
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Up)
        .await;

    assert_eq!(event, ScaleEvent::Success);
    assert_eq!(
        cloud.calls().executed_policies,
        vec![(GROUP_ID.to_string(), SCALE_UP_POLICY.to_string())]
    );
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let hooks = MockServer::start().await;
    for hook_path in ["/up/pre", "/up/post", "/down/pre", "/down/post"] {
        mount_hook(&hooks, hook_path, 200, 0).await;
    }

    let cloud = Arc::new(create_fleet(&server_ids(3)));
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );
    let executor = ScalingExecutor::new(true);

    assert_eq!(
        executor.execute(&group, ScaleDirection::Up).await,
        ScaleEvent::Success
    );
    assert_eq!(
        executor.execute(&group, ScaleDirection::Down).await,
        ScaleEvent::Success
    );
    assert!(cloud.calls().executed_policies.is_empty());
}

#[tokio::test]
async fn test_never_scale_below_one_server() {
    let hooks = MockServer::start().await;
    mount_hook(&hooks, "/down/pre", 200, 0).await;

    let cloud = Arc::new(create_fleet(&server_ids(1)));
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Down)
        .await;

    assert_eq!(event, ScaleEvent::NoAction);
    assert!(cloud.calls().executed_policies.is_empty());
}

#[tokio::test]
async fn test_no_scale_down_when_group_state_unavailable() {
    let hooks = MockServer::start().await;
    mount_hook(&hooks, "/down/pre", 200, 0).await;

    let cloud = Arc::new(create_fleet(&server_ids(3)).with_failing_state());
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Down)
        .await;

    assert_eq!(event, ScaleEvent::NoAction);
    assert!(cloud.calls().executed_policies.is_empty());
}

#[tokio::test]
async fn test_slow_hook_is_cut_off_by_client_timeout() {
    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/up/pre"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&hooks)
        .await;
    mount_hook(&hooks, "/up/post", 200, 1).await;

    let cloud = Arc::new(create_fleet(&server_ids(2)));
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );

    let event = tokio::time::timeout(
        Duration::from_secs(10),
        ScalingExecutor::new(false).execute(&group, ScaleDirection::Up),
    )
    .await
    .expect("webhook client ignored its timeout");

    assert_eq!(event, ScaleEvent::Success);
    assert_eq!(cloud.calls().executed_policies.len(), 1);
}

#[tokio::test]
async fn test_scale_down_with_two_servers_executes() {
    let hooks = MockServer::start().await;
    mount_hook(&hooks, "/down/pre", 200, 1).await;
    mount_hook(&hooks, "/down/post", 200, 1).await;

    let cloud = Arc::new(create_fleet(&server_ids(2)));
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Down)
        .await;

    assert_eq!(event, ScaleEvent::Success);
    assert_eq!(
        cloud.calls().executed_policies,
        vec![(GROUP_ID.to_string(), SCALE_DOWN_POLICY.to_string())]
    );
}

#[tokio::test]
async fn test_nothing_is_no_action() {
    let cloud = Arc::new(create_fleet(&server_ids(2)));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_blind_resolver(),
    );

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Nothing)
        .await;

    assert_eq!(event, ScaleEvent::NoAction);
    assert!(cloud.calls().executed_policies.is_empty());
}

#[tokio::test]
async fn test_policy_failure_skips_post_hooks() {
    let hooks = MockServer::start().await;
    mount_hook(&hooks, "/up/pre", 200, 1).await;
    mount_hook(&hooks, "/up/post", 200, 0).await;

    let cloud = Arc::new(create_fleet(&server_ids(2)).with_failing_policies());
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Up)
        .await;

    assert_eq!(event, ScaleEvent::Error);
}

#[tokio::test]
async fn test_webhook_failure_does_not_downgrade() {
    let hooks = MockServer::start().await;
    mount_hook(&hooks, "/up/pre", 500, 1).await;
    mount_hook(&hooks, "/up/post", 503, 1).await;

    let cloud = Arc::new(create_fleet(&server_ids(2)));
    let group = create_scaling_group(
        create_group_config_with_webhooks(&hooks.uri()),
        &cloud,
        create_blind_resolver(),
    );

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Up)
        .await;

    assert_eq!(event, ScaleEvent::Success);
    assert_eq!(cloud.calls().executed_policies.len(), 1);
}

#[tokio::test]
async fn test_unreachable_webhook_does_not_downgrade() {
    // nothing listens on port 9 of localhost
    let config = create_group_config_with_webhooks("http://127.0.0.1:9");
    let cloud = Arc::new(create_fleet(&server_ids(2)));
    let group = create_scaling_group(config, &cloud, create_blind_resolver());

    let event = ScalingExecutor::new(false)
        .execute(&group, ScaleDirection::Up)
        .await;

    assert_eq!(event, ScaleEvent::Success);
}
