//! Master election against an in-memory fleet

use std::sync::Arc;

use fleet_autoscaler::NodeStatus;
use serde_json::json;
use uuid::Uuid;

use crate::helpers::*;

#[tokio::test]
async fn test_single_server_is_master() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(1);
    let cloud = Arc::new(create_fleet(&active));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["10.0.0.1"]),
    );

    assert_eq!(group.is_master().await, NodeStatus::Master);
}

#[tokio::test]
async fn test_second_server_of_many_is_master() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(4);
    let cloud = Arc::new(create_fleet(&active));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["10.0.0.2"]),
    );

    assert_eq!(group.is_master().await, NodeStatus::Master);
}

#[tokio::test]
async fn test_third_server_is_slave() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(3);
    let cloud = Arc::new(create_fleet(&active));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["10.0.0.3"]),
    );

    assert_eq!(group.is_master().await, NodeStatus::Slave);
}

#[tokio::test]
async fn test_unresolved_identity_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(2);
    let cloud = Arc::new(create_fleet(&active));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["192.168.1.50"]),
    );

    assert_eq!(group.node_id().await, None);
    assert_eq!(group.is_master().await, NodeStatus::Unknown);
}

#[tokio::test]
async fn test_identity_is_resolved_once() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(3);
    let cloud = Arc::new(create_fleet(&active));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["10.0.0.3"]),
    );

    let first = group.node_id().await;
    let lookups = cloud.calls().get_server.len();
    let second = group.node_id().await;
    group.is_master().await;

    assert_eq!(first, Some(Uuid::parse_str(&active[2]).unwrap()));
    assert_eq!(first, second);
    assert_eq!(cloud.calls().get_server.len(), lookups);
}

#[tokio::test]
async fn test_resolved_identity_is_cached_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(2);
    let cloud = Arc::new(create_fleet(&active));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["10.0.0.1"]),
    );
    group.node_id().await;

    let cached = std::fs::read_to_string(dir.path().join("node.uuid")).unwrap();
    assert_eq!(cached, active[0]);

    // a fresh handle finds the id without scanning
    let cloud = Arc::new(create_fleet(&active));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &[]),
    );
    assert_eq!(group.is_master().await, NodeStatus::Master);
    assert!(cloud.calls().get_server.is_empty());
}

#[tokio::test]
async fn test_failed_candidate_lookup_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(2);
    let cloud = Arc::new(create_fleet(&active).with_failing_server(&active[0]));
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["10.0.0.2"]),
    );

    assert_eq!(group.is_master().await, NodeStatus::Master);
    assert_eq!(cloud.calls().get_server, active);
}

#[tokio::test]
async fn test_unavailable_state_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let active = server_ids(1);
    let cloud = Arc::new(create_fleet(&active).with_failing_state());
    let group = create_scaling_group(
        create_group_config(json!({ "raxmon": {} })),
        &cloud,
        create_resolver(dir.path(), &["10.0.0.1"]),
    );

    assert!(group.active_servers().await.is_empty());
    assert_eq!(group.is_master().await, NodeStatus::Unknown);

    // the failure sticks for the life of the handle
    group.state().await;
    assert_eq!(cloud.calls().get_group_state, 1);
}
