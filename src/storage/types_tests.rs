//! Unit tests for storage types.
//!
//! Tests validation, wire-format serialization, and builder methods
//! for HistoryNode, PipelineRun, and StageCheckpoint.

use super::*;
use serde_json::json;

// ============================================================================
// HistoryNode tests
// ============================================================================

#[test]
fn test_divergence_node() {
    let node = HistoryNode::divergence("Rome never falls");
    assert!(!node.id.is_empty());
    assert!(node.is_root());
    assert_eq!(node.offset, 0);
    assert_eq!(node.origin, NodeOrigin::User);
    assert!(node.validate().is_ok());
}

#[test]
fn test_generated_node() {
    let node = HistoryNode::generated("parent-1", 10, "Aqueducts everywhere");
    assert_eq!(node.parent_id.as_deref(), Some("parent-1"));
    assert_eq!(node.offset, 10);
    assert_eq!(node.origin, NodeOrigin::Generator);
    assert!(node.validate().is_ok());
}

#[test]
fn test_node_wire_format() {
    let node = HistoryNode::divergence("x").with_id("A");
    let value = serde_json::to_value(&node).unwrap();

    assert_eq!(value["id"], "A");
    assert_eq!(value["parentId"], serde_json::Value::Null);
    assert_eq!(value["year"], 0);
    assert_eq!(value["description"], "x");
    assert_eq!(value["createdBy"], "user");
    assert!(value["createdAt"].is_string());

    let generated = HistoryNode::generated("A", 1, "y");
    let value = serde_json::to_value(&generated).unwrap();
    assert_eq!(value["createdBy"], "AI");
}

#[test]
fn test_from_json_accepts_canonical_shape() {
    let node = HistoryNode::from_json(json!({
        "id": "B",
        "parentId": "A",
        "year": 1,
        "description": "The empire reforms",
        "createdBy": "AI",
        "createdAt": "2025-01-01T00:00:00Z"
    }))
    .unwrap();

    assert_eq!(node.id, "B");
    assert_eq!(node.parent_id.as_deref(), Some("A"));
    assert_eq!(node.offset, 1);
    assert_eq!(node.origin, NodeOrigin::Generator);
}

#[test]
fn test_from_json_rejects_unknown_field() {
    let err = HistoryNode::from_json(json!({
        "id": "A",
        "parentId": null,
        "year": 0,
        "description": "x",
        "createdBy": "user",
        "createdAt": "2025-01-01T00:00:00Z",
        "color": "purple"
    }))
    .unwrap_err();

    assert!(matches!(err, StorageError::InvalidNode { .. }));
}

#[test]
fn test_from_json_rejects_missing_field() {
    let err = HistoryNode::from_json(json!({
        "id": "A",
        "parentId": null,
        "description": "x",
        "createdBy": "user",
        "createdAt": "2025-01-01T00:00:00Z"
    }))
    .unwrap_err();

    assert!(matches!(err, StorageError::InvalidNode { .. }));
    assert!(err.to_string().contains("year"));
}

#[test]
fn test_from_json_requires_parent_id() {
    let err = HistoryNode::from_json(json!({
        "id": "A",
        "year": 0,
        "description": "x",
        "createdBy": "user",
        "createdAt": "2025-01-01T00:00:00Z"
    }))
    .unwrap_err();

    assert!(matches!(err, StorageError::InvalidNode { .. }));
    assert!(err.to_string().contains("parentId"));
}

#[test]
fn test_from_json_rejects_unknown_origin() {
    let err = HistoryNode::from_json(json!({
        "id": "A",
        "parentId": null,
        "year": 0,
        "description": "x",
        "createdBy": "robot",
        "createdAt": "2025-01-01T00:00:00Z"
    }))
    .unwrap_err();

    assert!(matches!(err, StorageError::InvalidNode { .. }));
}

#[test]
fn test_validate_root_must_have_offset_zero() {
    let mut node = HistoryNode::divergence("x");
    node.offset = 5;
    assert!(matches!(
        node.validate(),
        Err(StorageError::InvalidNode { .. })
    ));
}

#[test]
fn test_validate_rejects_self_parent_and_empty_fields() {
    let node = HistoryNode::generated("A", 1, "x").with_id("A");
    assert!(node.validate().is_err());

    let node = HistoryNode::generated("", 1, "x");
    assert!(node.validate().is_err());

    let node = HistoryNode::divergence("   ");
    assert!(node.validate().is_err());

    let node = HistoryNode::divergence("x").with_id(" ");
    assert!(node.validate().is_err());
}

#[test]
fn test_node_origin_round_trip_strings() {
    assert_eq!("user".parse::<NodeOrigin>().unwrap(), NodeOrigin::User);
    assert_eq!("AI".parse::<NodeOrigin>().unwrap(), NodeOrigin::Generator);
    assert!("ai".parse::<NodeOrigin>().is_err());
}

// ============================================================================
// PipelineRun tests
// ============================================================================

#[test]
fn test_pipeline_run_new() {
    let run = PipelineRun::new("timeline-1", "What if");
    assert!(!run.id.is_empty());
    assert_eq!(run.timeline_id, "timeline-1");
    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.current_stage, 0);
    assert!(run.error.is_none());
}

#[test]
fn test_pipeline_run_transition_stamps_update() {
    let mut run = PipelineRun::new("t", "s");
    let before = run.updated_at;
    run.transition(RunStatus::Running);
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.updated_at >= before);
}

#[test]
fn test_run_status_strings() {
    for status in [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Completed,
        RunStatus::Aborted,
    ] {
        assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
    }
}

// ============================================================================
// StageCheckpoint tests
// ============================================================================

#[test]
fn test_checkpoint_to_node_root() {
    let cp = StageCheckpoint::generated("run-1", 0, "divergence", 0, "seed");
    let node = cp.to_node(None);
    assert_eq!(node.id, cp.node_id);
    assert_eq!(node.origin, NodeOrigin::User);
    assert_eq!(node.created_at, cp.node_created_at);
    assert!(node.validate().is_ok());
}

#[test]
fn test_checkpoint_to_node_is_stable() {
    let cp = StageCheckpoint::generated("run-1", 2, "year-10", 10, "later");
    let first = cp.to_node(Some("p"));
    let second = cp.to_node(Some("p"));
    assert_eq!(first, second);
    assert_eq!(first.origin, NodeOrigin::Generator);
    assert_eq!(first.offset, 10);
}

#[test]
fn test_checkpoint_mark_persisted() {
    let mut cp = StageCheckpoint::generated("run-1", 1, "year-1", 1, "text");
    assert!(!cp.is_complete());
    cp.mark_persisted();
    assert!(cp.is_complete());
}
