//! Storage layer for timeline persistence.
//!
//! This module provides SQLite-based storage for timeline nodes, pipeline
//! run records, and stage checkpoints.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Current time truncated to microseconds, so values survive a
/// round trip through storage and JSON unchanged.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// One divergent-timeline event.
///
/// Serialized with the wire names `parentId`, `year`, `createdBy` and
/// `createdAt`. Every field is required, `parentId` included (as `null`
/// for a root). Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HistoryNode {
    /// Unique node identifier within a timeline.
    pub id: String,
    /// Node this one branches from; `None` marks a root.
    #[serde(deserialize_with = "Option::deserialize")]
    pub parent_id: Option<String>,
    /// Stage offset (years after the divergence).
    #[serde(rename = "year")]
    pub offset: u32,
    /// Event text.
    pub description: String,
    /// Who produced the description.
    #[serde(rename = "createdBy")]
    pub origin: NodeOrigin,
    /// Creation time, used only for display ordering.
    pub created_at: DateTime<Utc>,
}

/// Producer of a node's description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeOrigin {
    /// Supplied by the caller.
    #[serde(rename = "user")]
    User,
    /// Produced by the generation capability.
    #[serde(rename = "AI")]
    Generator,
}

impl std::fmt::Display for NodeOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeOrigin::User => write!(f, "user"),
            NodeOrigin::Generator => write!(f, "AI"),
        }
    }
}

impl std::str::FromStr for NodeOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(NodeOrigin::User),
            "AI" => Ok(NodeOrigin::Generator),
            _ => Err(format!("Unknown node origin: {}", s)),
        }
    }
}

impl HistoryNode {
    /// Create a root node holding a user-supplied divergence.
    pub fn divergence(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            offset: 0,
            description: description.into(),
            origin: NodeOrigin::User,
            created_at: now(),
        }
    }

    /// Create a generated node chained under `parent_id`.
    pub fn generated(
        parent_id: impl Into<String>,
        offset: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: Some(parent_id.into()),
            offset,
            description: description.into(),
            origin: NodeOrigin::Generator,
            created_at: now(),
        }
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Override the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Parse a node from untyped JSON, mapping shape errors to
    /// [`StorageError::InvalidNode`].
    pub fn from_json(value: serde_json::Value) -> StorageResult<Self> {
        let node: HistoryNode =
            serde_json::from_value(value).map_err(|e| StorageError::InvalidNode {
                message: e.to_string(),
            })?;
        node.validate()?;
        Ok(node)
    }

    /// Check the invariants that do not depend on other nodes.
    pub fn validate(&self) -> StorageResult<()> {
        let invalid = |message: String| Err(StorageError::InvalidNode { message });

        if self.id.trim().is_empty() {
            return invalid("id cannot be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return invalid(format!("node {} has an empty description", self.id));
        }
        match &self.parent_id {
            None if self.offset != 0 => invalid(format!(
                "root node {} must have year 0, got {}",
                self.id, self.offset
            )),
            Some(parent) if parent.trim().is_empty() => {
                invalid(format!("node {} has an empty parentId", self.id))
            }
            Some(parent) if parent == &self.id => {
                invalid(format!("node {} cannot be its own parent", self.id))
            }
            _ => Ok(()),
        }
    }
}

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no stage executed yet.
    #[default]
    Pending,
    /// Stages are being executed.
    Running,
    /// Every stage persisted.
    Completed,
    /// A stage failed permanently; may be resumed.
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "aborted" => Ok(RunStatus::Aborted),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Persisted status record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    /// Unique run identifier.
    pub id: String,
    /// Timeline the run writes into.
    pub timeline_id: String,
    /// User-supplied divergence.
    pub seed_input: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Index of the stage being (or last) executed.
    pub current_stage: u32,
    /// Last permanent failure, if any.
    pub error: Option<String>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run was last updated.
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Create a pending run for a timeline
    pub fn new(timeline_id: impl Into<String>, seed_input: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: Uuid::new_v4().to_string(),
            timeline_id: timeline_id.into(),
            seed_input: seed_input.into(),
            status: RunStatus::Pending,
            current_stage: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status, stamping `updated_at`.
    pub fn transition(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = now();
    }
}

/// Progress of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Output produced, node not yet acknowledged by the store.
    Generated,
    /// Node acknowledged by the store; the stage is complete.
    Persisted,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointStatus::Generated => write!(f, "generated"),
            CheckpointStatus::Persisted => write!(f, "persisted"),
        }
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(CheckpointStatus::Generated),
            "persisted" => Ok(CheckpointStatus::Persisted),
            _ => Err(format!("Unknown checkpoint status: {}", s)),
        }
    }
}

/// Durable record of a stage's output and the node it becomes.
///
/// The node id and creation time are fixed when the checkpoint is first
/// written, so persisting the node again after a restart is a no-op upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCheckpoint {
    pub run_id: String,
    pub stage_index: u32,
    pub stage_name: String,
    pub offset: u32,
    pub node_id: String,
    pub output: String,
    pub status: CheckpointStatus,
    pub node_created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StageCheckpoint {
    /// Record freshly produced stage output.
    pub fn generated(
        run_id: impl Into<String>,
        stage_index: u32,
        stage_name: impl Into<String>,
        offset: u32,
        output: impl Into<String>,
    ) -> Self {
        let now = now();
        Self {
            run_id: run_id.into(),
            stage_index,
            stage_name: stage_name.into(),
            offset,
            node_id: Uuid::new_v4().to_string(),
            output: output.into(),
            status: CheckpointStatus::Generated,
            node_created_at: now,
            updated_at: now,
        }
    }

    /// Whether the stage's node has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Persisted
    }

    /// Mark the stage's node as acknowledged.
    pub fn mark_persisted(&mut self) {
        self.status = CheckpointStatus::Persisted;
        self.updated_at = now();
    }

    /// The node this stage stores, chained under `parent_id`.
    pub fn to_node(&self, parent_id: Option<&str>) -> HistoryNode {
        HistoryNode {
            id: self.node_id.clone(),
            parent_id: parent_id.map(str::to_string),
            offset: self.offset,
            description: self.output.clone(),
            origin: if self.stage_index == 0 {
                NodeOrigin::User
            } else {
                NodeOrigin::Generator
            },
            created_at: self.node_created_at,
        }
    }
}

/// Storage trait for database operations.
///
/// Node writes must go through [`crate::timeline::TimelineHandle::add`],
/// which serializes them per timeline; `upsert_node` is the primitive it uses.
#[async_trait]
pub trait Storage: Send + Sync {
    // Node operations

    /// Insert or overwrite a node under `(timeline_id, node.id)`.
    async fn upsert_node(&self, timeline_id: &str, node: &HistoryNode) -> StorageResult<()>;
    /// Get a node by ID.
    async fn get_node(&self, timeline_id: &str, id: &str) -> StorageResult<Option<HistoryNode>>;
    /// Snapshot of every node in a timeline, ordered by creation time.
    async fn list_nodes(&self, timeline_id: &str) -> StorageResult<Vec<HistoryNode>>;
    /// Number of nodes in a timeline.
    async fn count_nodes(&self, timeline_id: &str) -> StorageResult<u64>;

    // Run operations

    /// Create a new run record.
    async fn create_run(&self, run: &PipelineRun) -> StorageResult<()>;
    /// Get a run by ID.
    async fn get_run(&self, id: &str) -> StorageResult<Option<PipelineRun>>;
    /// Update status, stage and error of an existing run.
    async fn update_run(&self, run: &PipelineRun) -> StorageResult<()>;
    /// Update a completed run and discard its checkpoints atomically.
    async fn finish_run(&self, run: &PipelineRun) -> StorageResult<()>;
    /// Runs left pending or running, oldest first.
    async fn list_unfinished_runs(&self) -> StorageResult<Vec<PipelineRun>>;

    // Checkpoint operations

    /// Insert or overwrite a stage checkpoint.
    async fn save_checkpoint(&self, checkpoint: &StageCheckpoint) -> StorageResult<()>;
    /// All checkpoints of a run, ordered by stage index.
    async fn get_checkpoints(&self, run_id: &str) -> StorageResult<Vec<StageCheckpoint>>;

    /// Check database reachability.
    async fn ping(&self) -> StorageResult<()>;
}
