//! Core execution records
//!
//! These types mirror what the execution engine persists: one
//! [`PlanExecution`] per pipeline run and one [`NodeExecution`] per
//! executed stage, step or wrapper node inside it.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node execution
pub type NodeExecutionId = String;

/// Unique identifier for a plan execution
pub type PlanExecutionId = String;

/// Status of a plan or node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Queued,
    Running,
    AsyncWaiting,
    TaskWaiting,
    InterventionWaiting,
    ApprovalWaiting,
    InputWaiting,
    ResourceWaiting,
    Paused,
    Discontinuing,
    Succeeded,
    Failed,
    Errored,
    Aborted,
    Expired,
    Skipped,
    IgnoreFailed,
    ApprovalRejected,
}

impl ExecutionStatus {
    /// Whether no further transitions are expected
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Errored
                | ExecutionStatus::Aborted
                | ExecutionStatus::Expired
                | ExecutionStatus::Skipped
                | ExecutionStatus::IgnoreFailed
                | ExecutionStatus::ApprovalRejected
        )
    }
}

/// How a node runs its work or children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Task,
    TaskChain,
    Sync,
    Async,
    AsyncChain,
    /// Runs exactly one child
    Child,
    /// Runs several children in parallel
    Children,
    /// Runs children one after another
    ChildChain,
    Constraint,
    #[default]
    Unknown,
}

/// One step of an ambiance: where in the plan hierarchy a node sits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    /// Plan node template this level instantiates
    pub setup_id: String,
    /// Node execution id of this level
    pub runtime_id: String,
    /// User facing identifier (e.g. the stage identifier)
    pub identifier: String,
    /// Step type, e.g. "STAGE" or "ShellScript"
    pub step_type: String,
    #[serde(default)]
    pub node_type: String,
}

impl Level {
    pub fn new(
        setup_id: impl Into<String>,
        runtime_id: impl Into<String>,
        identifier: impl Into<String>,
        step_type: impl Into<String>,
    ) -> Self {
        Self {
            setup_id: setup_id.into(),
            runtime_id: runtime_id.into(),
            identifier: identifier.into(),
            step_type: step_type.into(),
            node_type: "PLAN_NODE".to_string(),
        }
    }
}

/// Contextual addressing of a node execution
///
/// The last level is the node itself; earlier levels are its ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ambiance {
    pub plan_execution_id: PlanExecutionId,
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            levels: Vec::new(),
        }
    }

    /// The level describing the node itself
    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Setup id of the current level, if any
    pub fn current_setup_id(&self) -> Option<&str> {
        self.current_level()
            .map(|l| l.setup_id.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Clone this ambiance and append a child level
    pub fn for_child(&self, level: Level) -> Self {
        let mut cloned = self.clone();
        cloned.levels.push(level);
        cloned
    }
}

/// One run of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExecution {
    pub id: PlanExecutionId,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub status: ExecutionStatus,
}

impl PlanExecution {
    pub fn new(id: impl Into<String>, start_ts: i64) -> Self {
        Self {
            id: id.into(),
            start_ts,
            end_ts: None,
            status: ExecutionStatus::Running,
        }
    }
}

/// One executed unit of work within a plan execution
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    pub id: NodeExecutionId,
    pub ambiance: Ambiance,
    pub parent_id: Option<NodeExecutionId>,
    pub previous_id: Option<NodeExecutionId>,
    pub name: String,
    pub identifier: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub mode: ExecutionMode,
    pub created_at: i64,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub last_updated_at: i64,
    /// Set on attempts superseded by a retry
    #[serde(default)]
    pub old_retry: bool,
    /// Ids of the earlier attempts this execution retried
    #[serde(default)]
    pub retry_ids: Vec<NodeExecutionId>,
}

impl NodeExecution {
    pub fn plan_execution_id(&self) -> &str {
        &self.ambiance.plan_execution_id
    }

    /// Setup id of the plan node this execution instantiates
    pub fn setup_id(&self) -> Option<&str> {
        self.ambiance.current_setup_id()
    }

    /// Step type of the current ambiance level
    pub fn step_type(&self) -> &str {
        self.ambiance
            .current_level()
            .map(|l| l.step_type.as_str())
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<&str> {
        non_empty(&self.parent_id)
    }

    pub fn previous(&self) -> Option<&str> {
        non_empty(&self.previous_id)
    }

    /// A node with neither parent nor previous node is the plan's root
    pub fn is_root(&self) -> bool {
        self.parent().is_none() && self.previous().is_none()
    }
}

fn non_empty(id: &Option<String>) -> Option<&str> {
    id.as_deref().filter(|s| !s.is_empty())
}
