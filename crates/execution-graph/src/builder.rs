//! Fluent builder for plan executions
//!
//! Produces a [`PlanExecution`] together with its node executions, wiring
//! parent/previous links and ambiance levels the way the execution engine
//! records them. Each added node advances a logical clock so creation order
//! and `last_updated_at` are strictly increasing.

use crate::store::InMemoryExecutionStore;
use crate::types::{
    Ambiance, ExecutionMode, ExecutionStatus, Level, NodeExecution, PlanExecution,
};

/// Starting value of the builder's logical clock (epoch ms)
const CLOCK_START: i64 = 1_700_000_000_000;

/// Fluent builder for plan executions and their node executions
///
/// # Example
///
/// ```
/// use execution_graph::builder::PlanExecutionBuilder;
/// use execution_graph::types::ExecutionMode;
///
/// let (plan, nodes) = PlanExecutionBuilder::new("pe-1")
///     .root("pipeline", "pipeline-setup", ExecutionMode::Child)
///     .child("pipeline", "stages", "stages-setup", ExecutionMode::ChildChain)
///     .child("stages", "build", "build-setup", ExecutionMode::Task)
///     .next("build", "deploy", "deploy-setup", ExecutionMode::Task)
///     .build();
///
/// assert_eq!(plan.id, "pe-1");
/// assert_eq!(nodes.len(), 4);
/// ```
pub struct PlanExecutionBuilder {
    plan: PlanExecution,
    nodes: Vec<NodeExecution>,
    clock: i64,
}

impl PlanExecutionBuilder {
    /// Create a builder for a running plan execution
    pub fn new(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan: PlanExecution::new(plan_execution_id, CLOCK_START),
            nodes: Vec::new(),
            clock: CLOCK_START,
        }
    }

    /// Add the root node (no parent, no previous node)
    pub fn root(self, id: &str, setup_id: &str, mode: ExecutionMode) -> Self {
        let ambiance = Ambiance::new(self.plan.id.clone());
        self.push(id, setup_id, mode, None, None, ambiance)
    }

    /// Add the first node of a branch under `parent_id`
    pub fn child(self, parent_id: &str, id: &str, setup_id: &str, mode: ExecutionMode) -> Self {
        let ambiance = self.ambiance_of(parent_id);
        self.push(id, setup_id, mode, Some(parent_id), None, ambiance)
    }

    /// Add a node that runs after `previous_id` under the same parent
    pub fn next(self, previous_id: &str, id: &str, setup_id: &str, mode: ExecutionMode) -> Self {
        let (parent_id, ambiance) = match self.find(previous_id) {
            Some(previous) => {
                let mut ambiance = previous.ambiance.clone();
                ambiance.levels.pop();
                (previous.parent_id.clone(), ambiance)
            }
            None => (None, Ambiance::new(self.plan.id.clone())),
        };
        self.push(id, setup_id, mode, parent_id.as_deref(), Some(previous_id), ambiance)
    }

    /// Retry `id` as `new_id`: the original attempt fails and becomes an old retry
    pub fn retry(mut self, id: &str, new_id: &str) -> Self {
        let Some(index) = self.nodes.iter().position(|n| n.id == id) else {
            return self;
        };
        let tick = self.tick();
        let original = &mut self.nodes[index];
        original.status = ExecutionStatus::Failed;
        original.old_retry = true;
        original.end_ts = Some(tick);
        original.last_updated_at = tick;

        let mut attempt = original.clone();
        attempt.id = new_id.to_string();
        attempt.status = ExecutionStatus::Running;
        attempt.old_retry = false;
        attempt.end_ts = None;
        attempt.retry_ids.push(id.to_string());
        if let Some(level) = attempt.ambiance.levels.last_mut() {
            level.runtime_id = new_id.to_string();
        }

        let tick = self.tick();
        attempt.created_at = tick;
        attempt.start_ts = tick;
        attempt.last_updated_at = tick;
        self.nodes.push(attempt);
        self
    }

    /// Move a node to a new status, advancing its `last_updated_at`
    pub fn status(mut self, id: &str, status: ExecutionStatus) -> Self {
        let tick = self.tick();
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == id) {
            node.status = status;
            node.last_updated_at = tick;
            if status.is_final() {
                node.end_ts = Some(tick);
            }
        }
        self
    }

    /// Set the step type of the most recently added node
    pub fn with_step_type(mut self, step_type: &str) -> Self {
        if let Some(level) = self
            .nodes
            .last_mut()
            .and_then(|n| n.ambiance.levels.last_mut())
        {
            level.step_type = step_type.to_string();
        }
        self
    }

    /// Set the display name of the most recently added node
    pub fn with_name(mut self, name: &str) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.name = name.to_string();
        }
        self
    }

    /// Finish the plan execution with the given status
    pub fn finish(mut self, status: ExecutionStatus) -> Self {
        let tick = self.tick();
        self.plan.status = status;
        self.plan.end_ts = Some(tick);
        self
    }

    /// Build the plan execution and its node executions
    pub fn build(self) -> (PlanExecution, Vec<NodeExecution>) {
        (self.plan, self.nodes)
    }

    /// Build and insert everything into an in-memory store
    pub fn seed(self, store: &InMemoryExecutionStore) -> PlanExecution {
        let (plan, nodes) = self.build();
        store.insert_plan_execution(plan.clone());
        for node in nodes {
            store.upsert_node_execution(node);
        }
        plan
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn find(&self, id: &str) -> Option<&NodeExecution> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn ambiance_of(&self, id: &str) -> Ambiance {
        self.find(id)
            .map(|n| n.ambiance.clone())
            .unwrap_or_else(|| Ambiance::new(self.plan.id.clone()))
    }

    fn push(
        mut self,
        id: &str,
        setup_id: &str,
        mode: ExecutionMode,
        parent_id: Option<&str>,
        previous_id: Option<&str>,
        ambiance: Ambiance,
    ) -> Self {
        let tick = self.tick();
        let ambiance = ambiance.for_child(Level::new(setup_id, id, id, "STEP"));
        self.nodes.push(NodeExecution {
            id: id.to_string(),
            ambiance,
            parent_id: parent_id.map(str::to_string),
            previous_id: previous_id.map(str::to_string),
            name: id.to_string(),
            identifier: id.to_string(),
            status: ExecutionStatus::Running,
            mode,
            created_at: tick,
            start_ts: tick,
            end_ts: None,
            last_updated_at: tick,
            old_retry: false,
            retry_ids: Vec::new(),
        });
        self
    }
}
