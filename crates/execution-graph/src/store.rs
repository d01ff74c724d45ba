//! Read access to plan and node executions.
//!
//! Graph generation treats both stores as read-only collaborators. The
//! traits abstract over the real persistence layer; [`InMemoryExecutionStore`]
//! backs tests and embedded use.

use crate::error::{GraphError, Result};
use crate::types::{ExecutionStatus, NodeExecution, PlanExecution};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Source of node executions for a plan execution.
#[async_trait]
pub trait NodeExecutionStore: Send + Sync {
    /// Fetch the currently relevant node executions of a plan execution.
    ///
    /// Attempts superseded by a retry (`old_retry`) are excluded. Results are
    /// ordered by creation time, then id.
    async fn fetch_node_executions_without_old_retries(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>>;
}

/// Source of plan executions.
#[async_trait]
pub trait PlanExecutionStore: Send + Sync {
    /// Get a plan execution by id.
    async fn get(&self, plan_execution_id: &str) -> Result<Option<PlanExecution>>;
}

/// In-memory execution store.
///
/// Node executions are grouped by plan execution id and keyed by node
/// execution id.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    plans: RwLock<HashMap<String, PlanExecution>>,
    nodes: RwLock<HashMap<String, HashMap<String, NodeExecution>>>,
}

impl InMemoryExecutionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a plan execution.
    pub fn insert_plan_execution(&self, plan: PlanExecution) {
        self.plans.write().insert(plan.id.clone(), plan);
    }

    /// Insert or replace a node execution under its plan execution.
    pub fn upsert_node_execution(&self, node: NodeExecution) {
        let plan_execution_id = node.plan_execution_id().to_string();
        self.nodes
            .write()
            .entry(plan_execution_id)
            .or_default()
            .insert(node.id.clone(), node);
    }

    /// Transition a node execution to a new status.
    ///
    /// `last_updated_at` never moves backwards; final statuses also set `end_ts`.
    pub fn update_node_status(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
        status: ExecutionStatus,
        updated_at: i64,
    ) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(plan_execution_id)
            .and_then(|plan_nodes| plan_nodes.get_mut(node_execution_id))
            .ok_or_else(|| GraphError::NodeNotFound(node_execution_id.to_string()))?;

        node.status = status;
        node.last_updated_at = node.last_updated_at.max(updated_at);
        if status.is_final() {
            node.end_ts = Some(updated_at);
        }
        Ok(())
    }

    /// Number of stored node executions for a plan, including old retries.
    pub fn node_execution_count(&self, plan_execution_id: &str) -> usize {
        self.nodes
            .read()
            .get(plan_execution_id)
            .map_or(0, |plan_nodes| plan_nodes.len())
    }
}

#[async_trait]
impl NodeExecutionStore for InMemoryExecutionStore {
    async fn fetch_node_executions_without_old_retries(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>> {
        let nodes = self.nodes.read();
        let mut result: Vec<NodeExecution> = nodes
            .get(plan_execution_id)
            .map(|plan_nodes| {
                plan_nodes
                    .values()
                    .filter(|n| !n.old_retry)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(result)
    }
}

#[async_trait]
impl PlanExecutionStore for InMemoryExecutionStore {
    async fn get(&self, plan_execution_id: &str) -> Result<Option<PlanExecution>> {
        Ok(self.plans.read().get(plan_execution_id).cloned())
    }
}
