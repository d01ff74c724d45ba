//! Adjacency list types.
//!
//! [`AdjacencyListInternal`] is the cached working structure; it keeps
//! back-links (`parent_id`, `prev_ids`) needed for incremental merges.
//! [`OrchestrationGraph`] is the response shape handed to callers.

use crate::types::{ExecutionMode, ExecutionStatus, NodeExecution, NodeExecutionId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Vertex metadata for one node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphVertex {
    pub uuid: NodeExecutionId,
    pub plan_execution_id: String,
    pub setup_id: Option<String>,
    pub identifier: String,
    pub name: String,
    pub step_type: String,
    pub status: ExecutionStatus,
    pub mode: ExecutionMode,
    pub created_at: i64,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub last_updated_at: i64,
    #[serde(default)]
    pub retry_ids: Vec<NodeExecutionId>,
}

impl From<&NodeExecution> for GraphVertex {
    fn from(node: &NodeExecution) -> Self {
        Self {
            uuid: node.id.clone(),
            plan_execution_id: node.plan_execution_id().to_string(),
            setup_id: node.setup_id().map(str::to_string),
            identifier: node.identifier.clone(),
            name: node.name.clone(),
            step_type: node.step_type().to_string(),
            status: node.status,
            mode: node.mode,
            created_at: node.created_at,
            start_ts: node.start_ts,
            end_ts: node.end_ts,
            last_updated_at: node.last_updated_at,
            retry_ids: node.retry_ids.clone(),
        }
    }
}

/// Edges leaving and entering one vertex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeListInternal {
    /// First node of each child branch, in execution order.
    pub edges: Vec<NodeExecutionId>,
    /// Nodes that ran right after this one.
    pub next_ids: Vec<NodeExecutionId>,
    pub prev_ids: Vec<NodeExecutionId>,
    pub parent_id: Option<NodeExecutionId>,
}

/// Parent-to-children structure of one plan execution.
///
/// Equality compares vertex and edge maps as maps; insertion order is
/// irrelevant, so a merged list equals a freshly built one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjacencyListInternal {
    /// Cache key
    pub plan_execution_id: String,
    /// Highest `last_updated_at` folded into this list
    pub cache_context_order: i64,
    pub graph_vertex_map: IndexMap<NodeExecutionId, GraphVertex>,
    pub adjacency_map: IndexMap<NodeExecutionId, EdgeListInternal>,
}

impl AdjacencyListInternal {
    pub fn new(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            ..Self::default()
        }
    }

    pub fn contains(&self, node_execution_id: &str) -> bool {
        self.graph_vertex_map.contains_key(node_execution_id)
    }

    pub fn len(&self) -> usize {
        self.graph_vertex_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph_vertex_map.is_empty()
    }

    /// Children and next nodes reachable in one hop.
    pub fn successors(&self, node_execution_id: &str) -> Vec<&str> {
        self.adjacency_map
            .get(node_execution_id)
            .map(|e| {
                e.edges
                    .iter()
                    .chain(e.next_ids.iter())
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Project into the response shape, dropping back-links.
    pub fn to_orchestration_adjacency_list(&self) -> OrchestrationAdjacencyList {
        OrchestrationAdjacencyList {
            graph_vertex_map: self.graph_vertex_map.clone(),
            adjacency_map: self
                .adjacency_map
                .iter()
                .map(|(id, edges)| {
                    (
                        id.clone(),
                        EdgeList {
                            edges: edges.edges.clone(),
                            next_ids: edges.next_ids.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Forward edges of one vertex in the response shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeList {
    pub edges: Vec<NodeExecutionId>,
    pub next_ids: Vec<NodeExecutionId>,
}

/// Adjacency list as returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationAdjacencyList {
    pub graph_vertex_map: IndexMap<NodeExecutionId, GraphVertex>,
    pub adjacency_map: IndexMap<NodeExecutionId, EdgeList>,
}

/// Orchestration graph of a plan execution (or of a subtree of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationGraph {
    pub plan_execution_id: String,
    pub root_node_ids: Vec<NodeExecutionId>,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub status: ExecutionStatus,
    pub adjacency_list: OrchestrationAdjacencyList,
}
