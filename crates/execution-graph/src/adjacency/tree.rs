//! Tree-shaped graph rendering.
//!
//! The tree is a projection of [`AdjacencyListInternal`]: each vertex owns
//! its child branches as a [`Subgraph`] and links to the node that ran after
//! it through `next`.

use super::types::{AdjacencyListInternal, GraphVertex};
use crate::error::{GraphError, Result};
use crate::types::{ExecutionMode, ExecutionStatus, NodeExecutionId};
use serde::{Deserialize, Serialize};

/// A vertex with its child branches and successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeVertex {
    #[serde(flatten)]
    pub vertex: GraphVertex,
    pub subgraph: Option<Subgraph>,
    pub next: Option<Box<TreeVertex>>,
}

impl TreeVertex {
    /// Number of vertices in this tree, following subgraphs and next links.
    pub fn vertex_count(&self) -> usize {
        let children: usize = self
            .subgraph
            .as_ref()
            .map_or(0, |s| s.vertices.iter().map(TreeVertex::vertex_count).sum());
        1 + children + self.next.as_ref().map_or(0, |n| n.vertex_count())
    }
}

/// Child branches of a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgraph {
    /// Execution mode of the owning vertex
    pub mode: ExecutionMode,
    pub vertices: Vec<TreeVertex>,
}

/// Cached tree rendering of a plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    /// Cache key
    pub plan_execution_id: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub status: ExecutionStatus,
    /// Highest `last_updated_at` of the node executions rendered here
    pub cache_context_order: i64,
    pub graph_vertex: TreeVertex,
}

/// Flat form of a [`Graph`] kept in the graph cache.
///
/// Every `next` link nests the tree one level deeper, and long step chains
/// exceed what the JSON decoder accepts. The cache keeps the adjacency list
/// instead and renders the tree on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedGraph {
    /// Cache key
    pub plan_execution_id: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub status: ExecutionStatus,
    /// Highest `last_updated_at` of the node executions rendered here
    pub cache_context_order: i64,
    pub root_node_id: NodeExecutionId,
    pub adjacency_list: AdjacencyListInternal,
}

impl CachedGraph {
    /// Render the tree.
    pub fn to_graph(&self) -> Result<Graph> {
        Ok(Graph {
            plan_execution_id: self.plan_execution_id.clone(),
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            status: self.status,
            cache_context_order: self.cache_context_order,
            graph_vertex: self.adjacency_list.to_tree(&self.root_node_id)?,
        })
    }
}

impl AdjacencyListInternal {
    /// Render the tree rooted at `root_node_id`.
    pub fn to_tree(&self, root_node_id: &str) -> Result<TreeVertex> {
        let mut visiting = Vec::new();
        self.tree_vertex(root_node_id, &mut visiting)
    }

    fn tree_vertex(&self, id: &str, visiting: &mut Vec<String>) -> Result<TreeVertex> {
        let vertex = self
            .graph_vertex_map
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        if visiting.iter().any(|v| v == id) {
            return Err(GraphError::invalid(format!(
                "Cycle detected at node execution {}",
                id
            )));
        }
        visiting.push(id.to_string());

        let edges = self.adjacency_map.get(id);
        let mut subgraph = None;
        let mut next = None;
        if let Some(edges) = edges {
            if !edges.edges.is_empty() {
                let vertices = edges
                    .edges
                    .iter()
                    .map(|child| self.tree_vertex(child, visiting))
                    .collect::<Result<Vec<_>>>()?;
                subgraph = Some(Subgraph {
                    mode: vertex.mode,
                    vertices,
                });
            }
            if edges.next_ids.len() > 1 {
                log::warn!(
                    "Node execution {} has {} next nodes, rendering the first",
                    id,
                    edges.next_ids.len()
                );
            }
            if let Some(next_id) = edges.next_ids.first() {
                next = Some(Box::new(self.tree_vertex(next_id, visiting)?));
            }
        }

        visiting.pop();
        Ok(TreeVertex {
            vertex: vertex.clone(),
            subgraph,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::CachedGraph;
    use crate::adjacency::builder::generate_adjacency_list;
    use crate::builder::PlanExecutionBuilder;
    use crate::types::ExecutionMode;

    #[test]
    fn test_tree_projection() {
        let (_, nodes) = PlanExecutionBuilder::new("pe-1")
            .root("pipeline", "pipeline-setup", ExecutionMode::Child)
            .child("pipeline", "stages", "stages-setup", ExecutionMode::Children)
            .child("stages", "stage-a", "stage-a-setup", ExecutionMode::Task)
            .child("stages", "stage-b", "stage-b-setup", ExecutionMode::Task)
            .next("stage-b", "stage-c", "stage-c-setup", ExecutionMode::Task)
            .build();

        let list = generate_adjacency_list("pipeline", &nodes, false).unwrap();
        let tree = list.to_tree("pipeline").unwrap();

        assert_eq!(tree.vertex.uuid, "pipeline");
        assert_eq!(tree.vertex_count(), 5);
        let stages = &tree.subgraph.as_ref().unwrap().vertices[0];
        let branches = stages.subgraph.as_ref().unwrap();
        assert_eq!(branches.mode, ExecutionMode::Children);
        assert_eq!(branches.vertices.len(), 2);
        assert_eq!(branches.vertices[0].vertex.uuid, "stage-a");
        assert_eq!(
            branches.vertices[1].next.as_ref().unwrap().vertex.uuid,
            "stage-c"
        );
    }

    #[test]
    fn test_cached_graph_survives_long_chains() {
        let mut builder = PlanExecutionBuilder::new("pe-1")
            .root("pipeline", "pipeline-setup", ExecutionMode::Child)
            .child("pipeline", "step-0", "step-setup", ExecutionMode::Task);
        for i in 1..200 {
            let previous = format!("step-{}", i - 1);
            builder = builder.next(&previous, &format!("step-{}", i), "step-setup", ExecutionMode::Task);
        }
        let (plan, nodes) = builder.build();

        let cached = CachedGraph {
            plan_execution_id: plan.id.clone(),
            start_ts: plan.start_ts,
            end_ts: plan.end_ts,
            status: plan.status,
            cache_context_order: 1,
            root_node_id: "pipeline".to_string(),
            adjacency_list: generate_adjacency_list("pipeline", &nodes, false).unwrap(),
        };
        let json = serde_json::to_vec(&cached).unwrap();
        let decoded: CachedGraph = serde_json::from_slice(&json).unwrap();

        let graph = decoded.to_graph().unwrap();
        assert_eq!(graph.graph_vertex.vertex_count(), 201);
        assert_eq!(graph, cached.to_graph().unwrap());
    }

    #[test]
    fn test_unknown_root_is_not_found() {
        let (_, nodes) = PlanExecutionBuilder::new("pe-1")
            .root("pipeline", "pipeline-setup", ExecutionMode::Child)
            .build();
        let list = generate_adjacency_list("pipeline", &nodes, false).unwrap();
        assert!(list.to_tree("missing").is_err());
    }

    #[test]
    fn test_serialized_vertex_is_flattened() {
        let (_, nodes) = PlanExecutionBuilder::new("pe-1")
            .root("pipeline", "pipeline-setup", ExecutionMode::Child)
            .build();
        let tree = generate_adjacency_list("pipeline", &nodes, false)
            .unwrap()
            .to_tree("pipeline")
            .unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["uuid"], "pipeline");
        assert!(json["subgraph"].is_null());
    }
}
