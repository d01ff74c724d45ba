//! Adjacency list construction from flat node execution lists.
//!
//! Links are read from each node execution:
//! - a node with a `previous_id` hangs off that node's `next_ids`
//! - otherwise a node with a `parent_id` is the first node of a branch and
//!   hangs off the parent's `edges`
//! - a node with neither is the root
//!
//! Sibling lists are ordered by `(created_at, id)`, so a list grown
//! incrementally with [`populate_adjacency_list`] ends up identical to one
//! built in one pass with [`generate_adjacency_list`].

use super::tree::TreeVertex;
use super::types::{AdjacencyListInternal, EdgeListInternal, GraphVertex};
use crate::error::{GraphError, Result};
use crate::types::NodeExecution;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Build the adjacency list reachable from `root_node_id`.
///
/// With `is_partial` the node list may be a subtree: the starting node is
/// not required to be the plan's root and is detached from its parent,
/// previous and next nodes.
pub fn generate_adjacency_list(
    root_node_id: &str,
    node_executions: &[NodeExecution],
    is_partial: bool,
) -> Result<AdjacencyListInternal> {
    build_from(
        root_node_id,
        node_executions,
        BuildOptions {
            validate_root: !is_partial,
            detach_root: is_partial,
        },
    )
}

/// Splice node executions that are not in `adjacency_list` yet into it.
///
/// Ids already present are ignored. Nodes whose previous or parent node
/// never becomes part of the list are skipped, as they would be unreachable
/// in a full build. Returns the number of vertices added.
pub fn populate_adjacency_list(
    adjacency_list: &mut AdjacencyListInternal,
    new_node_executions: &[NodeExecution],
) -> usize {
    let mut seen = HashSet::new();
    let mut pending: Vec<&NodeExecution> = new_node_executions
        .iter()
        .filter(|n| !adjacency_list.contains(&n.id) && seen.insert(n.id.as_str()))
        .collect();
    pending.sort_by(|a, b| order_key(a).cmp(&order_key(b)));

    let mut added = 0;
    loop {
        let before = pending.len();
        pending.retain(|node| {
            let anchored = match anchor_of(node) {
                Some(anchor) => adjacency_list.contains(anchor),
                None => false,
            };
            if anchored {
                attach(adjacency_list, node);
                added += 1;
            }
            !anchored
        });
        if pending.len() == before {
            break;
        }
    }

    if !pending.is_empty() {
        log::debug!(
            "Skipped {} node executions not connected to adjacency list of {}",
            pending.len(),
            adjacency_list.plan_execution_id
        );
    }
    added
}

/// Copy newer status and timing data into existing vertices.
///
/// Only vertices whose node execution has a greater `last_updated_at` are
/// touched; edges never change. Returns the number of refreshed vertices.
pub fn refresh_vertices(
    adjacency_list: &mut AdjacencyListInternal,
    node_executions: &[NodeExecution],
) -> usize {
    let mut refreshed = 0;
    for node in node_executions {
        if let Some(vertex) = adjacency_list.graph_vertex_map.get_mut(&node.id) {
            if node.last_updated_at > vertex.last_updated_at {
                *vertex = GraphVertex::from(node);
                refreshed += 1;
                adjacency_list.cache_context_order =
                    adjacency_list.cache_context_order.max(node.last_updated_at);
            }
        }
    }
    refreshed
}

/// Drop vertices that no longer match `node_executions`.
///
/// A vertex goes when its node execution left the list (superseded by a
/// retry, for instance) or now links to a different previous or parent
/// node. Vertices hanging off a dropped vertex go with it, and references
/// to dropped ids are removed from the remaining edge lists. Dropped nodes
/// that are still in `node_executions` can be spliced back in with
/// [`populate_adjacency_list`]. Returns the number of vertices dropped.
pub fn prune_adjacency_list(
    adjacency_list: &mut AdjacencyListInternal,
    node_executions: &[NodeExecution],
) -> usize {
    let current: HashMap<&str, &NodeExecution> = node_executions
        .iter()
        .map(|n| (n.id.as_str(), n))
        .collect();

    let mut removed: HashSet<String> = adjacency_list
        .adjacency_map
        .iter()
        .filter(|(id, edges)| match current.get(id.as_str()) {
            None => true,
            Some(node) => {
                edges.prev_ids.first().map(String::as_str) != node.previous()
                    || edges.parent_id.as_deref() != node.parent()
            }
        })
        .map(|(id, _)| id.clone())
        .collect();

    loop {
        let orphaned: Vec<String> = adjacency_list
            .adjacency_map
            .iter()
            .filter(|(id, _)| !removed.contains(id.as_str()))
            .filter(|(_, edges)| {
                edges
                    .prev_ids
                    .first()
                    .or(edges.parent_id.as_ref())
                    .map_or(false, |anchor| {
                        removed.contains(anchor) || !adjacency_list.contains(anchor)
                    })
            })
            .map(|(id, _)| id.clone())
            .collect();
        if orphaned.is_empty() {
            break;
        }
        removed.extend(orphaned);
    }

    if removed.is_empty() {
        return 0;
    }

    adjacency_list
        .graph_vertex_map
        .retain(|id, _| !removed.contains(id));
    adjacency_list
        .adjacency_map
        .retain(|id, _| !removed.contains(id));
    for edges in adjacency_list.adjacency_map.values_mut() {
        edges.edges.retain(|id| !removed.contains(id));
        edges.next_ids.retain(|id| !removed.contains(id));
        edges.prev_ids.retain(|id| !removed.contains(id));
    }

    log::debug!(
        "Dropped {} outdated vertices from adjacency list of {}",
        removed.len(),
        adjacency_list.plan_execution_id
    );
    removed.len()
}

/// Build the tree rooted at `root_node_id`, following its next nodes.
pub fn generate_graph_vertex_starting_from(
    root_node_id: &str,
    node_executions: &[NodeExecution],
) -> Result<TreeVertex> {
    let adjacency_list = build_from(
        root_node_id,
        node_executions,
        BuildOptions {
            validate_root: false,
            detach_root: false,
        },
    )?;
    adjacency_list.to_tree(root_node_id)
}

/// Inclusive subtree of `root_node_id`, following parent links.
///
/// Input order is preserved. Empty when the root is not in the list.
pub fn descendants_of(root_node_id: &str, node_executions: &[NodeExecution]) -> Vec<NodeExecution> {
    if !node_executions.iter().any(|n| n.id == root_node_id) {
        return Vec::new();
    }

    let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in node_executions {
        if let Some(parent) = node.parent() {
            by_parent.entry(parent).or_default().push(node.id.as_str());
        }
    }

    let mut included: HashSet<&str> = HashSet::from([root_node_id]);
    let mut queue = VecDeque::from([root_node_id]);
    while let Some(id) = queue.pop_front() {
        for &child in by_parent.get(id).into_iter().flatten() {
            if included.insert(child) {
                queue.push_back(child);
            }
        }
    }

    node_executions
        .iter()
        .filter(|n| included.contains(n.id.as_str()))
        .cloned()
        .collect()
}

struct BuildOptions {
    validate_root: bool,
    detach_root: bool,
}

/// Children and successors of every node, each list in execution order.
struct LinkIndex<'a> {
    children: HashMap<&'a str, Vec<&'a NodeExecution>>,
    successors: HashMap<&'a str, Vec<&'a NodeExecution>>,
}

impl<'a> LinkIndex<'a> {
    fn new(node_executions: &'a [NodeExecution]) -> Self {
        let mut children: HashMap<&str, Vec<&NodeExecution>> = HashMap::new();
        let mut successors: HashMap<&str, Vec<&NodeExecution>> = HashMap::new();
        for node in node_executions {
            if let Some(previous) = node.previous() {
                successors.entry(previous).or_default().push(node);
            } else if let Some(parent) = node.parent() {
                children.entry(parent).or_default().push(node);
            }
        }
        for list in children.values_mut().chain(successors.values_mut()) {
            list.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
            list.dedup_by(|a, b| a.id == b.id);
        }
        Self {
            children,
            successors,
        }
    }

    fn children(&self, id: &str) -> &[&'a NodeExecution] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn successors(&self, id: &str) -> &[&'a NodeExecution] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn build_from(
    root_node_id: &str,
    node_executions: &[NodeExecution],
    options: BuildOptions,
) -> Result<AdjacencyListInternal> {
    let root = node_executions
        .iter()
        .find(|n| n.id == root_node_id)
        .ok_or_else(|| GraphError::NodeNotFound(root_node_id.to_string()))?;
    if options.validate_root && !root.is_root() {
        return Err(GraphError::invalid(format!(
            "Node execution {} has a parent or previous node and cannot start a full graph",
            root_node_id
        )));
    }

    let index = LinkIndex::new(node_executions);
    let mut adjacency_list = AdjacencyListInternal::new(root.plan_execution_id());
    let mut queue = VecDeque::from([root]);

    while let Some(node) = queue.pop_front() {
        if adjacency_list.contains(&node.id) {
            continue;
        }
        let detached = options.detach_root && node.id == root_node_id;
        let children = index.children(&node.id);
        let successors: &[&NodeExecution] = if detached {
            &[]
        } else {
            index.successors(&node.id)
        };

        let edges = EdgeListInternal {
            edges: children.iter().map(|n| n.id.clone()).collect(),
            next_ids: successors.iter().map(|n| n.id.clone()).collect(),
            prev_ids: if detached {
                Vec::new()
            } else {
                node.previous().map(str::to_string).into_iter().collect()
            },
            parent_id: if detached {
                None
            } else {
                node.parent().map(str::to_string)
            },
        };

        adjacency_list.cache_context_order =
            adjacency_list.cache_context_order.max(node.last_updated_at);
        adjacency_list
            .graph_vertex_map
            .insert(node.id.clone(), GraphVertex::from(node));
        adjacency_list.adjacency_map.insert(node.id.clone(), edges);

        queue.extend(children.iter().copied());
        queue.extend(successors.iter().copied());
    }

    if adjacency_list.len() < node_executions.len() && !options.detach_root {
        log::debug!(
            "{} of {} node executions are unreachable from {}",
            node_executions.len() - adjacency_list.len(),
            node_executions.len(),
            root_node_id
        );
    }
    Ok(adjacency_list)
}

/// The node a new vertex hangs off: its previous node, else its parent.
fn anchor_of(node: &NodeExecution) -> Option<&str> {
    node.previous().or_else(|| node.parent())
}

fn order_key(node: &NodeExecution) -> (i64, &str) {
    (node.created_at, node.id.as_str())
}

fn attach(adjacency_list: &mut AdjacencyListInternal, node: &NodeExecution) {
    let id = node.id.clone();
    adjacency_list.cache_context_order = adjacency_list.cache_context_order.max(node.last_updated_at);
    adjacency_list
        .graph_vertex_map
        .insert(id.clone(), GraphVertex::from(node));
    adjacency_list.adjacency_map.insert(
        id.clone(),
        EdgeListInternal {
            edges: Vec::new(),
            next_ids: Vec::new(),
            prev_ids: node.previous().map(str::to_string).into_iter().collect(),
            parent_id: node.parent().map(str::to_string),
        },
    );

    let AdjacencyListInternal {
        graph_vertex_map,
        adjacency_map,
        ..
    } = adjacency_list;
    let Some(anchor) = anchor_of(node) else {
        return;
    };
    let Some(anchor_edges) = adjacency_map.get_mut(anchor) else {
        return;
    };
    let slot = if node.previous().is_some() {
        &mut anchor_edges.next_ids
    } else {
        &mut anchor_edges.edges
    };
    insert_ordered(slot, id, graph_vertex_map);
}

fn insert_ordered(ids: &mut Vec<String>, id: String, vertices: &IndexMap<String, GraphVertex>) {
    if ids.contains(&id) {
        return;
    }
    let key = |candidate: &str| {
        let created_at = vertices.get(candidate).map_or(i64::MAX, |v| v.created_at);
        (created_at, candidate.to_string())
    };
    let new_key = key(id.as_str());
    let position = ids
        .iter()
        .position(|existing| key(existing.as_str()) > new_key)
        .unwrap_or(ids.len());
    ids.insert(position, id);
}
