//! Adjacency list construction and rendering.
//!
//! - **builder**: turns flat node execution lists into adjacency lists, in
//!   one pass or incrementally
//! - **types**: the cached adjacency list and the response shape
//! - **tree**: the nested tree rendering used by the simple graph view

pub mod builder;
pub mod tree;
pub mod types;

pub use builder::{
    descendants_of, generate_adjacency_list, generate_graph_vertex_starting_from,
    populate_adjacency_list, prune_adjacency_list, refresh_vertices,
};
pub use tree::{CachedGraph, Graph, Subgraph, TreeVertex};
pub use types::{
    AdjacencyListInternal, EdgeList, EdgeListInternal, GraphVertex, OrchestrationAdjacencyList,
    OrchestrationGraph,
};
