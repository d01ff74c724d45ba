//! Execution Graph - graph views of pipeline plan executions
//!
//! This crate turns the flat list of node executions recorded for a plan
//! execution into graph shapes a UI can render, and caches them so repeated
//! requests for a running pipeline stay cheap. It supports:
//!
//! - Tree renderings invalidated by any node update
//! - Adjacency list graphs grown incrementally from the cached copy
//! - Partial graphs rooted at a single stage or step
//! - A failure-tolerant cache with expiry and stale-write protection
//! - Background cache writes that never block a response
//!
//! # Architecture
//!
//! - `adjacency`: pure construction of adjacency lists and trees
//! - `cache`: storage backend, typed cache and writer pool
//! - `service`: `GraphGenerationService`, which ties the stores and the
//!   cache together
//! - `events`: `GraphEventSink` for observing cache behaviour
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use execution_graph::{GraphGenerationService, InMemoryCacheBackend, InMemoryExecutionStore};
//!
//! # async fn run() -> execution_graph::Result<()> {
//! let store = Arc::new(InMemoryExecutionStore::new());
//! let service = GraphGenerationService::builder(
//!     store.clone(),
//!     store.clone(),
//!     Arc::new(InMemoryCacheBackend::new()),
//! )
//! .build();
//!
//! let graph = service.generate_orchestration_graph("plan-execution-id").await?;
//! println!("{} vertices", graph.adjacency_list.graph_vertex_map.len());
//! # Ok(())
//! # }
//! ```

pub mod adjacency;
pub mod builder;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod service;
pub mod store;
pub mod types;

// Re-export key types
pub use adjacency::{AdjacencyListInternal, Graph, OrchestrationGraph};
pub use builder::PlanExecutionBuilder;
pub use cache::{CacheBackend, GraphCache, InMemoryCacheBackend};
pub use config::{ConfigError, GraphServiceConfig};
pub use error::{ErrorKind, GraphError, Result};
pub use events::{GraphEvent, GraphEventSink, NullEventSink, VecEventSink};
pub use service::{GraphGenerationService, GraphGenerationServiceBuilder};
pub use store::{InMemoryExecutionStore, NodeExecutionStore, PlanExecutionStore};
pub use types::{ExecutionMode, ExecutionStatus, NodeExecution, PlanExecution};
