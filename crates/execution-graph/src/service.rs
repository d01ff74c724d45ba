//! Graph generation service
//!
//! Answers graph requests for a plan execution from the execution stores,
//! using the graph cache to avoid rebuilding what has not changed:
//!
//! - [`GraphGenerationService::generate_graph`] serves a tree rendering and
//!   rebuilds it whenever any node execution changed since it was cached.
//! - [`GraphGenerationService::generate_orchestration_graph`] keeps an
//!   adjacency list in the cache and merges node execution changes into it:
//!   new nodes are spliced in, superseded or relinked ones dropped.
//! - The partial variants render the subtree under one node and bypass the
//!   cache.
//!
//! Cache writes never block a response: they are queued on a
//! [`CacheWriter`] and may be dropped under load.

use crate::adjacency::{
    descendants_of, generate_adjacency_list, populate_adjacency_list, prune_adjacency_list,
    refresh_vertices, AdjacencyListInternal, CachedGraph, Graph, OrchestrationGraph,
};
use crate::cache::{
    CacheBackend, CacheNamespace, CacheWriter, Cacheable, GraphCache, UpsertOutcome,
};
use crate::config::GraphServiceConfig;
use crate::error::{GraphError, Result};
use crate::events::{emit, GraphEvent, GraphEventSink, NullEventSink};
use crate::store::{NodeExecutionStore, PlanExecutionStore};
use crate::types::{NodeExecution, PlanExecution};
use std::sync::Arc;

/// Plan execution and its current node executions.
struct PlanSnapshot {
    plan: PlanExecution,
    nodes: Vec<NodeExecution>,
    /// Highest `last_updated_at` among `nodes`
    latest_update: i64,
}

/// Builds and caches execution graphs.
pub struct GraphGenerationService {
    node_store: Arc<dyn NodeExecutionStore>,
    plan_store: Arc<dyn PlanExecutionStore>,
    graph_cache: GraphCache<CachedGraph>,
    adjacency_cache: GraphCache<AdjacencyListInternal>,
    writer: CacheWriter,
    events: Arc<dyn GraphEventSink>,
    config: GraphServiceConfig,
}

/// Builder for [`GraphGenerationService`]
pub struct GraphGenerationServiceBuilder {
    node_store: Arc<dyn NodeExecutionStore>,
    plan_store: Arc<dyn PlanExecutionStore>,
    cache_backend: Arc<dyn CacheBackend>,
    config: GraphServiceConfig,
    events: Arc<dyn GraphEventSink>,
}

impl GraphGenerationServiceBuilder {
    pub fn config(mut self, config: GraphServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn GraphEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Build the service and start its cache writers.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> GraphGenerationService {
        let policy = self.config.write_policy();
        let writer = CacheWriter::new(
            self.config.write_workers,
            self.config.write_queue_capacity,
            self.events.clone(),
        );
        log::debug!(
            "Graph generation service started with {} cache writers (ttl {}s)",
            self.config.write_workers,
            self.config.cache_ttl_secs
        );

        GraphGenerationService {
            node_store: self.node_store,
            plan_store: self.plan_store,
            graph_cache: GraphCache::new(self.cache_backend.clone(), policy),
            adjacency_cache: GraphCache::new(self.cache_backend, policy),
            writer,
            events: self.events,
            config: self.config,
        }
    }
}

impl GraphGenerationService {
    pub fn builder(
        node_store: Arc<dyn NodeExecutionStore>,
        plan_store: Arc<dyn PlanExecutionStore>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> GraphGenerationServiceBuilder {
        GraphGenerationServiceBuilder {
            node_store,
            plan_store,
            cache_backend,
            config: GraphServiceConfig::default(),
            events: Arc::new(NullEventSink),
        }
    }

    pub fn config(&self) -> &GraphServiceConfig {
        &self.config
    }

    /// Tree rendering of a plan execution.
    ///
    /// Served from the cache unless a node execution was updated after the
    /// cached rendering was built.
    pub async fn generate_graph(&self, plan_execution_id: &str) -> Result<Graph> {
        let snapshot = self.load_snapshot(plan_execution_id).await?;

        if let Some(cached) = self.graph_cache.get(plan_execution_id).await {
            if cached.cache_context_order >= snapshot.latest_update {
                match cached.to_graph() {
                    Ok(graph) => {
                        log::debug!("Graph cache hit for {}", plan_execution_id);
                        emit(
                            self.events.as_ref(),
                            GraphEvent::cache_hit(plan_execution_id, CacheNamespace::Graph),
                        );
                        return Ok(graph);
                    }
                    Err(e) => log::warn!(
                        "Cached graph of {} cannot be rendered, rebuilding: {}",
                        plan_execution_id,
                        e
                    ),
                }
            } else {
                log::debug!(
                    "Cached graph of {} is stale ({} < {})",
                    plan_execution_id,
                    cached.cache_context_order,
                    snapshot.latest_update
                );
            }
        }
        emit(
            self.events.as_ref(),
            GraphEvent::cache_miss(plan_execution_id, CacheNamespace::Graph),
        );

        let root_node_id = resolve_root_node_id(plan_execution_id, &snapshot.nodes)?;
        let cached = CachedGraph {
            plan_execution_id: plan_execution_id.to_string(),
            start_ts: snapshot.plan.start_ts,
            end_ts: snapshot.plan.end_ts,
            status: snapshot.plan.status,
            cache_context_order: snapshot.latest_update,
            adjacency_list: generate_adjacency_list(&root_node_id, &snapshot.nodes, false)?,
            root_node_id,
        };
        let graph = cached.to_graph()?;
        emit(
            self.events.as_ref(),
            GraphEvent::TreeBuilt {
                plan_execution_id: plan_execution_id.to_string(),
                vertex_count: graph.graph_vertex.vertex_count(),
            },
        );

        self.queue_write(&self.graph_cache, cached);
        Ok(graph)
    }

    /// Adjacency list graph of a whole plan execution.
    ///
    /// A cached list is brought up to date instead of being rebuilt: vertices
    /// whose node execution left the plan (old retries) or moved are dropped,
    /// new node executions spliced in, and, when enabled, vertex data
    /// refreshed. The result equals a full build of the current node list.
    pub async fn generate_orchestration_graph(
        &self,
        plan_execution_id: &str,
    ) -> Result<OrchestrationGraph> {
        let snapshot = self.load_snapshot(plan_execution_id).await?;
        let root_node_id = resolve_root_node_id(plan_execution_id, &snapshot.nodes)?;

        let merged = match self.adjacency_cache.get(plan_execution_id).await {
            Some(cached) => {
                emit(
                    self.events.as_ref(),
                    GraphEvent::cache_hit(plan_execution_id, CacheNamespace::OrchestrationAdjacencyList),
                );
                self.merge_into_cached(cached, &snapshot, &root_node_id)
            }
            None => {
                emit(
                    self.events.as_ref(),
                    GraphEvent::cache_miss(plan_execution_id, CacheNamespace::OrchestrationAdjacencyList),
                );
                None
            }
        };

        let adjacency_list = match merged {
            Some(list) => list,
            None => {
                let mut list = generate_adjacency_list(&root_node_id, &snapshot.nodes, false)?;
                list.cache_context_order = snapshot.latest_update;
                emit(
                    self.events.as_ref(),
                    GraphEvent::AdjacencyListBuilt {
                        plan_execution_id: plan_execution_id.to_string(),
                        partial: false,
                        vertex_count: list.len(),
                    },
                );
                self.queue_write(&self.adjacency_cache, list.clone());
                list
            }
        };

        Ok(orchestration_graph(&snapshot.plan, root_node_id, &adjacency_list))
    }

    /// Adjacency list graph of the subtree under one node.
    ///
    /// `starting_setup_node_id` must match exactly one node execution of the
    /// plan; the cache is neither read nor written.
    pub async fn generate_partial_orchestration_graph(
        &self,
        starting_setup_node_id: &str,
        plan_execution_id: &str,
    ) -> Result<OrchestrationGraph> {
        let snapshot = self.load_snapshot(plan_execution_id).await?;

        let matches: Vec<&NodeExecution> = snapshot
            .nodes
            .iter()
            .filter(|n| n.setup_id() == Some(starting_setup_node_id))
            .collect();
        let starting_node_id = match matches.as_slice() {
            [] => {
                return Err(GraphError::StartingNodeNotFound(
                    starting_setup_node_id.to_string(),
                ))
            }
            [node] => node.id.clone(),
            _ => {
                return Err(GraphError::RepeatedSetupNodeIds {
                    setup_node_id: starting_setup_node_id.to_string(),
                    count: matches.len(),
                })
            }
        };

        self.partial_graph(&snapshot, starting_node_id)
    }

    /// Adjacency list graph of the subtree under a known node execution.
    ///
    /// For setup nodes that ran more than once (loops, retries) the caller
    /// picks the execution; it must belong to the plan and instantiate
    /// `starting_setup_node_id`.
    pub async fn generate_partial_orchestration_graph_for_execution(
        &self,
        starting_setup_node_id: &str,
        plan_execution_id: &str,
        starting_node_execution_id: &str,
    ) -> Result<OrchestrationGraph> {
        let snapshot = self.load_snapshot(plan_execution_id).await?;

        let node = snapshot
            .nodes
            .iter()
            .find(|n| n.id == starting_node_execution_id)
            .ok_or_else(|| GraphError::NodeNotFound(starting_node_execution_id.to_string()))?;
        if node.setup_id() != Some(starting_setup_node_id) {
            return Err(GraphError::invalid(format!(
                "Node execution {} does not belong to setup node {}",
                starting_node_execution_id, starting_setup_node_id
            )));
        }

        let starting_node_id = node.id.clone();
        self.partial_graph(&snapshot, starting_node_id)
    }

    /// Queue a write of a pre-built adjacency list. Returns `false` if dropped.
    pub fn cache_orchestration_adjacency_list(&self, adjacency_list: AdjacencyListInternal) -> bool {
        self.queue_write(&self.adjacency_cache, adjacency_list)
    }

    /// Wait for queued cache writes to finish.
    pub async fn flush_cache_writes(&self) {
        self.writer.flush().await;
    }

    /// Finish queued cache writes and stop the writers.
    pub async fn shutdown(self) {
        self.writer.shutdown().await;
    }

    async fn load_snapshot(&self, plan_execution_id: &str) -> Result<PlanSnapshot> {
        let plan = self
            .plan_store
            .get(plan_execution_id)
            .await?
            .ok_or_else(|| GraphError::PlanExecutionNotFound(plan_execution_id.to_string()))?;

        let nodes = self
            .node_store
            .fetch_node_executions_without_old_retries(plan_execution_id)
            .await?;
        let latest_update = nodes
            .iter()
            .map(|n| n.last_updated_at)
            .max()
            .ok_or_else(|| GraphError::NoNodesFound(plan_execution_id.to_string()))?;

        Ok(PlanSnapshot {
            plan,
            nodes,
            latest_update,
        })
    }

    /// Bring a cached list up to date with the snapshot.
    ///
    /// `None` when the root itself was dropped and a full build is needed.
    fn merge_into_cached(
        &self,
        mut adjacency_list: AdjacencyListInternal,
        snapshot: &PlanSnapshot,
        root_node_id: &str,
    ) -> Option<AdjacencyListInternal> {
        let removed = prune_adjacency_list(&mut adjacency_list, &snapshot.nodes);
        if !adjacency_list.contains(root_node_id) {
            log::debug!(
                "Cached adjacency list of {} lost its root {}, rebuilding",
                adjacency_list.plan_execution_id,
                root_node_id
            );
            return None;
        }

        let added = populate_adjacency_list(&mut adjacency_list, &snapshot.nodes);
        let refreshed = if self.config.refresh_stale_vertices {
            refresh_vertices(&mut adjacency_list, &snapshot.nodes)
        } else {
            0
        };

        if added == 0 && refreshed == 0 && removed == 0 {
            log::debug!(
                "Cached adjacency list of {} is up to date",
                adjacency_list.plan_execution_id
            );
            return Some(adjacency_list);
        }

        log::debug!(
            "Merged {} new, {} updated and {} dropped node executions into adjacency list of {}",
            added,
            refreshed,
            removed,
            adjacency_list.plan_execution_id
        );
        adjacency_list.cache_context_order = snapshot.latest_update;
        emit(
            self.events.as_ref(),
            GraphEvent::AdjacencyListMerged {
                plan_execution_id: adjacency_list.plan_execution_id.clone(),
                added,
                refreshed,
                removed,
            },
        );
        self.queue_write(&self.adjacency_cache, adjacency_list.clone());
        Some(adjacency_list)
    }

    fn partial_graph(
        &self,
        snapshot: &PlanSnapshot,
        starting_node_id: String,
    ) -> Result<OrchestrationGraph> {
        let subtree = descendants_of(&starting_node_id, &snapshot.nodes);
        let adjacency_list = generate_adjacency_list(&starting_node_id, &subtree, true)?;
        emit(
            self.events.as_ref(),
            GraphEvent::AdjacencyListBuilt {
                plan_execution_id: snapshot.plan.id.clone(),
                partial: true,
                vertex_count: adjacency_list.len(),
            },
        );
        Ok(orchestration_graph(&snapshot.plan, starting_node_id, &adjacency_list))
    }

    fn queue_write<V: Cacheable>(&self, cache: &GraphCache<V>, value: V) -> bool {
        let label = format!("{}:{}", V::NAMESPACE.as_str(), value.cache_key());
        let cache = cache.clone();
        let events = self.events.clone();
        let ttl = self.config.cache_ttl();
        let task_label = label.clone();

        self.writer.submit(label, async move {
            match cache.upsert(&value, ttl).await? {
                UpsertOutcome::Written => {
                    log::debug!("Cached {}", task_label);
                    emit(events.as_ref(), GraphEvent::CacheWriteCompleted { label: task_label });
                }
                UpsertOutcome::Stale { stored_order } => {
                    log::debug!(
                        "Skipped caching {}: stored value is newer ({} > {})",
                        task_label,
                        stored_order,
                        value.cache_context_order()
                    );
                    emit(
                        events.as_ref(),
                        GraphEvent::CacheWriteRejected {
                            label: task_label,
                            stored_order,
                        },
                    );
                }
            }
            Ok(())
        })
    }
}

/// Id of the single node execution with neither parent nor previous node.
pub fn resolve_root_node_id(plan_execution_id: &str, nodes: &[NodeExecution]) -> Result<String> {
    let roots: Vec<&NodeExecution> = nodes.iter().filter(|n| n.is_root()).collect();
    match roots.as_slice() {
        [] => Err(GraphError::RootNotFound(plan_execution_id.to_string())),
        [root] => Ok(root.id.clone()),
        _ => Err(GraphError::MultipleRootNodes {
            plan_execution_id: plan_execution_id.to_string(),
            count: roots.len(),
        }),
    }
}

fn orchestration_graph(
    plan: &PlanExecution,
    root_node_id: String,
    adjacency_list: &AdjacencyListInternal,
) -> OrchestrationGraph {
    OrchestrationGraph {
        plan_execution_id: plan.id.clone(),
        root_node_ids: vec![root_node_id],
        start_ts: plan.start_ts,
        end_ts: plan.end_ts,
        status: plan.status,
        adjacency_list: adjacency_list.to_orchestration_adjacency_list(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PlanExecutionBuilder;
    use crate::cache::{CacheEntry, InMemoryCacheBackend, WritePolicy};
    use crate::events::VecEventSink;
    use crate::store::InMemoryExecutionStore;
    use crate::types::{ExecutionMode, ExecutionStatus};
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    struct Harness {
        store: Arc<InMemoryExecutionStore>,
        backend: Arc<InMemoryCacheBackend>,
        events: Arc<VecEventSink>,
        service: GraphGenerationService,
    }

    fn harness(config: GraphServiceConfig) -> Harness {
        init_logging();
        let store = Arc::new(InMemoryExecutionStore::new());
        let backend = Arc::new(InMemoryCacheBackend::new());
        let events = Arc::new(VecEventSink::new());
        let service = GraphGenerationService::builder(store.clone(), store.clone(), backend.clone())
            .config(config)
            .event_sink(events.clone())
            .build();
        Harness {
            store,
            backend,
            events,
            service,
        }
    }

    fn full_builds(events: &VecEventSink) -> usize {
        events.count(|e| matches!(e, GraphEvent::AdjacencyListBuilt { partial: false, .. }))
    }

    /// Pipeline with two parallel stages, the second followed by a third.
    fn pipeline(plan_execution_id: &str) -> PlanExecutionBuilder {
        PlanExecutionBuilder::new(plan_execution_id)
            .root("pipeline", "pipeline-setup", ExecutionMode::Child)
            .child("pipeline", "stages", "stages-setup", ExecutionMode::Children)
            .child("stages", "stage-a", "stage-a-setup", ExecutionMode::ChildChain)
            .child("stage-a", "step-a1", "step-1-setup", ExecutionMode::Task)
            .next("step-a1", "step-a2", "step-2-setup", ExecutionMode::Task)
            .child("stages", "stage-b", "stage-b-setup", ExecutionMode::ChildChain)
            .child("stage-b", "step-b1", "step-b1-setup", ExecutionMode::Task)
    }

    #[tokio::test]
    async fn test_unknown_plan_and_empty_plan() {
        let h = harness(GraphServiceConfig::default());
        let err = assert_err!(h.service.generate_orchestration_graph("missing").await);
        assert!(matches!(err, GraphError::PlanExecutionNotFound(_)));

        h.store
            .insert_plan_execution(PlanExecution::new("pe-empty", 1_000));
        let err = assert_err!(h.service.generate_graph("pe-empty").await);
        assert_eq!(err.to_string(), "No nodes found for planExecutionId [pe-empty]");
        let err = assert_err!(h.service.generate_orchestration_graph("pe-empty").await);
        assert!(matches!(err, GraphError::NoNodesFound(_)));
        assert!(h.backend.stats().entries == 0);
    }

    #[tokio::test]
    async fn test_miss_then_hit_builds_once() {
        let h = harness(GraphServiceConfig::default());
        pipeline("pe-1").seed(&h.store);

        let first = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        h.service.flush_cache_writes().await;
        let second = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);

        assert_eq!(first, second);
        assert_eq!(first.root_node_ids, vec!["pipeline".to_string()]);
        assert_eq!(first.adjacency_list.graph_vertex_map.len(), 7);
        assert_eq!(full_builds(&h.events), 1);
        assert_eq!(
            h.events.count(|e| matches!(e, GraphEvent::CacheHit { .. })),
            1
        );
        assert_eq!(
            h.events.count(|e| matches!(e, GraphEvent::AdjacencyListMerged { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_incremental_append_matches_full_build() {
        let h = harness(GraphServiceConfig::default());
        let (plan, nodes) = pipeline("pe-1").build();
        h.store.insert_plan_execution(plan);
        for node in &nodes[..3] {
            h.store.upsert_node_execution(node.clone());
        }

        let partial_view = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        assert_eq!(partial_view.adjacency_list.graph_vertex_map.len(), 3);
        h.service.flush_cache_writes().await;

        for node in &nodes[3..] {
            h.store.upsert_node_execution(node.clone());
        }
        let merged = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);

        let expected = generate_adjacency_list("pipeline", &nodes, false)
            .unwrap()
            .to_orchestration_adjacency_list();
        assert_eq!(merged.adjacency_list, expected);
        assert_eq!(full_builds(&h.events), 1);
        assert_eq!(
            h.events.count(|e| matches!(
                e,
                GraphEvent::AdjacencyListMerged { added: 4, refreshed: 0, removed: 0, .. }
            )),
            1
        );

        // the merged list was written back
        h.service.flush_cache_writes().await;
        let cached = h.service.adjacency_cache.get("pe-1").await.unwrap();
        assert_eq!(cached.len(), 7);
        assert_eq!(cached.cache_context_order, nodes.iter().map(|n| n.last_updated_at).max().unwrap());
    }

    #[tokio::test]
    async fn test_status_changes_are_refreshed() {
        let h = harness(GraphServiceConfig::default());
        pipeline("pe-1").seed(&h.store);
        assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        h.service.flush_cache_writes().await;

        h.store
            .update_node_status("pe-1", "step-b1", ExecutionStatus::Failed, 1_800_000_000_000)
            .unwrap();
        let graph = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        let vertex = &graph.adjacency_list.graph_vertex_map["step-b1"];
        assert_eq!(vertex.status, ExecutionStatus::Failed);
        assert_eq!(vertex.end_ts, Some(1_800_000_000_000));
        assert_eq!(full_builds(&h.events), 1);
    }

    #[tokio::test]
    async fn test_refresh_can_be_disabled() {
        let h = harness(GraphServiceConfig {
            refresh_stale_vertices: false,
            ..Default::default()
        });
        pipeline("pe-1").seed(&h.store);
        assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        h.service.flush_cache_writes().await;

        h.store
            .update_node_status("pe-1", "step-b1", ExecutionStatus::Failed, 1_800_000_000_000)
            .unwrap();
        let graph = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        assert_eq!(
            graph.adjacency_list.graph_vertex_map["step-b1"].status,
            ExecutionStatus::Running
        );
    }

    #[tokio::test]
    async fn test_retried_nodes_replace_their_old_attempt() {
        let h = harness(GraphServiceConfig::default());
        pipeline("pe-1").seed(&h.store);
        assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        h.service.flush_cache_writes().await;

        // step-a1 fails and is retried; step-a2 still follows the old attempt
        let (_, history) = pipeline("pe-1").retry("step-a1", "step-a1-retry").build();
        for node in history {
            h.store.upsert_node_execution(node);
        }
        let merged = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);

        let current = h
            .store
            .fetch_node_executions_without_old_retries("pe-1")
            .await
            .unwrap();
        let full = generate_adjacency_list("pipeline", &current, false).unwrap();
        assert_eq!(merged.adjacency_list, full.to_orchestration_adjacency_list());
        assert_eq!(
            merged.adjacency_list.adjacency_map["stage-a"].edges,
            vec!["step-a1-retry".to_string()]
        );
        assert!(!merged.adjacency_list.graph_vertex_map.contains_key("step-a1"));
        assert_eq!(full_builds(&h.events), 1);
        assert_eq!(
            h.events.count(|e| matches!(
                e,
                GraphEvent::AdjacencyListMerged { added: 1, removed: 2, .. }
            )),
            1
        );

        // the cleaned list is what gets cached
        h.service.flush_cache_writes().await;
        let cached = h.service.adjacency_cache.get("pe-1").await.unwrap();
        assert_eq!(cached.adjacency_map, full.adjacency_map);
        let again = assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        assert_eq!(again, merged);
    }

    #[tokio::test]
    async fn test_long_step_chains_are_served_from_cache() {
        let h = harness(GraphServiceConfig::default());
        let mut builder = PlanExecutionBuilder::new("pe-1")
            .root("pipeline", "pipeline-setup", ExecutionMode::Child)
            .child("pipeline", "step-0", "step-setup", ExecutionMode::Task);
        for i in 1..150 {
            let previous = format!("step-{}", i - 1);
            builder = builder.next(&previous, &format!("step-{}", i), "step-setup", ExecutionMode::Task);
        }
        builder.seed(&h.store);

        let first = assert_ok!(h.service.generate_graph("pe-1").await);
        h.service.flush_cache_writes().await;
        let second = assert_ok!(h.service.generate_graph("pe-1").await);

        assert_eq!(first, second);
        assert_eq!(first.graph_vertex.vertex_count(), 151);
        assert_eq!(
            h.events.count(|e| matches!(e, GraphEvent::TreeBuilt { .. })),
            1
        );
        assert_eq!(
            h.events.count(|e| matches!(e, GraphEvent::CacheHit { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_generate_graph_rebuilds_only_when_stale() {
        let h = harness(GraphServiceConfig::default());
        pipeline("pe-1").seed(&h.store);

        let first = assert_ok!(h.service.generate_graph("pe-1").await);
        h.service.flush_cache_writes().await;
        let again = assert_ok!(h.service.generate_graph("pe-1").await);
        assert_eq!(first, again);
        assert_eq!(
            h.events.count(|e| matches!(e, GraphEvent::TreeBuilt { .. })),
            1
        );
        assert_eq!(first.graph_vertex.vertex_count(), 7);

        h.store
            .update_node_status("pe-1", "step-a2", ExecutionStatus::Succeeded, 1_800_000_000_000)
            .unwrap();
        let rebuilt = assert_ok!(h.service.generate_graph("pe-1").await);
        assert!(rebuilt.cache_context_order > first.cache_context_order);
        assert_eq!(rebuilt.cache_context_order, 1_800_000_000_000);
        assert_eq!(
            h.events.count(|e| matches!(e, GraphEvent::TreeBuilt { .. })),
            2
        );
    }

    #[tokio::test]
    async fn test_partial_graph_is_the_subtree() {
        let h = harness(GraphServiceConfig::default());
        pipeline("pe-1").seed(&h.store);

        let graph = assert_ok!(
            h.service
                .generate_partial_orchestration_graph("stage-a-setup", "pe-1")
                .await
        );
        assert_eq!(graph.root_node_ids, vec!["stage-a".to_string()]);
        let mut ids: Vec<&str> = graph
            .adjacency_list
            .graph_vertex_map
            .keys()
            .map(String::as_str)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["stage-a", "step-a1", "step-a2"]);
        assert!(graph.adjacency_list.adjacency_map["stage-a"].next_ids.is_empty());

        // partial requests bypass the cache
        h.service.flush_cache_writes().await;
        assert_eq!(h.backend.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_partial_graph_setup_id_must_be_unique() {
        let h = harness(GraphServiceConfig::default());
        PlanExecutionBuilder::new("pe-1")
            .root("pipeline", "pipeline-setup", ExecutionMode::Child)
            .child("pipeline", "loop", "loop-setup", ExecutionMode::ChildChain)
            .child("loop", "iter-1", "step-A", ExecutionMode::Task)
            .next("iter-1", "iter-2", "step-A", ExecutionMode::Task)
            .seed(&h.store);

        let err = assert_err!(
            h.service
                .generate_partial_orchestration_graph("step-A", "pe-1")
                .await
        );
        assert!(matches!(
            err,
            GraphError::RepeatedSetupNodeIds { count: 2, .. }
        ));
        assert!(err.to_string().contains("Repeated setupNodeIds"));

        let err = assert_err!(
            h.service
                .generate_partial_orchestration_graph("nope", "pe-1")
                .await
        );
        assert!(matches!(err, GraphError::StartingNodeNotFound(_)));

        // a known execution disambiguates
        let graph = assert_ok!(
            h.service
                .generate_partial_orchestration_graph_for_execution("step-A", "pe-1", "iter-2")
                .await
        );
        assert_eq!(graph.root_node_ids, vec!["iter-2".to_string()]);
        assert_eq!(graph.adjacency_list.graph_vertex_map.len(), 1);

        let err = assert_err!(
            h.service
                .generate_partial_orchestration_graph_for_execution("loop-setup", "pe-1", "iter-2")
                .await
        );
        assert!(matches!(err, GraphError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_multiple_roots_are_rejected() {
        let h = harness(GraphServiceConfig::default());
        PlanExecutionBuilder::new("pe-1")
            .root("a", "a-setup", ExecutionMode::Task)
            .root("b", "b-setup", ExecutionMode::Task)
            .seed(&h.store);

        let err = assert_err!(h.service.generate_orchestration_graph("pe-1").await);
        assert!(matches!(err, GraphError::MultipleRootNodes { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_expired_entries_are_rebuilt() {
        let h = harness(GraphServiceConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        });
        pipeline("pe-1").seed(&h.store);

        assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        h.service.flush_cache_writes().await;
        assert_ok!(h.service.generate_orchestration_graph("pe-1").await);
        assert_eq!(full_builds(&h.events), 2);
    }

    #[tokio::test]
    async fn test_older_list_does_not_replace_newer() {
        let h = harness(GraphServiceConfig::default());
        let (_, nodes) = pipeline("pe-1").build();
        let newer = generate_adjacency_list("pipeline", &nodes, false).unwrap();
        let mut older = generate_adjacency_list("pipeline", &nodes[..3], false).unwrap();
        older.cache_context_order = newer.cache_context_order - 1;

        assert!(h.service.cache_orchestration_adjacency_list(newer.clone()));
        h.service.flush_cache_writes().await;
        assert!(h.service.cache_orchestration_adjacency_list(older));
        h.service.flush_cache_writes().await;

        assert_eq!(h.service.adjacency_cache.get("pe-1").await, Some(newer));
        assert_eq!(
            h.events.count(|e| matches!(e, GraphEvent::CacheWriteRejected { .. })),
            1
        );
    }

    struct UnavailableBackend;

    #[async_trait]
    impl CacheBackend for UnavailableBackend {
        async fn get(&self, _: CacheNamespace, _: &str) -> Result<Option<CacheEntry>> {
            Err(GraphError::cache("cache unavailable"))
        }

        async fn upsert(
            &self,
            _: CacheNamespace,
            _: &str,
            _: CacheEntry,
            _: WritePolicy,
        ) -> Result<UpsertOutcome> {
            Err(GraphError::cache("cache unavailable"))
        }

        async fn remove(&self, _: CacheNamespace, _: &str) -> Result<bool> {
            Err(GraphError::cache("cache unavailable"))
        }
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_to_rebuild() {
        init_logging();
        let store = Arc::new(InMemoryExecutionStore::new());
        let events = Arc::new(VecEventSink::new());
        let service =
            GraphGenerationService::builder(store.clone(), store.clone(), Arc::new(UnavailableBackend))
                .event_sink(events.clone())
                .build();
        pipeline("pe-1").seed(&store);

        let first = assert_ok!(service.generate_orchestration_graph("pe-1").await);
        service.flush_cache_writes().await;
        let second = assert_ok!(service.generate_orchestration_graph("pe-1").await);
        assert_ok!(service.generate_graph("pe-1").await);
        service.flush_cache_writes().await;

        assert_eq!(first, second);
        assert_eq!(full_builds(&events), 2);
        assert_eq!(
            events.count(|e| matches!(e, GraphEvent::CacheWriteFailed { .. })),
            3
        );
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes_pending_writes() {
        let h = harness(GraphServiceConfig::default());
        pipeline("pe-1").seed(&h.store);
        assert_ok!(h.service.generate_graph("pe-1").await);
        assert_ok!(h.service.generate_orchestration_graph("pe-1").await);

        h.service.shutdown().await;
        assert_eq!(h.backend.stats().entries, 2);
    }

    #[test]
    fn test_resolve_root_node_id() {
        let (_, nodes) = pipeline("pe-1").build();
        assert_eq!(resolve_root_node_id("pe-1", &nodes).unwrap(), "pipeline");

        let err = resolve_root_node_id("pe-1", &nodes[1..]).unwrap_err();
        assert!(matches!(err, GraphError::RootNotFound(_)));
    }
}
