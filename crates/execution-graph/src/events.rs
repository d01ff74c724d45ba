//! Lifecycle events for graph generation and cache maintenance
//!
//! The service reports cache hits, rebuilds, merges and background write
//! outcomes through a [`GraphEventSink`]. Sinks are fire-and-forget: a send
//! failure is logged by the caller and never fails a request.

use crate::cache::CacheNamespace;
use serde::{Deserialize, Serialize};

/// Receiver of [`GraphEvent`]s
pub trait GraphEventSink: Send + Sync {
    /// Deliver an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: GraphEvent) -> Result<(), EventError>;
}

/// Error when delivering events fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Events emitted while serving graph requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    /// A fresh cached value answered the request
    #[serde(rename_all = "camelCase")]
    CacheHit {
        plan_execution_id: String,
        namespace: CacheNamespace,
    },

    /// Nothing usable was cached
    #[serde(rename_all = "camelCase")]
    CacheMiss {
        plan_execution_id: String,
        namespace: CacheNamespace,
    },

    /// A tree-shaped graph was rendered from the node list
    #[serde(rename_all = "camelCase")]
    TreeBuilt {
        plan_execution_id: String,
        vertex_count: usize,
    },

    /// An adjacency list was built from scratch
    #[serde(rename_all = "camelCase")]
    AdjacencyListBuilt {
        plan_execution_id: String,
        partial: bool,
        vertex_count: usize,
    },

    /// Node execution changes were merged into a cached list
    #[serde(rename_all = "camelCase")]
    AdjacencyListMerged {
        plan_execution_id: String,
        added: usize,
        refreshed: usize,
        removed: usize,
    },

    /// A background cache write was accepted
    #[serde(rename_all = "camelCase")]
    CacheWriteQueued { label: String },

    /// A background cache write was discarded before running
    #[serde(rename_all = "camelCase")]
    CacheWriteDropped { label: String, reason: String },

    /// A background cache write stored its value
    #[serde(rename_all = "camelCase")]
    CacheWriteCompleted { label: String },

    /// A background cache write lost to a newer stored value
    #[serde(rename_all = "camelCase")]
    CacheWriteRejected { label: String, stored_order: i64 },

    /// A background cache write failed
    #[serde(rename_all = "camelCase")]
    CacheWriteFailed { label: String, error: String },
}

impl GraphEvent {
    pub fn cache_hit(plan_execution_id: &str, namespace: CacheNamespace) -> Self {
        Self::CacheHit {
            plan_execution_id: plan_execution_id.to_string(),
            namespace,
        }
    }

    pub fn cache_miss(plan_execution_id: &str, namespace: CacheNamespace) -> Self {
        Self::CacheMiss {
            plan_execution_id: plan_execution_id.to_string(),
            namespace,
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl GraphEventSink for NullEventSink {
    fn send(&self, _event: GraphEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Event sink that collects events in memory
///
/// Useful for tests and diagnostics.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<GraphEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().clone()
    }

    /// Count collected events matching a predicate
    pub fn count(&self, predicate: impl Fn(&GraphEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEventSink for VecEventSink {
    fn send(&self, event: GraphEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Deliver an event, logging instead of failing.
pub(crate) fn emit(sink: &dyn GraphEventSink, event: GraphEvent) {
    if let Err(e) = sink.send(event) {
        log::debug!("Dropped graph event: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();
        sink.send(GraphEvent::cache_hit("pe-1", CacheNamespace::Graph))
            .unwrap();
        sink.send(GraphEvent::cache_miss("pe-2", CacheNamespace::Graph))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        match &events[0] {
            GraphEvent::CacheHit { plan_execution_id, namespace } => {
                assert_eq!(plan_execution_id, "pe-1");
                assert_eq!(*namespace, CacheNamespace::Graph);
            }
            other => panic!("Expected CacheHit event, got {:?}", other),
        }
        assert_eq!(sink.count(|e| matches!(e, GraphEvent::CacheMiss { .. })), 1);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_wire_format() {
        let event = GraphEvent::AdjacencyListMerged {
            plan_execution_id: "pe-1".to_string(),
            added: 2,
            refreshed: 1,
            removed: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "adjacencyListMerged");
        assert_eq!(json["planExecutionId"], "pe-1");

        let hit = serde_json::to_value(GraphEvent::cache_hit(
            "pe-1",
            CacheNamespace::OrchestrationAdjacencyList,
        ))
        .unwrap();
        assert_eq!(hit["namespace"], "orchestration_adjacency_list");
    }

    struct ClosedSink;

    impl GraphEventSink for ClosedSink {
        fn send(&self, _event: GraphEvent) -> Result<(), EventError> {
            Err(EventError::new("receiver dropped"))
        }
    }

    #[test]
    fn test_undeliverable_events_are_swallowed() {
        let err = ClosedSink
            .send(GraphEvent::cache_miss("pe-1", CacheNamespace::Graph))
            .unwrap_err();
        assert_eq!(err.to_string(), "Event error: receiver dropped");

        emit(&ClosedSink, GraphEvent::cache_miss("pe-1", CacheNamespace::Graph));
    }

    #[test]
    fn test_null_event_sink() {
        NullEventSink
            .send(GraphEvent::CacheWriteQueued {
                label: "graph:pe-1".to_string(),
            })
            .unwrap();
    }
}
