//! Error types for graph generation

use thiserror::Error;

/// Result type alias using GraphError
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while generating or caching execution graphs
#[derive(Debug, Error)]
pub enum GraphError {
    /// The plan execution does not exist
    #[error("Plan execution not found: {0}")]
    PlanExecutionNotFound(String),

    /// The plan execution has no node executions to render
    #[error("No nodes found for planExecutionId [{0}]")]
    NoNodesFound(String),

    /// No node execution without parent and previous links
    #[error("No root node found for planExecutionId [{0}]")]
    RootNotFound(String),

    /// More than one node execution claims to be the root
    #[error("Found {count} root nodes for planExecutionId [{plan_execution_id}], expected exactly one")]
    MultipleRootNodes {
        plan_execution_id: String,
        count: usize,
    },

    /// A node execution id referenced by the caller is not in the node list
    #[error("Node execution not found: {0}")]
    NodeNotFound(String),

    /// The starting setup node has no execution in this plan
    #[error("Starting node is not found for setupNodeId [{0}]")]
    StartingNodeNotFound(String),

    /// The starting setup node resolved to several executions
    #[error("Repeated setupNodeIds are not supported: [{setup_node_id}] matched {count} node executions")]
    RepeatedSetupNodeIds { setup_node_id: String, count: usize },

    /// Request is inconsistent with stored state
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Node or plan execution store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`GraphError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested plan or node does not exist
    NotFound,
    /// The request does not match a renderable state
    InvalidRequest,
    /// The request needs a feature that is deliberately unsupported
    Unsupported,
    /// Infrastructure failure
    Internal,
}

impl GraphError {
    /// Create an invalid request error with a message
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a store error with a message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a cache error with a message
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::PlanExecutionNotFound(_)
            | GraphError::NodeNotFound(_)
            | GraphError::StartingNodeNotFound(_)
            | GraphError::RootNotFound(_) => ErrorKind::NotFound,
            GraphError::NoNodesFound(_)
            | GraphError::MultipleRootNodes { .. }
            | GraphError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GraphError::RepeatedSetupNodeIds { .. } => ErrorKind::Unsupported,
            GraphError::Store(_)
            | GraphError::Cache(_)
            | GraphError::Compression(_)
            | GraphError::Serialization(_)
            | GraphError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller supplied an id that does not map to valid state.
    ///
    /// Client errors terminate the request and are never retried.
    pub fn is_client_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_nodes_message() {
        let err = GraphError::NoNodesFound("pe-1".to_string());
        assert_eq!(err.to_string(), "No nodes found for planExecutionId [pe-1]");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_repeated_setup_ids_are_unsupported() {
        let err = GraphError::RepeatedSetupNodeIds {
            setup_node_id: "step-A".to_string(),
            count: 2,
        };
        assert!(err.to_string().contains("Repeated setupNodeIds"));
        assert!(err.to_string().contains("step-A"));
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(err.is_client_error());
    }

    #[test]
    fn test_infrastructure_errors_are_not_client_errors() {
        assert!(!GraphError::store("connection refused").is_client_error());
        assert!(!GraphError::cache("timeout").is_client_error());
        assert!(GraphError::PlanExecutionNotFound("pe".into()).is_client_error());
    }
}
