//! Crate-wide constants
//!
//! Single source of truth for cache retention and writer pool defaults.

/// Default values for [`crate::config::GraphServiceConfig`]
pub mod defaults {
    /// Retention window for cached graphs (10 days)
    pub const CACHE_TTL_SECS: u64 = 10 * 24 * 60 * 60;
    /// Number of background cache writer tasks
    pub const WRITE_WORKERS: usize = 2;
    /// Bounded queue size for pending cache writes
    pub const WRITE_QUEUE_CAPACITY: usize = 256;
    /// zstd level used for cached payloads
    pub const COMPRESSION_LEVEL: i32 = 3;
}

/// Cache namespace identifiers
pub mod cache_keys {
    /// Namespace of the tree-shaped graph cache
    pub const GRAPH: &str = "graph";
    /// Namespace of the orchestration adjacency list cache
    pub const ORCHESTRATION_ADJACENCY_LIST: &str = "orchestration_adjacency_list";
    /// File extension of persisted cache metadata
    pub const META_EXTENSION: &str = "json";
    /// File extension of persisted compressed payloads
    pub const PAYLOAD_EXTENSION: &str = "zst";
}
