//! Graph cache.
//!
//! - **backend**: keyed blob storage with expiry and optional persistence
//! - **typed**: typed, failure-tolerant view used by the service
//! - **writer**: background writer pool that keeps cache writes off the
//!   request path

pub mod backend;
pub mod typed;
pub mod writer;

pub use backend::{
    CacheBackend, CacheEntry, CacheNamespace, CacheStats, InMemoryCacheBackend, UpsertOutcome,
    WritePolicy,
};
pub use typed::{Cacheable, GraphCache};
pub use writer::{CacheWriter, WriteTask};
