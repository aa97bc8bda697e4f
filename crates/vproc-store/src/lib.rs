//! Video status store.
//!
//! This crate provides:
//! - The `VideoStatusStore` contract used by the pipeline executor
//! - Compare-and-set processing claims with a crash-recovery lease
//! - A Redis hash implementation and an in-memory implementation

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod repo;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryVideoStore;
pub use redis_store::{RedisVideoStore, StoreConfig};
pub use repo::{ProcessingClaim, VideoStatusStore, DEFAULT_PROCESSING_LEASE};
