//! Redis Streams job queue.
//!
//! This crate provides:
//! - The job envelope and its wire encoding
//! - Job enqueueing via Redis Streams
//! - Worker consumption with visibility-timeout redelivery, retry counting and DLQ
//! - An in-memory broker with the same delivery semantics

pub mod broker;
pub mod error;
pub mod job;
pub mod memory;
pub mod queue;

pub use broker::{Delivery, FailOutcome, JobBroker};
pub use error::{QueueError, QueueResult};
pub use job::{QueueJob, VideoProcessingJob};
pub use memory::{DeadLetter, InMemoryQueue};
pub use queue::{JobQueue, QueueConfig};
