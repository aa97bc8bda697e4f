//! Video processing worker.
//!
//! This crate provides:
//! - The per-job pipeline executor (claim, probe, trim, transcode, finalize)
//! - A fixed-size worker pool consuming from the job broker
//! - Graceful drain and cancellation of media operations on shutdown
//! - Structured job logging and metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{Shutdown, ShutdownHandle, WorkerPool};
pub use logging::JobLogger;
pub use pipeline::{reasons, JobOutcome, PipelineExecutor, PipelineSettings, SkipReason, Stage};
