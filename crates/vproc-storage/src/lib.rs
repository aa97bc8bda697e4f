//! Local filesystem storage.
//!
//! This crate provides:
//! - Resolution of upload references to paths under the upload root
//! - Public URLs for stored files
//! - Processed-asset destinations (`<id>_processed.mp4`)
//! - File save and deletion for the upload path

pub mod error;
pub mod local;

pub use error::{StorageError, StorageResult};
pub use local::{LocalStorage, StorageConfig, PROCESSED_SUFFIX};
