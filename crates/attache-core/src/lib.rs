//! Attache Core Library
//!
//! Domain models, error classification and configuration shared by every
//! component of the attachment processing pipeline.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ErrorClass, ProcessingError, ProcessingResultExt};
pub use storage_types::StorageBackend;
