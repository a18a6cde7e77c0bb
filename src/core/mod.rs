//! # Core Module
//!
//! Configuration, error taxonomy and reply shaping shared by the pipeline.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Added error module with typed transport/backend failures
//! - 1.0.0: Initial creation with config and response modules

pub mod config;
pub mod error;
pub mod response;

// Re-export commonly used items
pub use config::Config;
pub use error::{BackendError, ConfigError, TransportError};
pub use response::{sanitize_line, single_line, truncate_reply};
