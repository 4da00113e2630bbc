//! Error types shared across the service layers.
pub mod types;

pub use types::{ConfigError, ControllerError, ServiceError, StorageError, WebError};
