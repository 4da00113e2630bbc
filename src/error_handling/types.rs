use std::fmt;

use warp::http::StatusCode;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

#[derive(Debug, PartialEq)]
pub enum StorageError {
    ConnectionFailed,
    Timeout,
    WriteFailed,
    ReadFailed,
    NotFound,
    Conflict(String),
}

impl StorageError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::ConnectionFailed | StorageError::Timeout)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::Timeout => write!(f, "Storage operation timed out"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::NotFound => write!(f, "Record not found"),
            StorageError::Conflict(e) => write!(f, "Conflicting record: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Request-level failure, mapped one to one onto an HTTP status.
#[derive(Debug, PartialEq)]
pub enum ServiceError {
    Validation(String),
    Auth(String),
    Authorization(String),
    NotFound(String),
    Conflict(String),
    TransientStore(String),
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Authorization(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            // duplicate usernames are reported as 400 to registering clients
            ServiceError::Conflict(_) => StatusCode::BAD_REQUEST,
            ServiceError::TransientStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceError::Validation(m)
            | ServiceError::Auth(m)
            | ServiceError::Authorization(m)
            | ServiceError::NotFound(m)
            | ServiceError::Conflict(m)
            | ServiceError::TransientStore(m)
            | ServiceError::Internal(m) => m,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Validation(e) => write!(f, "Validation error: {}", e),
            ServiceError::Auth(e) => write!(f, "Authentication error: {}", e),
            ServiceError::Authorization(e) => write!(f, "Authorization error: {}", e),
            ServiceError::NotFound(e) => write!(f, "Not found: {}", e),
            ServiceError::Conflict(e) => write!(f, "Conflict: {}", e),
            ServiceError::TransientStore(e) => write!(f, "Store unavailable: {}", e),
            ServiceError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ServiceError::NotFound("Record not found".to_string()),
            StorageError::Conflict(e) => ServiceError::Conflict(e),
            e if e.is_transient() => ServiceError::TransientStore(e.to_string()),
            e => ServiceError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}
