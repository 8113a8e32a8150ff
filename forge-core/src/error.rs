//! Error types for forge.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for forge operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Main error type for forge.
#[derive(Error, Debug)]
pub enum ForgeError {
    // Build definition parsing errors
    #[error("Failed to parse {file}: {reason}")]
    ParseError { file: String, reason: String },

    #[error("Unsupported schema version {version:?} in {file}")]
    UnsupportedSchemaVersion { file: String, version: String },

    #[error("Invalid service '{service}' in {file}: {reason}")]
    InvalidService { file: String, service: String, reason: String },

    // Request resolution errors
    #[error("No target or group named '{name}'")]
    UnknownTarget { name: String },

    #[error("Could not find any target matching '{pattern}'")]
    NoMatchingTarget { pattern: String },

    #[error("Invalid target pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid override '{value}': {reason}")]
    InvalidOverride { value: String, reason: String },

    #[error("Unknown override key '{key}'")]
    UnknownOverrideKey { key: String },

    // Platform errors
    #[error("Invalid platform spec '{spec}'")]
    InvalidPlatform { spec: String },

    #[error("Target '{target}': multiple platforms not supported")]
    MultiplePlatforms { target: String },

    #[error("Target '{target}': unable to translate {platform} into a {token} token")]
    PlatformTranslation { target: String, platform: String, token: String },

    #[error("No build file template found in {context_dir:?} (tried {tried})")]
    TemplateNotFound { context_dir: PathBuf, tried: String },

    // Node and driver errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Unknown driver '{driver}' for node '{node}'")]
    UnknownDriver { driver: String, node: String },

    #[error("Driver option '{option}' not implemented")]
    DriverOptionUnsupported { option: String },

    #[error("Invalid driver option '{option}' for {driver} driver")]
    InvalidDriverOption { option: String, driver: String },

    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Protocol version mismatch with {endpoint}: requested {requested}, worker offered {offered}")]
    VersionMismatch { endpoint: String, requested: u32, offered: u32 },

    #[error("Protocol error on {endpoint}: {reason}")]
    ProtocolError { endpoint: String, reason: String },

    #[error("No usable build workers in node group")]
    NoUsableWorkers,

    #[error("Driver assembly cancelled")]
    Cancelled,

    #[error("Worker task failed: {reason}")]
    TaskFailed { reason: String },

    // File system errors
    #[error("File read error: {path}: {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }
}
