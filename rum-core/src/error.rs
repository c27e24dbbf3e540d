//! Error types for RUM core operations
//!
//! Errors in this crate never reach the host application through the command
//! ingestion path: the monitor logs them and drops the affected telemetry
//! point. They surface only where a caller asked for something explicit
//! (loading a configuration, enabling the registry twice, parsing an
//! identifier through `FromStr`, replaying a command log).
//!
//! # Error Codes
//!
//! Each variant has a stable error code (e.g., `QUEUE_FULL`) that can be used
//! for log aggregation and for switching on error kinds without matching on
//! message text.
//!
//! # Example
//!
//! ```rust
//! use rum_core::error::{RumError, ErrorCategory};
//!
//! fn report(err: RumError) {
//!     match err.category() {
//!         ErrorCategory::Validation => println!("bad input: {}", err),
//!         ErrorCategory::Lifecycle => println!("wrong lifecycle state: {}", err),
//!         _ => println!("{}: {}", err.error_code(), err),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for RUM core operations
pub type Result<T> = std::result::Result<T, RumError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Input or configuration validation failed
    Validation,
    /// Operation not allowed in the current enable/disable state
    Lifecycle,
    /// Back-pressure: the serial queue refused work
    Capacity,
    /// An event sink failed
    External,
    /// Internal error that indicates a bug
    Internal,
}

/// Errors that can occur in RUM core operations
#[derive(Error, Debug)]
pub enum RumError {
    // ═══════════════════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════════════════

    /// Configuration is inconsistent or out of range
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Identifier text could not be parsed in the requested encoding
    #[error("Invalid identifier '{input}' for encoding {encoding}")]
    InvalidIdentifier { input: String, encoding: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle (registry and monitor state)
    // ═══════════════════════════════════════════════════════════════════════

    /// `Registry::enable` was called while a monitor is already running
    #[error("RUM is already enabled for application '{application_id}'. Call disable() first.")]
    AlreadyEnabled { application_id: String },

    /// An operation that needs a running monitor was used before `enable`
    #[error("RUM is not enabled. Call Registry::enable() before using the monitor.")]
    NotEnabled,

    /// The monitor worker has shut down and no longer accepts messages
    #[error("Monitor stopped; message dropped")]
    MonitorStopped,

    // ═══════════════════════════════════════════════════════════════════════
    // Capacity
    // ═══════════════════════════════════════════════════════════════════════

    /// The bounded command queue is full
    #[error("Command queue full (capacity {capacity}); message dropped")]
    QueueFull { capacity: usize },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors (serialization, sinks, I/O)
    // ═══════════════════════════════════════════════════════════════════════

    /// An event sink rejected a write
    #[error("Event sink '{sink}' failed: {reason}")]
    SinkWrite { sink: String, reason: String },

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    InternalError { reason: String },
}

impl From<std::io::Error> for RumError {
    fn from(err: std::io::Error) -> Self {
        RumError::IoError {
            message: err.to_string(),
        }
    }
}

impl RumError {
    /// Returns true if this error might succeed on retry
    ///
    /// A full queue drains; a failing sink may recover. Everything else needs
    /// different input or a different lifecycle state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RumError::QueueFull { .. } | RumError::SinkWrite { .. } | RumError::IoError { .. }
        )
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            RumError::InvalidConfig { .. }
            | RumError::InvalidIdentifier { .. }
            | RumError::JsonError(_) => ErrorCategory::Validation,

            RumError::AlreadyEnabled { .. }
            | RumError::NotEnabled
            | RumError::MonitorStopped => ErrorCategory::Lifecycle,

            RumError::QueueFull { .. } => ErrorCategory::Capacity,

            RumError::SinkWrite { .. } | RumError::IoError { .. } => ErrorCategory::External,

            RumError::InternalError { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            RumError::InvalidConfig { .. } => "INVALID_CONFIG",
            RumError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            RumError::AlreadyEnabled { .. } => "ALREADY_ENABLED",
            RumError::NotEnabled => "NOT_ENABLED",
            RumError::MonitorStopped => "MONITOR_STOPPED",
            RumError::QueueFull { .. } => "QUEUE_FULL",
            RumError::SinkWrite { .. } => "SINK_WRITE",
            RumError::JsonError(_) => "JSON_ERROR",
            RumError::IoError { .. } => "IO_ERROR",
            RumError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Converts this error to a JSON-serializable response object
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                recoverable: self.is_recoverable(),
            },
        }
    }
}

/// JSON-serializable error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "QUEUE_FULL")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Error category
    pub category: ErrorCategory,
    /// Whether retry might succeed
    pub recoverable: bool,
}
