//! Error types for indexlib.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`IndexlibError`] enum. Expected absences (unknown sub-attribute, missing
//! term, document without a record) are never errors; they are modelled with
//! `Option` by the APIs that produce them.
//!
//! Merge drivers turn a failure into an [`ErrorInfo`], which adds the advice an
//! external scheduler needs to decide whether the whole job may be retried.
//!
//! # Examples
//!
//! ```
//! use indexlib::error::{ErrorAdvice, IndexlibError, Result};
//!
//! fn open_partition() -> Result<()> {
//!     Err(IndexlibError::schema("field set differs between partitions"))
//! }
//!
//! let err = open_partition().unwrap_err();
//! assert_eq!(err.error_info().advice, ErrorAdvice::Stop);
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for indexlib operations.
#[derive(Error, Debug)]
pub enum IndexlibError {
    /// Raw I/O errors bubbling up from `std::io`.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// File read/write failures reported by a storage backend.
    #[error("File I/O error: {0}")]
    FileIo(String),

    /// Storage misuse (closed storage, bad names, ...).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed index data or index-level failures.
    #[error("Index error: {0}")]
    Index(String),

    /// Schema, format version or partition meta mismatch.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid configuration (merge strategy, truncate parameters, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller passed an argument the callee cannot honour.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant was violated; continuing would corrupt data.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// A merge participant failed at runtime.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with IndexlibError.
pub type Result<T> = std::result::Result<T, IndexlibError>;

impl IndexlibError {
    /// Create a new file I/O error.
    pub fn file_io<S: Into<String>>(msg: S) -> Self {
        IndexlibError::FileIo(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Storage(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Index(msg.into())
    }

    /// Create a new schema error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Schema(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Config(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        IndexlibError::InvalidArgument(msg.into())
    }

    /// Create a new inconsistent state error.
    pub fn inconsistent<S: Into<String>>(msg: S) -> Self {
        IndexlibError::InconsistentState(msg.into())
    }

    /// Create a new runtime error.
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Runtime(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        IndexlibError::Other(msg.into())
    }

    /// Whether this error came from the file system or a storage backend.
    pub fn is_file_io(&self) -> bool {
        matches!(self, IndexlibError::Io(_) | IndexlibError::FileIo(_))
    }

    /// Stable error code used in task-facing reports.
    pub fn code(&self) -> ErrorCode {
        match self {
            IndexlibError::Io(_) | IndexlibError::FileIo(_) => ErrorCode::FileIo,
            IndexlibError::Storage(_) => ErrorCode::Storage,
            IndexlibError::Index(_) => ErrorCode::IndexCorrupted,
            IndexlibError::Schema(_) => ErrorCode::SchemaMismatch,
            IndexlibError::Config(_) | IndexlibError::Json(_) => ErrorCode::InvalidConfig,
            IndexlibError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            IndexlibError::InconsistentState(_) => ErrorCode::InconsistentState,
            IndexlibError::Runtime(_) | IndexlibError::Other(_) => ErrorCode::Runtime,
        }
    }

    /// Build the report handed to whoever scheduled the failing job.
    pub fn error_info(&self) -> ErrorInfo {
        let code = self.code();
        let advice = match code {
            ErrorCode::FileIo | ErrorCode::Storage | ErrorCode::Runtime => ErrorAdvice::Retry,
            ErrorCode::SchemaMismatch | ErrorCode::InvalidConfig | ErrorCode::InvalidArgument => {
                ErrorAdvice::Stop
            }
            ErrorCode::IndexCorrupted | ErrorCode::InconsistentState => ErrorAdvice::FatalHang,
        };
        ErrorInfo {
            code,
            message: self.to_string(),
            advice,
        }
    }
}

/// Error codes reported to the merge task scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    FileIo,
    Storage,
    IndexCorrupted,
    SchemaMismatch,
    InvalidConfig,
    InvalidArgument,
    InconsistentState,
    Runtime,
}

/// What the scheduler should do after a failed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAdvice {
    /// Discard the merge output and rerun the whole job.
    Retry,
    /// The job cannot succeed with this input; stop it.
    Stop,
    /// Data is inconsistent; keep the job parked for an operator.
    FatalHang,
}

/// Task-facing error report: code, message and advice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    pub advice: ErrorAdvice,
}
