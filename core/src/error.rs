//! Errors and error reporting.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Node construction failed; the node stays absent from the registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CreateError {
    #[error("no behavior registered for tag `{0}`")]
    UnknownTag(String),
    #[error("failed to construct `{tag}`: {reason}")]
    Construction { tag: String, reason: String },
    #[error("platform view for `{tag}` could not be created: {reason}")]
    Platform { tag: String, reason: String },
    #[error("construction of `{0}` panicked")]
    Panicked(String),
}

/// A malformed operation buffer.
#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum DecodeError {
    #[error("operation buffer ended while reading entry {0}")]
    Truncated(usize),
    #[error("entry {index} has type {found}, expected {expected}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("unknown entry type tag {0:#x}")]
    UnknownEntryTag(u8),
    #[error("unknown operation type {0}")]
    UnknownOperation(i32),
    #[error("negative element count {0}")]
    NegativeCount(i32),
    #[error("layout batch has {ints} ints for {ids} nodes")]
    LayoutStride { ids: usize, ints: usize },
}

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid page config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("page config must be a JSON object")]
    NotAnObject,
    #[error("invalid value `{value}` for {key}")]
    Env { key: &'static str, value: String },
}

/// Category of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    CreateNode,
    CreateNodeAsync,
    LayoutNodeNotFound,
    OperationBatch,
    Platform,
    EventDispatch,
}

/// A structured, non-fatal error report.
#[derive(Debug, Clone, PartialEq)]
pub struct LynxError {
    pub code: ErrorCode,
    pub message: String,
    pub custom_info: BTreeMap<String, String>,
}

impl LynxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> LynxError {
        LynxError {
            code,
            message: message.into(),
            custom_info: BTreeMap::new(),
        }
    }

    pub fn with_info(mut self, key: &str, value: impl ToString) -> LynxError {
        self.custom_info.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for LynxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        for (key, value) in &self.custom_info {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

impl std::error::Error for LynxError {}

/// Receives structured error reports.
pub trait ErrorHandler {
    fn handle_error(&mut self, error: LynxError);
}

/// Logs every report.
#[derive(Debug, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle_error(&mut self, err: LynxError) {
        error!(code = ?err.code, "{}", err);
    }
}
