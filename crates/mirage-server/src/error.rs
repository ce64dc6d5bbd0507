//! Error types for the mock engine.
//!
//! Only [`EngineError`] is fatal, and only to a single start attempt. Route
//! registration and per-request failures are reported and the environment
//! keeps serving.

use crate::events::ErrorKind;
use crate::template::TemplateError;
use serde::{Deserialize, Serialize};
use std::io;

/// Why a listener could not be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindErrorReason {
    PortInUse,
    PortPermission,
    Other,
}

/// Errors raised by environment lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Permission denied when binding port {0}")]
    PortPermission(u16),
    #[error("Failed to bind port {0}: {1}")]
    Bind(u16, String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("Environment not found: {0}")]
    NotFound(String),
}

impl EngineError {
    /// Classify a bind failure the way the surrounding application reports it.
    pub fn from_bind(port: u16, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => EngineError::PortInUse(port),
            io::ErrorKind::PermissionDenied => EngineError::PortPermission(port),
            _ => EngineError::Bind(port, err.to_string()),
        }
    }

    /// Bind reason code, if this error came from the listen step.
    pub fn bind_reason(&self) -> Option<BindErrorReason> {
        match self {
            EngineError::PortInUse(_) => Some(BindErrorReason::PortInUse),
            EngineError::PortPermission(_) => Some(BindErrorReason::PortPermission),
            EngineError::Bind(..) => Some(BindErrorReason::Other),
            _ => None,
        }
    }
}

/// A route that could not be registered. The route is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid route '{endpoint}': {reason}")]
pub struct RouteRegistrationError {
    pub endpoint: String,
    pub reason: String,
}

/// Failures while producing a response for a single request.
///
/// These are written back to the caller as a `text/plain` body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResponseError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Rendered body is not valid JSON: {0}")]
    JsonParse(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Unable to read file {path}: {message}")]
    FileRead { path: String, message: String },
    #[error("Invalid Content-Type: {0}")]
    InvalidContentType(String),
    #[error("Proxy error: {0}")]
    Upstream(String),
}

impl ResponseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResponseError::Template(_) => ErrorKind::Template,
            ResponseError::JsonParse(_) => ErrorKind::JsonParse,
            ResponseError::FileNotFound(_) => ErrorKind::FileNotFound,
            ResponseError::FileRead { .. } => ErrorKind::FileRead,
            ResponseError::InvalidContentType(_) => ErrorKind::InvalidContentType,
            ResponseError::Upstream(_) => ErrorKind::Upstream,
        }
    }
}
