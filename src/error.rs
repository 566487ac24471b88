//! Error types for the volume agent
//!
//! Provides the error taxonomy shared by the Controller session, the
//! authentication flow, name resolution and the attach/detach orchestrators.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse classification of an [`Error`], stable across context wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    ServerError,
    ServiceUnavailable,
    GenericHttp,
    AlreadyExists,
    NotMapped,
    BadInput,
    MaxCountReached,
    Qos,
    Command,
    Configuration,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::GenericHttp => "http",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotMapped => "not_mapped",
            ErrorKind::BadInput => "bad_input",
            ErrorKind::MaxCountReached => "max_count_reached",
            ErrorKind::Qos => "qos",
            ErrorKind::Command => "command",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

// =============================================================================
// HTTP Failure
// =============================================================================

/// A non-2xx answer from the Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase for the status
    pub reason: String,
    /// Free-text detail supplied by the server, if any
    pub details: Option<String>,
    /// Numeric `errorCode` from the JSON body, if any
    pub error_code: Option<i64>,
}

impl HttpFailure {
    /// Build a failure from the raw status line and response body.
    ///
    /// JSON bodies contribute `details` (falling back to `message` and
    /// `description`) and `errorCode` (falling back to `code`). Non-JSON
    /// bodies are kept verbatim as the detail text.
    pub fn from_body(status: u16, reason: impl Into<String>, body: &[u8]) -> Self {
        let mut details = None;
        let mut error_code = None;

        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => {
                details = ["details", "message", "description"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str))
                    .map(str::to_string);
                error_code = ["errorCode", "code"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(json_integer));
            }
            _ => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                if !text.is_empty() {
                    details = Some(text);
                }
            }
        }

        Self {
            status,
            reason: reason.into(),
            details,
            error_code,
        }
    }

    fn mentions_max_count(&self) -> bool {
        self.details.as_deref().map_or(false, |d| {
            let lower = d.to_ascii_lowercase();
            lower.contains("max_count_reached") || lower.contains("maximum count")
        })
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} {}", self.status, self.reason)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        if let Some(code) = self.error_code {
            write!(f, " (errorCode {})", code)?;
        }
        Ok(())
    }
}

/// Accepts both `81` and `"81"`
fn json_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Error
// =============================================================================

/// Unified error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Controller HTTP Errors
    // =========================================================================
    #[error("Authentication required: {0}")]
    AuthRequired(HttpFailure),

    #[error("Forbidden: {0}")]
    Forbidden(HttpFailure),

    #[error("Not found: {0}")]
    HttpNotFound(HttpFailure),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(HttpFailure),

    #[error("Controller internal error: {0}")]
    ServerError(HttpFailure),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(HttpFailure),

    #[error("Maximum count reached: {0}")]
    MaxCountReached(HttpFailure),

    #[error("HTTP error: {0}")]
    GenericHttp(HttpFailure),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Session token not found: {0}. Authenticate with the `login` command first")]
    TokenNotFound(String),

    // =========================================================================
    // Resolution Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    // =========================================================================
    // Attach/Detach Errors
    // =========================================================================
    #[error("Volume {volume_id} is not mapped to this host")]
    NotMapped { volume_id: String },

    #[error("Device not found at expected path: {directory}/{prefix}*{volume_id} after {attempts} attempts")]
    DeviceNotFound {
        volume_id: String,
        directory: String,
        prefix: String,
        attempts: u32,
    },

    #[error("Failed to apply QoS limits to volume {volume_id}: {source}")]
    QosFailed {
        volume_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Command failed: {command} - {reason}")]
    Command { command: String, reason: String },

    // =========================================================================
    // Input/Configuration Errors
    // =========================================================================
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Parse/IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Context
    // =========================================================================
    #[error("{operation}: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Translate a non-2xx Controller answer into the taxonomy
    pub fn from_http(failure: HttpFailure) -> Self {
        match failure.status {
            401 => Error::AuthRequired(failure),
            403 => Error::Forbidden(failure),
            404 => Error::HttpNotFound(failure),
            405 => Error::MethodNotAllowed(failure),
            500 => Error::ServerError(failure),
            503 => Error::ServiceUnavailable(failure),
            _ if failure.mentions_max_count() => Error::MaxCountReached(failure),
            _ => Error::GenericHttp(failure),
        }
    }

    /// Classification of this error, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthRequired(_) => ErrorKind::AuthRequired,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::HttpNotFound(_)
            | Error::TokenNotFound(_)
            | Error::ResourceNotFound { .. }
            | Error::DeviceNotFound { .. } => ErrorKind::NotFound,
            Error::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            Error::ServerError(_) => ErrorKind::ServerError,
            Error::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Error::MaxCountReached(_) => ErrorKind::MaxCountReached,
            Error::GenericHttp(_) | Error::Transport(_) => ErrorKind::GenericHttp,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::NotMapped { .. } => ErrorKind::NotMapped,
            Error::QosFailed { .. } => ErrorKind::Qos,
            Error::Command { .. } => ErrorKind::Command,
            Error::BadInput(_) | Error::JsonParse(_) => ErrorKind::BadInput,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Io(_) => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Wrap this error with the operation that was being performed
    pub fn context(self, operation: impl Into<String>) -> Self {
        Error::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// The HTTP failure underneath this error, if it came from the Controller
    pub fn http_failure(&self) -> Option<&HttpFailure> {
        match self {
            Error::AuthRequired(f)
            | Error::Forbidden(f)
            | Error::HttpNotFound(f)
            | Error::MethodNotAllowed(f)
            | Error::ServerError(f)
            | Error::ServiceUnavailable(f)
            | Error::MaxCountReached(f)
            | Error::GenericHttp(f) => Some(f),
            Error::Context { source, .. } => source.http_failure(),
            _ => None,
        }
    }

    /// Server `errorCode`, if the Controller supplied one
    pub fn error_code(&self) -> Option<i64> {
        self.http_failure().and_then(|f| f.error_code)
    }

    /// 401 and 403 both qualify for one transparent re-authentication
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::AuthRequired | ErrorKind::Forbidden)
    }

    /// Check if a caller may retry this error with back-off
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable(_) | Error::Transport(_) => true,
            Error::Context { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Extension for attaching operation context to results
pub trait ResultExt<T> {
    fn context(self, operation: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, Error>;
