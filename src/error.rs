//! Error types for the metarec-console crate.

use thiserror::Error;

/// Errors raised while talking to the backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),

    #[error("unsupported HTTP method: {method}")]
    UnsupportedMethod { method: String },

    #[error("HTTP request failed")]
    RequestFailed(#[source] reqwest::Error),

    #[error("failed to read response body")]
    ResponseRead(#[source] reqwest::Error),

    /// Non-2xx response. `detail` is the JSON `detail` field when present,
    /// otherwise the raw body.
    #[error("HTTP {}: {}", .status.as_u16(), .detail)]
    Http {
        status: reqwest::StatusCode,
        detail: String,
    },

    #[error("unexpected response shape from {path}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed stream frame: {frame}")]
    StreamFrame { frame: String },

    #[error("reply stream failed: {message}")]
    StreamFailed { message: String },

    #[error("failed to read reply stream")]
    StreamRead(#[source] std::io::Error),
}

impl ClientError {
    /// Whether the failure reads like a missing task id.
    ///
    /// Classification is done on the rendered message so that it also catches
    /// backend wording changes in `detail` that keep the phrase.
    pub fn is_task_not_found(&self) -> bool {
        is_task_not_found_message(&self.to_string())
    }

    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub fn is_task_not_found_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("task id not found") || lower.contains("task not found")
}

/// Errors in user-supplied request input, caught before anything is sent.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InputError {
    #[error("invalid JSON in {field}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be a JSON object")]
    NotAnObject { field: &'static str },

    #[error("invalid --field format: {field} (expected key=value)")]
    InvalidFieldFormat { field: String },

    #[error("request body is required (use --json, --field or --generate)")]
    BodyRequired,

    #[error("request body content type {content_type} is not supported for generation")]
    UnsupportedBody { content_type: String },

    #[error("missing path parameter: {name}")]
    MissingPathParam { name: String },
}

/// Errors from a playground call: either bad input or a failed request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Errors reading configuration from the environment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}
