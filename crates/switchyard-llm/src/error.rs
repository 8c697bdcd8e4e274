use http::StatusCode;
use switchyard_core::HttpError;
use thiserror::Error;

/// Diagnostics carried by an exhausted empty-output retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyOutputDetails {
    /// Call site tag, e.g. `chat_completions`
    pub source: String,
    /// Attempt that produced the last empty aggregate
    pub attempt: u32,
    pub total_attempts: u32,
    /// Upstream HTTP status of the last attempt
    pub status: Option<u16>,
    pub last_event_type: Option<String>,
    pub response_id: Option<String>,
}

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Requested model has no route
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// Virtual key is not allowed to call the model
    #[error("model not allowed for this key: {model}")]
    ModelNotAllowed { model: String },

    /// Every candidate target is excluded or has an open circuit
    #[error("no upstream target available for {model}")]
    NoTarget { model: String },

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Upstream could not be reached or the response could not be read
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// Client went away before the response completed
    #[error("request cancelled by client")]
    Cancelled,

    /// Every streaming attempt finished without assistant output
    #[error(
        "{} upstream returned empty output after {} attempts",
        .0.source,
        .0.total_attempts
    )]
    EmptyOutput(Box<EmptyOutputDetails>),

    /// Client sent a malformed or invalid request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request lacks a valid virtual key
    #[error("authentication required")]
    Unauthorized,

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    /// HTTP-like status of the failure, as seen by the failover orchestrator
    ///
    /// Transport failures have no upstream status and count as 502.
    pub fn status(&self) -> u16 {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::Transport(_) => StatusCode::BAD_GATEWAY.as_u16(),
            Self::Cancelled => 499,
            other => other.status_code().as_u16(),
        }
    }

    /// Client-initiated cancellation, never recorded or retried
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the failure says anything about upstream health
    pub const fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Transport(_))
    }
}

impl HttpError for LlmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ModelNotAllowed { .. } => StatusCode::FORBIDDEN,
            Self::NoTarget { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Transport(_) | Self::EmptyOutput(_) => StatusCode::BAD_GATEWAY,
            // nginx's "client closed request"; nobody is listening anyway
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::ModelNotFound { .. } => "not_found_error",
            Self::ModelNotAllowed { .. } => "permission_error",
            Self::NoTarget { .. } | Self::Upstream { .. } | Self::Transport(_) | Self::EmptyOutput(_) => {
                "upstream_error"
            }
            Self::Cancelled => "cancelled",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Unauthorized => "authentication_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn error_code(&self) -> Option<String> {
        match self {
            Self::NoTarget { .. } => Some("upstream_overloaded".to_owned()),
            Self::EmptyOutput(details) => Some(format!("{}_empty_output", details.source)),
            Self::Unauthorized => Some("invalid_api_key".to_owned()),
            _ => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}
