use storeops_api_types::TypesError;
use thiserror::Error;

use crate::domain::DomainError;

/// Coarse error class, used for metric labels and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Server,
    Network,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Classified failure of a backend read or write.
///
/// Cloneable so a single in-flight result can be handed to every caller
/// awaiting the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },
    #[error("forbidden: {detail}")]
    Forbidden { detail: String },
    #[error("not found: {detail}")]
    NotFound { detail: String },
    #[error("validation failed ({status}): {detail}")]
    Validation { status: u16, detail: String },
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },
    #[error("network error: {detail}")]
    Network { detail: String },
    #[error("request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("unexpected response: {detail}")]
    Unknown { status: Option<u16>, detail: String },
}

impl FetchError {
    /// Classify an HTTP error status.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 => Self::Unauthorized { detail },
            403 => Self::Forbidden { detail },
            404 => Self::NotFound { detail },
            400 | 409 | 422 => Self::Validation { status, detail },
            429 | 500..=599 => Self::Server { status, detail },
            _ => Self::Unknown {
                status: Some(status),
                detail,
            },
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::Network {
            detail: detail.into(),
        }
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::Unknown {
            status: None,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Unauthorized { .. } => ErrorKind::Unauthorized,
            FetchError::Forbidden { .. } => ErrorKind::Forbidden,
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::Validation { .. } => ErrorKind::Validation,
            FetchError::Server { .. } => ErrorKind::Server,
            FetchError::Network { .. } => ErrorKind::Network,
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Unauthorized { .. } => Some(401),
            FetchError::Forbidden { .. } => Some(403),
            FetchError::NotFound { .. } => Some(404),
            FetchError::Validation { status, .. } | FetchError::Server { status, .. } => {
                Some(*status)
            }
            FetchError::Unknown { status, .. } => *status,
            FetchError::Network { .. } | FetchError::Timeout { .. } => None,
        }
    }

    /// Auth failures are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::Unauthorized { .. } | FetchError::Forbidden { .. }
        )
    }

    /// Transport-level failures, including timeouts.
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network { .. } | FetchError::Timeout { .. })
    }

    pub fn is_session_expiry(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }

    /// Text safe to show an operator. Never includes backend internals.
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => {
                "Unable to reach the server. Check your connection and try again."
            }
            FetchError::Timeout { .. } => "The request timed out. Please try again.",
            other => match other.status() {
                Some(400) => "The request was invalid. Check the entered values and try again.",
                Some(401) => "Your session has expired. Please sign in again.",
                Some(403) => "You do not have permission to perform this action.",
                Some(404) => "The requested item could not be found.",
                Some(409) => "This item was changed elsewhere. Refresh and try again.",
                Some(422) => "Some of the submitted values are invalid.",
                Some(429) => "Too many requests. Please wait a moment and try again.",
                Some(500) => "Something went wrong on the server. Please try again.",
                Some(502) => "The server is temporarily unreachable. Please try again.",
                Some(503) => "The service is temporarily unavailable. Please try again shortly.",
                Some(504) => "The server took too long to respond. Please try again.",
                Some(status) if (500..600).contains(&status) => {
                    "Something went wrong on the server. Please try again."
                }
                _ => "An unexpected error occurred. Please try again.",
            },
        }
    }
}

impl From<DomainError> for FetchError {
    fn from(error: DomainError) -> Self {
        Self::unknown(error.to_string())
    }
}

impl From<TypesError> for FetchError {
    fn from(error: TypesError) -> Self {
        Self::unknown(error.to_string())
    }
}
