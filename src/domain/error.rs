use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("resource `{resource}` does not support operation `{operation}`")]
    UnsupportedOperation {
        resource: &'static str,
        operation: String,
    },
    #[error("unknown resource `{0}`")]
    UnknownResource(String),
    #[error("{action} on `{resource}` requires an id")]
    MissingId {
        resource: &'static str,
        action: &'static str,
    },
    #[error("invalid query parameters: {message}")]
    InvalidParams { message: String },
}

impl DomainError {
    pub fn unsupported(resource: &'static str, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            resource,
            operation: operation.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }
}
