use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::services::{LifecycleError, RegistryError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The permission prompt was dismissed; asking again may succeed.
    #[error("Permission not granted: {0}")]
    PermissionDismissed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Another operation of the same session is in flight.
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Validation error: {0}")]
    Validation(String, Vec<ValidationDetail>),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into(), Vec::new())
    }

    /// Whether the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::PermissionDismissed(_)
                | ApiError::Busy(_)
                | ApiError::Provider(_)
                | ApiError::RegistryUnavailable(_)
                | ApiError::Timeout(_)
                | ApiError::ServiceUnavailable(_)
        )
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<ValidationDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let (status, error_code, message, details) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, vec![]),
            ApiError::PermissionDenied(msg) => {
                (StatusCode::FORBIDDEN, "permission_denied", msg, vec![])
            }
            ApiError::PermissionDismissed(msg) => {
                (StatusCode::FORBIDDEN, "permission_dismissed", msg, vec![])
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, vec![]),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, vec![]),
            ApiError::Busy(msg) => (StatusCode::CONFLICT, "operation_in_progress", msg, vec![]),
            ApiError::Validation(msg, details) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg, details)
            }
            ApiError::Provider(msg) => (StatusCode::BAD_GATEWAY, "provider_error", msg, vec![]),
            ApiError::RegistryUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "registry_unavailable",
                msg,
                vec![],
            ),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg, vec![]),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                    vec![],
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                vec![],
            ),
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            retryable,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let message = err.user_message().to_string();
        match err {
            RegistryError::NotFound => ApiError::NotFound(message),
            RegistryError::InvalidInput(detail) => ApiError::validation(detail),
            RegistryError::Unavailable(detail) | RegistryError::Backend(detail) => {
                tracing::warn!(error = %detail, "Device registry call failed");
                ApiError::RegistryUnavailable(message)
            }
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let message = err.user_message().to_string();
        match err {
            LifecycleError::PermissionDenied => ApiError::PermissionDenied(message),
            LifecycleError::PermissionDismissed => ApiError::PermissionDismissed(message),
            LifecycleError::TokenUnavailable => ApiError::Provider(message),
            LifecycleError::Provider(e) => {
                tracing::warn!(error = %e, "Push provider call failed");
                ApiError::Provider(message)
            }
            LifecycleError::Registry(e) => e.into(),
            LifecycleError::Timeout { .. } => ApiError::Timeout(message),
            LifecycleError::InvalidTransition { .. } => ApiError::Conflict(message),
            LifecycleError::Busy => ApiError::Busy(message),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e.message.clone().map(|m| m.to_string()).unwrap_or_default(),
                })
            })
            .collect();

        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::Validation(message, details)
    }
}
