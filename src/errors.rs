use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::tracing::ErrorKind;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every JSON endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Not found: Paper 550e8400-e29b-41d4-a716-446655440000 not found",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Paper {0} is not premium")]
    NotPremium(Uuid),

    #[error("Failed to update profile: {0}")]
    ProfileUpdateFailed(String),

    #[error("Failed to create order: {0}")]
    OrderCreationFailed(String),

    #[error("Payment gateway authentication failed: {0}")]
    GatewayAuthFailed(String),

    #[error("Payment session creation failed: {0}")]
    GatewaySessionFailed(String),

    #[error("Payment execution failed: {0}")]
    GatewayExecutionFailed(String),

    #[error("Payment gateway request failed: {0}")]
    GatewayRequestFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a rejected storage write.
    pub fn persistence(error: DbErr) -> Self {
        ServiceError::PersistenceFailed(error.to_string())
    }

    /// True for failures reported by (or while talking to) the payment gateway.
    pub fn is_gateway_error(&self) -> bool {
        matches!(
            self,
            Self::GatewayAuthFailed(_)
                | Self::GatewaySessionFailed(_)
                | Self::GatewayExecutionFailed(_)
                | Self::GatewayRequestFailed(_)
        )
    }

    /// Logging category for server-side failures
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) | Self::PersistenceFailed(_) => ErrorKind::Database,
            Self::ValidationError(_) | Self::NotPremium(_) => ErrorKind::Validation,
            _ if self.is_gateway_error() => ErrorKind::External,
            _ => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::NotPremium(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_)
            | Self::ProfileUpdateFailed(_)
            | Self::OrderCreationFailed(_)
            | Self::GatewayAuthFailed(_)
            | Self::GatewaySessionFailed(_)
            | Self::GatewayExecutionFailed(_)
            | Self::GatewayRequestFailed(_)
            | Self::PersistenceFailed(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::PersistenceFailed(_) => "Failed to save changes".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::ProfileUpdateFailed(_) => "Failed to update profile".to_string(),
            Self::OrderCreationFailed(_) => "Failed to create order".to_string(),
            Self::GatewayAuthFailed(_) => "Failed to authenticate with bKash".to_string(),
            Self::GatewaySessionFailed(_) => "Failed to create payment".to_string(),
            Self::GatewayExecutionFailed(_) => "Failed to execute payment".to_string(),
            Self::GatewayRequestFailed(_) => "Payment gateway request failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            crate::tracing::log_error(&self, self.kind(), Some("request failed"));
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
