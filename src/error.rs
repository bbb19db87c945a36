use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The main error type for consign operations and handlers
#[derive(Debug, thiserror::Error)]
pub enum ConsignError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The tenant's plan does not allow another active device.
    #[error("Device limit reached: this plan allows up to {limit} active devices")]
    QuotaExceeded { limit: u32 },

    /// The billing provider (or another upstream service) failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A write or read against the tenant store failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Standard error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

impl ConsignError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn quota_exceeded(limit: u32) -> Self {
        Self::QuotaExceeded { limit }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) | Self::Internal(_) | Self::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns a message that is safe to show to end users.
    ///
    /// Only `QuotaExceeded` carries its own message. Every other variant is
    /// collapsed to a fixed message per status; the full error is only logged.
    pub fn safe_message(&self) -> String {
        match self {
            Self::QuotaExceeded { .. } => self.to_string(),

            Self::NotFound(_) => "Not found".to_string(),
            Self::BadRequest(_) => "Invalid request".to_string(),
            Self::Unauthorized(_) => "Unauthorized".to_string(),
            Self::Forbidden(_) => "Forbidden".to_string(),
            Self::Conflict(_) => "Request conflicts with the current subscription".to_string(),

            Self::Upstream(_) => "Billing provider unavailable, please try again".to_string(),
            Self::Persistence(_) | Self::Internal(_) | Self::Anyhow(_) => {
                "Internal server error".to_string()
            }
            Self::ServiceUnavailable(_) => "Service unavailable".to_string(),
        }
    }
}

impl IntoResponse for ConsignError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        let limit = match &self {
            Self::QuotaExceeded { limit } => Some(*limit),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "Request rejected"
            );
        }

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            error_id,
            limit,
        });

        (status, body).into_response()
    }
}

/// Result type alias for consign operations and handlers
pub type Result<T> = std::result::Result<T, ConsignError>;

impl From<serde_json::Error> for ConsignError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            ConsignError::BadRequest(format!("JSON error: {}", err))
        } else {
            ConsignError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<reqwest::Error> for ConsignError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConsignError::Upstream(format!("Upstream timeout: {}", err))
        } else if err.is_connect() {
            ConsignError::Upstream(format!("Connection error: {}", err))
        } else if let Some(status) = err.status() {
            ConsignError::Upstream(format!("Upstream returned {}", status.as_u16()))
        } else {
            ConsignError::Upstream(format!("Request error: {}", err))
        }
    }
}
