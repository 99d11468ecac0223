use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Typed error taxonomy for the governance core.
///
/// Every variant carries a stable machine code (see [`AppError::code`]) and an
/// HTTP status hint for boundary layers. Extension-hook faults and KV read
/// errors are recovered locally and never reach this type; what surfaces here
/// is what a caller is expected to handle.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String, retry_after_secs: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Escalation required: {0}")]
    Escalation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("External service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    #[error("Timeout in {0}")]
    Timeout(String),

    #[error("Circuit breaker open for {0}")]
    CircuitBreakerOpen(String),
}

impl AppError {
    /// Stable machine code carried across the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Encryption(_) => "ENCRYPTION_ERROR",
            AppError::Escalation(_) => "ESCALATION_REQUIRED",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
        }
    }

    /// Optional structured detail for the response body.
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            AppError::RateLimit { retry_after_secs, .. } => {
                Some(serde_json::json!({ "retry_after_secs": retry_after_secs }))
            }
            AppError::ExternalService { service, .. } => {
                Some(serde_json::json!({ "service": service }))
            }
            AppError::CircuitBreakerOpen(service) => {
                Some(serde_json::json!({ "service": service }))
            }
            _ => None,
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::ExternalService {
            service: "redis".to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Encryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Escalation(_) => StatusCode::FORBIDDEN,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::CircuitBreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let AppError::RateLimit { retry_after_secs, .. } = self {
            builder.insert_header(("Retry-After", retry_after_secs.to_string()));
        }
        builder.json(ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            detail: self.detail(),
        })
    }
}
