/// Error handling for the API server
///
/// A single `ApiError` maps the whole error taxonomy onto HTTP responses.
/// Handlers return `ApiResult<T>`; conversions from the service, store,
/// and auth error types keep the translation in one place.
///
/// | kind            | status | notes                                   |
/// |-----------------|--------|-----------------------------------------|
/// | Validation      | 400    | body carries `validation_errors`        |
/// | Unauthorized    | 401    | missing/invalid credentials             |
/// | Forbidden       | 403    | authenticated but not the owner         |
/// | NotFound        | 404    |                                         |
/// | Conflict        | 409    | state-machine precondition failed       |
/// | PayloadTooLarge | 413    |                                         |
/// | RateLimited     | 429    | body carries `retry_after_seconds`      |
/// | Internal        | 500    | invariant violations, logged at error   |
/// | ServiceUnavailable | 503 | store unreachable, workers unhealthy    |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use runforge_shared::auth::jwt::JwtError;
use runforge_shared::auth::middleware::AuthError;
use runforge_shared::auth::password::PasswordError;
use runforge_shared::service::ServiceError;
use runforge_shared::store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Field-level validation failure (400)
    Validation(Vec<FieldError>),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409)
    Conflict(String),

    /// Payload too large (413)
    PayloadTooLarge(String),

    /// Too many requests (429)
    RateLimited { retry_after_seconds: u64 },

    /// Internal server error (500)
    Internal(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// One field's validation failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// Field that failed validation
    pub field: String,

    /// Why it failed
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g. "not_found", "conflict")
    pub error: String,

    /// Human-readable message
    pub message: String,

    /// Field-level details for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<FieldError>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Validation(errors) => write!(f, "Validation failed: {} errors", errors.len()),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            ApiError::RateLimited {
                retry_after_seconds,
            } => write!(f, "Rate limit exceeded, retry in {}s", retry_after_seconds),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Rate limiting has its own body shape and a Retry-After header
        if let ApiError::RateLimited {
            retry_after_seconds,
        } = self
        {
            let body = Json(json!({
                "error": "rate limit exceeded",
                "retry_after_seconds": retry_after_seconds,
            }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
            return response;
        }

        let (status, error_code, message, validation_errors) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                msg,
                None,
            ),
            ApiError::RateLimited { .. } => unreachable!("handled above"),
            ApiError::Internal(msg) => {
                // Log the detail, never expose it
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            validation_errors,
        });

        (status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::NotFound(msg),
            ServiceError::Forbidden(msg) => ApiError::Forbidden(msg),
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::Validation(msg) => ApiError::BadRequest(msg),
            ServiceError::Internal(msg) => ApiError::Internal(msg),
            ServiceError::Store(err) => err.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaskNotFound => ApiError::NotFound("task not found".to_string()),
            StoreError::ExecutionNotFound => {
                ApiError::NotFound("execution not found".to_string())
            }
            StoreError::UserNotFound => ApiError::NotFound("user not found".to_string()),
            StoreError::DuplicateEmail => {
                ApiError::Conflict("email is already registered".to_string())
            }
            StoreError::Cursor(err) => ApiError::BadRequest(err.to_string()),
            StoreError::Invalid(msg) => ApiError::Internal(msg),
            StoreError::Database(err) => ApiError::Internal(format!("database error: {}", err)),
            StoreError::Transaction(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => {
                ApiError::Unauthorized("Missing authorization header".to_string())
            }
            AuthError::InvalidFormat => ApiError::BadRequest("Expected Bearer token".to_string()),
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(msg),
        }
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            JwtError::InvalidIssuer => ApiError::Unauthorized("Invalid token issuer".to_string()),
            other => ApiError::Unauthorized(format!("Invalid token: {}", other)),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::Internal(format!("password operation failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");

        let err = ApiError::Conflict("task is already running".to_string());
        assert_eq!(err.to_string(), "Conflict: task is already running");
    }

    #[test]
    fn test_service_error_mapping() {
        let err: ApiError = ServiceError::Conflict("task is already running".to_string()).into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = ServiceError::Store(StoreError::DuplicateEmail).into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = ServiceError::NotFound("task not found".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
