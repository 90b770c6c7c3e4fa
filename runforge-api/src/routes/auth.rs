/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /auth/register` — create an account, returns a token pair
/// - `POST /auth/login` — authenticate, returns a token pair
/// - `POST /auth/refresh` — trade a refresh token for a new pair
/// - `GET /auth/me` — the authenticated user

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, FieldError},
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Duration, Utc};
use runforge_shared::auth::middleware::AuthContext;
use runforge_shared::auth::{jwt, password};
use runforge_shared::models::{NewUser, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Email address
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Password (strength-checked separately)
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    /// Display name
    #[validate(length(
        min = 1,
        max = 255,
        message = "Name must be between 1 and 255 characters"
    ))]
    pub name: String,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Email address
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Password
    pub password: String,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// Refresh token from a previous auth response
    pub refresh_token: String,
}

/// User as exposed over the API (no password hash)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            email: user.email,
            name: user.name,
            created_at: user.created_at,
        }
    }
}

/// Token pair response
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

fn validation_errors(errors: validator::ValidationErrors) -> ApiError {
    let details: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| FieldError {
                field: field.to_string(),
                message: error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "Validation failed".to_string()),
            })
        })
        .collect();
    ApiError::Validation(details)
}

fn issue_tokens(state: &AppState, user: &User) -> ApiResult<AuthResponse> {
    let access_claims = jwt::Claims::with_expiration(
        user.id,
        &user.email,
        jwt::TokenType::Access,
        Duration::seconds(state.config.jwt.access_ttl_seconds),
    );
    let refresh_claims = jwt::Claims::with_expiration(
        user.id,
        &user.email,
        jwt::TokenType::Refresh,
        Duration::seconds(state.config.jwt.refresh_ttl_seconds),
    );

    Ok(AuthResponse {
        access_token: jwt::create_token(&access_claims, state.jwt_secret())
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        refresh_token: jwt::create_token(&refresh_claims, state.jwt_secret())
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        token_type: "Bearer".to_string(),
        expires_in: state.config.jwt.access_ttl_seconds,
        user: user.clone().into(),
    })
}

/// Registers a new user
///
/// # Errors
///
/// - `400` on validation failure (email shape, password strength)
/// - `409` when the email is already registered
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    req.validate().map_err(validation_errors)?;

    password::validate_password_strength(&req.password).map_err(|reason| {
        ApiError::Validation(vec![FieldError::new("password", reason)])
    })?;

    let password_hash = password::hash_password(&req.password)?;
    let user = state
        .store
        .repos()
        .users()
        .create(NewUser {
            email: req.email,
            name: req.name,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = %user.id, "user registered");
    let response = issue_tokens(&state, &user)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Authenticates a user
///
/// # Errors
///
/// `401` for an unknown email or a wrong password; the two cases are
/// indistinguishable to the caller.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    req.validate().map_err(validation_errors)?;

    let user = state
        .store
        .repos()
        .users()
        .get_by_email(&req.email)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid email or password".to_string()))?;

    let valid = password::verify_password(&req.password, &user.password_hash)?;
    if !valid {
        return Err(ApiError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    }

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(issue_tokens(&state, &user)?))
}

/// Trades a refresh token for a new token pair
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let claims = jwt::validate_refresh_token(&req.refresh_token, state.jwt_secret())?;

    // The user must still exist
    let user = state
        .store
        .repos()
        .users()
        .get_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;

    Ok(Json(issue_tokens(&state, &user)?))
}

/// Returns the authenticated user
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<UserResponse>> {
    let user = state
        .store
        .repos()
        .users()
        .get_by_id(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    Ok(Json(user.into()))
}
