use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::FromRow;
use uuid::Uuid;

use crate::auth::{generate_jwt, hash_password, Claims};
use crate::config;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, Session};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    clinic_id: Uuid,
    username: String,
    password_hash: String,
    display_name: String,
    permissions: Vec<String>,
}

/// POST /auth/login - authenticate staff credentials and issue a JWT
pub async fn login(Json(payload): Json<LoginRequest>) -> ApiResult<Value> {
    let mut v = crate::validate::FieldErrors::new();
    let username = v.require_str("username", payload.username.as_deref());
    let password = v.require_str("password", payload.password.as_deref());
    v.into_result()?;
    let (username, password) = (username.unwrap(), password.unwrap());

    let pool = DatabaseManager::pool().await?;

    // Login predates a session, so this is the one lookup not scoped by
    // clinic; usernames are globally unique.
    let user: Option<UserRow> =
        sqlx::query_as("SELECT * FROM users WHERE username = $1 AND deleted_at IS NULL")
            .bind(&username)
            .fetch_optional(&pool)
            .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    if hash_password(&password) != user.password_hash {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let claims = Claims::new(
        user.id,
        user.clinic_id,
        user.username.clone(),
        user.permissions.clone(),
    );
    let token = generate_jwt(claims).map_err(|e| {
        tracing::error!("JWT generation failed: {}", e);
        ApiError::internal_server_error("Failed to issue session token")
    })?;

    let expires_in = config::config().security.jwt_expiry_hours * 3600;

    Ok(ApiResponse::success(json!({
        "token": token,
        "user": {
            "id": user.id,
            "username": user.username,
            "display_name": user.display_name,
            "clinic_id": user.clinic_id,
            "permissions": user.permissions,
        },
        "expires_in": expires_in,
    })))
}

/// GET /api/auth/whoami - echo the resolved session
pub async fn whoami(Extension(session): Extension<Session>) -> ApiResult<Value> {
    Ok(ApiResponse::success(json!({
        "user_id": session.user_id,
        "clinic_id": session.clinic_id,
        "username": session.username,
        "permissions": session
            .permissions
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>(),
    })))
}
