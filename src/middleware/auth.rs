use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use uuid::Uuid;

use crate::auth::Claims;
use crate::config;
use crate::error::ApiError;

/// Permissions a staff account can hold. Stored as strings on the user row
/// and in JWT claims; unknown strings are ignored on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    PatientsRead,
    PatientsWrite,
    ScheduleRead,
    ScheduleWrite,
    NotesRead,
    NotesWrite,
    NotesSign,
    CollectionsRead,
    CollectionsWrite,
    ImagingRead,
    ImagingWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::PatientsRead => "patients:read",
            Permission::PatientsWrite => "patients:write",
            Permission::ScheduleRead => "schedule:read",
            Permission::ScheduleWrite => "schedule:write",
            Permission::NotesRead => "notes:read",
            Permission::NotesWrite => "notes:write",
            Permission::NotesSign => "notes:sign",
            Permission::CollectionsRead => "collections:read",
            Permission::CollectionsWrite => "collections:write",
            Permission::ImagingRead => "imaging:read",
            Permission::ImagingWrite => "imaging:write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "patients:read" => Permission::PatientsRead,
            "patients:write" => Permission::PatientsWrite,
            "schedule:read" => Permission::ScheduleRead,
            "schedule:write" => Permission::ScheduleWrite,
            "notes:read" => Permission::NotesRead,
            "notes:write" => Permission::NotesWrite,
            "notes:sign" => Permission::NotesSign,
            "collections:read" => Permission::CollectionsRead,
            "collections:write" => Permission::CollectionsWrite,
            "imaging:read" => Permission::ImagingRead,
            "imaging:write" => Permission::ImagingWrite,
            _ => return None,
        })
    }
}

/// Authenticated session context extracted from JWT. Handlers receive this
/// via `Extension<Session>`; it is the only source of the tenant id.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
    pub username: String,
    pub permissions: Vec<Permission>,
}

impl Session {
    /// Reject the request with 403 unless the session holds `permission`.
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.permissions.contains(&permission) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Missing required permission: {}",
                permission.as_str()
            )))
        }
    }
}

impl From<Claims> for Session {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            clinic_id: claims.clinic_id,
            username: claims.username,
            permissions: claims
                .permissions
                .iter()
                .filter_map(|s| Permission::parse(s))
                .collect(),
        }
    }
}

/// JWT authentication middleware that validates tokens and injects a Session
pub async fn jwt_auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    // Extract JWT from Authorization header
    let token = extract_jwt_from_headers(&headers).map_err(|msg| {
        let api_error = ApiError::unauthorized(msg);
        (
            StatusCode::from_u16(api_error.status_code()).unwrap(),
            Json(api_error.to_json()),
        )
    })?;

    // Validate and decode JWT
    let claims = validate_jwt(&token).map_err(|msg| {
        let api_error = ApiError::unauthorized(msg);
        (
            StatusCode::from_u16(api_error.status_code()).unwrap(),
            Json(api_error.to_json()),
        )
    })?;

    // Convert claims to Session and inject into request
    let session = Session::from(claims);
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .or_else(|| headers.get("Authorization"))
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

/// Validate JWT token and extract claims
fn validate_jwt(token: &str) -> Result<Claims, String> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err("JWT secret not configured".to_string());
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::default();

    let token_data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| format!("Invalid JWT token: {}", e))?;

    Ok(token_data.claims)
}
