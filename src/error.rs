// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

/// HTTP API error with appropriate status codes and client-friendly messages.
///
/// Every handler failure becomes one of these variants; the wire shape is the
/// uniform `{ success: false, error: { code, message, details? } }` envelope.
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    Validation {
        message: String,
        field_errors: HashMap<String, String>,
    },
    /// Illegal workflow transition (e.g. signing an already-signed note)
    InvalidStatus {
        entity: &'static str,
        status: String,
        action: &'static str,
    },
    /// Illegal flow-stage transition during an in-clinic visit
    InvalidStage {
        entity: &'static str,
        stage: String,
        action: &'static str,
    },

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found (also: row exists but outside the caller's clinic)
    NotFound(String),

    // 409 Conflict
    Conflict(String),
    /// Uniqueness violation (e.g. tag name already taken in this clinic)
    Duplicate(String),
    /// Scheduling overlap (e.g. provider double-booked)
    OverlapConflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Validation { .. } => 400,
            ApiError::InvalidStatus { .. } => 400,
            ApiError::InvalidStage { .. } => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::Duplicate(_) => 409,
            ApiError::OverlapConflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get machine-readable error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::InvalidStatus { .. } => "INVALID_STATUS",
            ApiError::InvalidStage { .. } => "INVALID_STAGE",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Duplicate(_) => "DUPLICATE",
            ApiError::OverlapConflict(_) => "OVERLAP_CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Duplicate(msg)
            | ApiError::OverlapConflict(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg.clone(),
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::InvalidStatus { entity, status, action } => {
                format!("Cannot {} {} in status {}", action, entity, status)
            }
            ApiError::InvalidStage { entity, stage, action } => {
                format!("Cannot {} {} in stage {}", action, entity, stage)
            }
        }
    }

    /// Convert to the error envelope body
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "code": self.error_code(),
            "message": self.message(),
        });

        match self {
            ApiError::Validation { field_errors, .. } if !field_errors.is_empty() => {
                error["details"] = json!({ "field_errors": field_errors });
            }
            ApiError::InvalidStatus { entity, status, .. } => {
                error["details"] = json!({ "entity": entity, "status": status });
            }
            ApiError::InvalidStage { entity, stage, .. } => {
                error["details"] = json!({ "entity": entity, "stage": stage });
            }
            _ => {}
        }

        json!({ "success": false, "error": error })
    }
}

// Static constructor methods used throughout the handlers
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation(message: impl Into<String>, field_errors: HashMap<String, String>) -> Self {
        ApiError::Validation { message: message.into(), field_errors }
    }

    pub fn invalid_status(entity: &'static str, status: impl Into<String>, action: &'static str) -> Self {
        ApiError::InvalidStatus { entity, status: status.into(), action }
    }

    pub fn invalid_stage(entity: &'static str, stage: impl Into<String>, action: &'static str) -> Self {
        ApiError::InvalidStage { entity, stage: stage.into(), action }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        ApiError::Duplicate(message.into())
    }

    pub fn overlap_conflict(message: impl Into<String>) -> Self {
        ApiError::OverlapConflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<crate::database::manager::DatabaseError> for ApiError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        match err {
            crate::database::manager::DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            crate::database::manager::DatabaseError::ConfigMissing(_)
            | crate::database::manager::DatabaseError::InvalidDatabaseUrl => {
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            crate::database::manager::DatabaseError::QueryError(msg) => {
                // Don't expose internal SQL errors to clients
                tracing::error!("Database query error: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            crate::database::manager::DatabaseError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::not_found("Record not found"),
            other => {
                tracing::error!("SQLx error: {}", other);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

impl From<crate::workflow::WorkflowError> for ApiError {
    fn from(err: crate::workflow::WorkflowError) -> Self {
        ApiError::invalid_status(err.entity, err.state, err.action)
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_mirror_error_kind() {
        assert_eq!(ApiError::validation("bad", HashMap::new()).status_code(), 400);
        assert_eq!(ApiError::invalid_status("appointment", "COMPLETED", "check in").status_code(), 400);
        assert_eq!(ApiError::not_found("nope").status_code(), 404);
        assert_eq!(ApiError::duplicate("taken").status_code(), 409);
        assert_eq!(ApiError::overlap_conflict("busy").status_code(), 409);
        assert_eq!(ApiError::forbidden("no").status_code(), 403);
    }

    #[test]
    fn envelope_carries_code_and_message() {
        let body = ApiError::overlap_conflict("provider is double-booked").to_json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "OVERLAP_CONFLICT");
        assert_eq!(body["error"]["message"], "provider is double-booked");
    }

    #[test]
    fn validation_envelope_includes_field_errors() {
        let mut fields = HashMap::new();
        fields.insert("first_name".to_string(), "This field is required".to_string());
        let body = ApiError::validation("Invalid request", fields).to_json();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(
            body["error"]["details"]["field_errors"]["first_name"],
            "This field is required"
        );
    }

    #[test]
    fn invalid_status_message_names_entity_and_state() {
        let err = ApiError::invalid_status("appointment", "COMPLETED", "check in");
        assert_eq!(err.message(), "Cannot check in appointment in status COMPLETED");
        let body = err.to_json();
        assert_eq!(body["error"]["details"]["status"], "COMPLETED");
    }
}
