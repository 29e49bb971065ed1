use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::api::{Page, PageQuery};
use crate::audit::{self, AuditAction};
use crate::database::{Bind, DatabaseManager};
use crate::error::ApiError;
use crate::gateway::{self, DeletePolicy, NoHooks, ResourceDef};
use crate::middleware::{ApiResponse, ApiResult, Permission, Session};
use crate::validate::FieldErrors;

const PATIENTS: ResourceDef = ResourceDef {
    entity: "patient",
    table: "patients",
    delete: DeletePolicy::Soft,
    read: Permission::PatientsRead,
    write: Permission::PatientsWrite,
};

#[derive(Debug, FromRow, Serialize)]
pub struct Patient {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Case-insensitive last-name prefix search
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePatient {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePatient {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    /// Absent leaves the field alone; an explicit `null` clears it
    #[serde(default, deserialize_with = "patch_field")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub phone: Option<Option<String>>,
}

/// Distinguish an absent field (outer None) from an explicit `null`
/// (Some(None)) so PATCH can clear nullable columns
fn patch_field<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

fn resolve_patch(patch: &Option<Option<String>>, current: &Option<String>) -> Option<String> {
    match patch {
        Some(value) => value.as_deref().map(|s| s.trim().to_string()),
        None => current.clone(),
    }
}

/// GET /api/patients - paginated list, newest first
pub async fn list(
    Extension(session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<Patient>> {
    let pool = DatabaseManager::pool().await?;
    let page = PageQuery { page: query.page, page_size: query.page_size };

    let result = gateway::list_page(
        &pool,
        &PATIENTS,
        &session,
        &page,
        ("created_at", true),
        |scope| match &query.last_name {
            Some(prefix) if !prefix.trim().is_empty() => {
                scope.and_prefix("last_name", prefix.trim())
            }
            _ => scope,
        },
    )
    .await?;

    Ok(ApiResponse::success(result))
}

/// GET /api/patients/:id
pub async fn get(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<Patient> {
    let pool = DatabaseManager::pool().await?;
    let patient = gateway::fetch(&pool, &PATIENTS, &session, id).await?;
    Ok(ApiResponse::success(patient))
}

/// POST /api/patients
pub async fn create(
    Extension(session): Extension<Session>,
    Json(payload): Json<CreatePatient>,
) -> ApiResult<Patient> {
    session.require(PATIENTS.write)?;

    let mut v = FieldErrors::new();
    let first_name = v.require_str("first_name", payload.first_name.as_deref());
    let last_name = v.require_str("last_name", payload.last_name.as_deref());
    let date_of_birth = v.require_date("date_of_birth", payload.date_of_birth.as_deref());
    v.into_result()?;

    let pool = DatabaseManager::pool().await?;
    let mut tx = pool.begin().await?;

    let patient: Patient = sqlx::query_as(
        "INSERT INTO patients \
         (id, clinic_id, first_name, last_name, date_of_birth, email, phone, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(first_name.unwrap())
    .bind(last_name.unwrap())
    .bind(date_of_birth.unwrap())
    .bind(payload.email.as_deref().map(str::trim))
    .bind(payload.phone.as_deref().map(str::trim))
    .bind(session.user_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Create,
        PATIENTS.entity,
        patient.id,
        json!({ "last_name": patient.last_name }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::created(patient))
}

/// PATCH /api/patients/:id - partial update
pub async fn update(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePatient>,
) -> ApiResult<Patient> {
    session.require(PATIENTS.write)?;

    let pool = DatabaseManager::pool().await?;
    let existing: Patient = gateway::fetch(&pool, &PATIENTS, &session, id).await?;

    // Validate only the fields that were supplied, then merge
    let mut v = FieldErrors::new();
    let date_of_birth = match payload.date_of_birth.as_deref() {
        Some(raw) => v.require_date("date_of_birth", Some(raw)),
        None => Some(existing.date_of_birth),
    };
    let first_name = match payload.first_name.as_deref() {
        Some(raw) => v.require_str("first_name", Some(raw)),
        None => Some(existing.first_name.clone()),
    };
    let last_name = match payload.last_name.as_deref() {
        Some(raw) => v.require_str("last_name", Some(raw)),
        None => Some(existing.last_name.clone()),
    };
    v.into_result()?;

    let email = resolve_patch(&payload.email, &existing.email);
    let phone = resolve_patch(&payload.phone, &existing.phone);

    let mut tx = pool.begin().await?;

    let patient: Patient = sqlx::query_as(
        "UPDATE patients SET first_name = $1, last_name = $2, date_of_birth = $3, \
         email = $4, phone = $5, updated_at = now() \
         WHERE id = $6 AND clinic_id = $7 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(first_name.unwrap())
    .bind(last_name.unwrap())
    .bind(date_of_birth.unwrap())
    .bind(email)
    .bind(phone)
    .bind(id)
    .bind(session.clinic_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Update,
        PATIENTS.entity,
        id,
        json!({ "fields": changed_fields(&payload) }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::success(patient))
}

/// DELETE /api/patients/:id - soft delete
pub async fn delete(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    let pool = DatabaseManager::pool().await?;
    gateway::delete(&pool, &PATIENTS, &session, id, &NoHooks).await?;
    Ok(ApiResponse::success(json!({ "deleted": true })))
}

/// POST /api/patients/:id/restore
pub async fn restore(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<Patient> {
    let pool = DatabaseManager::pool().await?;
    gateway::restore(&pool, &PATIENTS, &session, id).await?;
    let patient = gateway::fetch(&pool, &PATIENTS, &session, id).await?;
    Ok(ApiResponse::success(patient))
}

/// Fetch a patient row for cross-resource referential checks; a miss (or a
/// row in another clinic) is NOT_FOUND
pub async fn assert_patient_in_clinic(
    pool: &sqlx::PgPool,
    session: &Session,
    patient_id: Uuid,
) -> Result<(), ApiError> {
    let exists = crate::database::ScopedQuery::active("patients", session.clinic_id)
        .and_eq("id", Bind::Uuid(patient_id))
        .count(pool)
        .await?;
    if exists == 0 {
        return Err(ApiError::not_found("patient not found"));
    }
    Ok(())
}

fn changed_fields(payload: &UpdatePatient) -> Vec<&'static str> {
    let mut fields = vec![];
    if payload.first_name.is_some() {
        fields.push("first_name");
    }
    if payload.last_name.is_some() {
        fields.push("last_name");
    }
    if payload.date_of_birth.is_some() {
        fields.push("date_of_birth");
    }
    if payload.email.is_some() {
        fields.push("email");
    }
    if payload.phone.is_some() {
        fields.push("phone");
    }
    fields
}
