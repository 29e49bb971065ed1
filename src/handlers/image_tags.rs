use async_trait::async_trait;
use axum::{extract::Path, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{self, AuditAction};
use crate::database::{Bind, DatabaseManager};
use crate::error::ApiError;
use crate::gateway::{self, DeletePolicy, GatewayHooks, ResourceDef};
use crate::middleware::{ApiResponse, ApiResult, Permission, Session};
use crate::validate::FieldErrors;

const TAGS: ResourceDef = ResourceDef {
    entity: "image tag",
    table: "image_tags",
    delete: DeletePolicy::Hard,
    read: Permission::ImagingRead,
    write: Permission::ImagingWrite,
};

#[derive(Debug, FromRow, Serialize)]
pub struct ImageTag {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow, Serialize)]
pub struct TagAssignment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub tag_id: Uuid,
    pub image_ref: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTag {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAssignment {
    /// Opaque reference into the imaging store (DICOM uid, file key, ...)
    pub image_ref: Option<String>,
}

/// Deleting a tag removes its assignments in the same transaction
struct TagHooks;

#[async_trait]
impl GatewayHooks for TagHooks {
    async fn before_delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session: &Session,
        id: Uuid,
    ) -> Result<(), ApiError> {
        sqlx::query("DELETE FROM image_tag_assignments WHERE tag_id = $1 AND clinic_id = $2")
            .bind(id)
            .bind(session.clinic_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

/// GET /api/image-tags
pub async fn list(Extension(session): Extension<Session>) -> ApiResult<Vec<ImageTag>> {
    session.require(TAGS.read)?;
    let pool = DatabaseManager::pool().await?;

    let tags: Vec<ImageTag> = TAGS
        .scope(&session)
        .order_by("name", false)
        .fetch_all(&pool)
        .await?;

    Ok(ApiResponse::success(tags))
}

/// POST /api/image-tags - names are unique per clinic
pub async fn create(
    Extension(session): Extension<Session>,
    Json(payload): Json<CreateTag>,
) -> ApiResult<ImageTag> {
    session.require(TAGS.write)?;

    let mut v = FieldErrors::new();
    let name = v.require_str("name", payload.name.as_deref());
    v.into_result()?;
    let name = name.unwrap();

    let pool = DatabaseManager::pool().await?;

    let existing = TAGS
        .scope(&session)
        .and_eq("name", Bind::Text(name.clone()))
        .count(&pool)
        .await?;
    if existing > 0 {
        return Err(ApiError::duplicate(format!(
            "Tag '{}' already exists",
            name
        )));
    }

    let mut tx = pool.begin().await?;

    let tag: ImageTag = sqlx::query_as(
        "INSERT INTO image_tags (id, clinic_id, name, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, now(), now()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(&name)
    .bind(session.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        // The unique index backstops the pre-check under concurrency
        sqlx::Error::Database(db) if db.constraint() == Some("image_tags_clinic_name_key") => {
            ApiError::duplicate(format!("Tag '{}' already exists", name))
        }
        other => ApiError::from(other),
    })?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Create,
        TAGS.entity,
        tag.id,
        json!({ "name": tag.name }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::created(tag))
}

/// DELETE /api/image-tags/:id - hard delete, cascading assignments
pub async fn delete(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    let pool = DatabaseManager::pool().await?;
    gateway::delete(&pool, &TAGS, &session, id, &TagHooks).await?;
    Ok(ApiResponse::success(json!({ "deleted": true })))
}

/// GET /api/image-tags/:id/assignments
pub async fn list_assignments(
    Extension(session): Extension<Session>,
    Path(tag_id): Path<Uuid>,
) -> ApiResult<Vec<TagAssignment>> {
    session.require(TAGS.read)?;
    let pool = DatabaseManager::pool().await?;

    let _: ImageTag = gateway::fetch(&pool, &TAGS, &session, tag_id).await?;

    let assignments: Vec<TagAssignment> =
        crate::database::ScopedQuery::new("image_tag_assignments", session.clinic_id)
            .and_eq("tag_id", Bind::Uuid(tag_id))
            .order_by("created_at", true)
            .fetch_all(&pool)
            .await?;

    Ok(ApiResponse::success(assignments))
}

/// POST /api/image-tags/:id/assignments
pub async fn create_assignment(
    Extension(session): Extension<Session>,
    Path(tag_id): Path<Uuid>,
    Json(payload): Json<CreateAssignment>,
) -> ApiResult<TagAssignment> {
    session.require(TAGS.write)?;

    let mut v = FieldErrors::new();
    let image_ref = v.require_str("image_ref", payload.image_ref.as_deref());
    v.into_result()?;
    let image_ref = image_ref.unwrap();

    let pool = DatabaseManager::pool().await?;
    let _: ImageTag = gateway::fetch(&pool, &TAGS, &session, tag_id).await?;

    let mut tx = pool.begin().await?;

    let assignment: TagAssignment = sqlx::query_as(
        "INSERT INTO image_tag_assignments (id, clinic_id, tag_id, image_ref, created_by, created_at) \
         VALUES ($1, $2, $3, $4, $5, now()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(tag_id)
    .bind(&image_ref)
    .bind(session.user_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Create,
        "image tag assignment",
        assignment.id,
        json!({ "tag_id": tag_id, "image_ref": image_ref }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::created(assignment))
}
