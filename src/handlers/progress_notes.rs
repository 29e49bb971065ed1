use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::api::{Page, PageQuery};
use crate::audit::{self, AuditAction};
use crate::database::{Bind, DatabaseManager};
use crate::error::ApiError;
use crate::gateway::{self, DeletePolicy, ResourceDef};
use crate::middleware::{ApiResponse, ApiResult, Permission, Session};
use crate::validate::FieldErrors;
use crate::workflow::{TransitionTable, WorkflowAction, WorkflowState};

const NOTES: ResourceDef = ResourceDef {
    entity: "progress note",
    table: "progress_notes",
    delete: DeletePolicy::Soft,
    read: Permission::NotesRead,
    write: Permission::NotesWrite,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteStatus {
    Draft,
    PendingSignature,
    Signed,
    PendingCosign,
    Cosigned,
}

impl WorkflowState for NoteStatus {
    fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Draft => "DRAFT",
            NoteStatus::PendingSignature => "PENDING_SIGNATURE",
            NoteStatus::Signed => "SIGNED",
            NoteStatus::PendingCosign => "PENDING_COSIGN",
            NoteStatus::Cosigned => "COSIGNED",
        }
    }
}

impl NoteStatus {
    fn parse(s: &str) -> Result<Self, ApiError> {
        Ok(match s {
            "DRAFT" => NoteStatus::Draft,
            "PENDING_SIGNATURE" => NoteStatus::PendingSignature,
            "SIGNED" => NoteStatus::Signed,
            "PENDING_COSIGN" => NoteStatus::PendingCosign,
            "COSIGNED" => NoteStatus::Cosigned,
            other => {
                tracing::error!("unknown note status in database: {}", other);
                return Err(ApiError::internal_server_error("Corrupt note status"));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteAction {
    Edit,
    Submit,
    Sign,
    Cosign,
}

impl WorkflowAction for NoteAction {
    fn verb(&self) -> &'static str {
        match self {
            NoteAction::Edit => "edit",
            NoteAction::Submit => "submit",
            NoteAction::Sign => "sign",
            NoteAction::Cosign => "cosign",
        }
    }
}

/// Signature workflow. Edits never change the status; signing from either
/// editable state lands in SIGNED (diverted to PENDING_COSIGN for notes that
/// require a cosignature).
static TRANSITIONS: TransitionTable<NoteStatus, NoteAction> = TransitionTable::new(
    "progress note",
    &[
        (NoteStatus::Draft, NoteAction::Edit, NoteStatus::Draft),
        (NoteStatus::PendingSignature, NoteAction::Edit, NoteStatus::PendingSignature),
        (NoteStatus::Draft, NoteAction::Submit, NoteStatus::PendingSignature),
        (NoteStatus::Draft, NoteAction::Sign, NoteStatus::Signed),
        (NoteStatus::PendingSignature, NoteAction::Sign, NoteStatus::Signed),
        (NoteStatus::PendingCosign, NoteAction::Cosign, NoteStatus::Cosigned),
    ],
);

#[derive(Debug, FromRow, Serialize)]
pub struct ProgressNote {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub status: String,
    pub requires_cosign: bool,
    pub signed_by: Option<Uuid>,
    pub signed_at: Option<DateTime<Utc>>,
    pub cosigned_by: Option<Uuid>,
    pub cosigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub patient_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNote {
    pub patient_id: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub requires_cosign: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNote {
    pub body: Option<String>,
}

/// GET /api/progress-notes
pub async fn list(
    Extension(session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<ProgressNote>> {
    let pool = DatabaseManager::pool().await?;
    let page = PageQuery { page: query.page, page_size: query.page_size };

    let result = gateway::list_page(
        &pool,
        &NOTES,
        &session,
        &page,
        ("created_at", true),
        |mut scope| {
            if let Some(pid) = query.patient_id {
                scope = scope.and_eq("patient_id", Bind::Uuid(pid));
            }
            if let Some(status) = &query.status {
                scope = scope.and_eq("status", Bind::Text(status.clone()));
            }
            scope
        },
    )
    .await?;

    Ok(ApiResponse::success(result))
}

/// GET /api/progress-notes/:id
pub async fn get(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProgressNote> {
    let pool = DatabaseManager::pool().await?;
    let note = gateway::fetch(&pool, &NOTES, &session, id).await?;
    Ok(ApiResponse::success(note))
}

/// POST /api/progress-notes - create in DRAFT
pub async fn create(
    Extension(session): Extension<Session>,
    Json(payload): Json<CreateNote>,
) -> ApiResult<ProgressNote> {
    session.require(NOTES.write)?;

    let mut v = FieldErrors::new();
    let patient_id = v.require_uuid("patient_id", payload.patient_id.as_deref());
    let body = v.require_str("body", payload.body.as_deref());
    v.into_result()?;
    let patient_id = patient_id.unwrap();

    let pool = DatabaseManager::pool().await?;
    super::patients::assert_patient_in_clinic(&pool, &session, patient_id).await?;

    let mut tx = pool.begin().await?;

    let note: ProgressNote = sqlx::query_as(
        "INSERT INTO progress_notes \
         (id, clinic_id, patient_id, author_id, body, status, requires_cosign, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, 'DRAFT', $6, now(), now()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(patient_id)
    .bind(session.user_id)
    .bind(body.unwrap())
    .bind(payload.requires_cosign)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Create,
        NOTES.entity,
        note.id,
        json!({ "patient_id": patient_id }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::created(note))
}

/// PATCH /api/progress-notes/:id - body edits, only while editable
pub async fn update(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateNote>,
) -> ApiResult<ProgressNote> {
    session.require(NOTES.write)?;

    let mut v = FieldErrors::new();
    let body = v.require_str("body", payload.body.as_deref());
    v.into_result()?;

    let pool = DatabaseManager::pool().await?;
    let existing: ProgressNote = gateway::fetch(&pool, &NOTES, &session, id).await?;

    let current = NoteStatus::parse(&existing.status)?;
    // A signed note is immutable; reject before writing anything
    TRANSITIONS.apply(current, NoteAction::Edit)?;

    let mut tx = pool.begin().await?;

    // Status is re-asserted so a concurrent sign cannot race the edit gate
    let note: Option<ProgressNote> = sqlx::query_as(
        "UPDATE progress_notes SET body = $1, updated_at = now() \
         WHERE id = $2 AND clinic_id = $3 AND status = $4 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(body.unwrap())
    .bind(id)
    .bind(session.clinic_id)
    .bind(current.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    let note = note.ok_or_else(|| ApiError::conflict("Note was modified concurrently"))?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Update,
        NOTES.entity,
        id,
        json!({ "fields": ["body"] }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::success(note))
}

/// POST /api/progress-notes/:id/submit - DRAFT -> PENDING_SIGNATURE
pub async fn submit(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProgressNote> {
    session.require(NOTES.write)?;

    let pool = DatabaseManager::pool().await?;
    let existing: ProgressNote = gateway::fetch(&pool, &NOTES, &session, id).await?;
    let current = NoteStatus::parse(&existing.status)?;
    let target = TRANSITIONS.apply(current, NoteAction::Submit)?;

    let note = set_status(&pool, &session, id, current, target, None, None).await?;
    Ok(ApiResponse::success(note))
}

/// POST /api/progress-notes/:id/sign
pub async fn sign(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProgressNote> {
    session.require(Permission::NotesSign)?;

    let pool = DatabaseManager::pool().await?;
    let existing: ProgressNote = gateway::fetch(&pool, &NOTES, &session, id).await?;
    let current = NoteStatus::parse(&existing.status)?;

    let mut target = TRANSITIONS.apply(current, NoteAction::Sign)?;
    if existing.requires_cosign {
        target = NoteStatus::PendingCosign;
    }

    let note = set_status(&pool, &session, id, current, target, Some(session.user_id), None).await?;
    Ok(ApiResponse::success(note))
}

/// POST /api/progress-notes/:id/cosign - requires a second signer
pub async fn cosign(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProgressNote> {
    session.require(Permission::NotesSign)?;

    let pool = DatabaseManager::pool().await?;
    let existing: ProgressNote = gateway::fetch(&pool, &NOTES, &session, id).await?;
    let current = NoteStatus::parse(&existing.status)?;
    let target = TRANSITIONS.apply(current, NoteAction::Cosign)?;

    if existing.signed_by == Some(session.user_id) {
        return Err(ApiError::forbidden("Cosigner must differ from the signer"));
    }

    let note = set_status(&pool, &session, id, current, target, None, Some(session.user_id)).await?;
    Ok(ApiResponse::success(note))
}

/// DELETE /api/progress-notes/:id - only drafts may be discarded
pub async fn delete(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    session.require(NOTES.write)?;

    let pool = DatabaseManager::pool().await?;
    let existing: ProgressNote = gateway::fetch(&pool, &NOTES, &session, id).await?;
    let current = NoteStatus::parse(&existing.status)?;
    if current != NoteStatus::Draft {
        return Err(ApiError::invalid_status(NOTES.entity, current.as_str(), "delete"));
    }

    gateway::delete(&pool, &NOTES, &session, id, &crate::gateway::NoHooks).await?;
    Ok(ApiResponse::success(json!({ "deleted": true })))
}

/// Write the status change plus signer columns and the audit entry in one
/// transaction
async fn set_status(
    pool: &sqlx::PgPool,
    session: &Session,
    id: Uuid,
    from: NoteStatus,
    to: NoteStatus,
    signed_by: Option<Uuid>,
    cosigned_by: Option<Uuid>,
) -> Result<ProgressNote, ApiError> {
    let mut tx = pool.begin().await?;

    // Compare-and-set on the from-status so concurrent sign/cosign requests
    // cannot both land
    let note: Option<ProgressNote> = sqlx::query_as(
        "UPDATE progress_notes SET status = $1, \
         signed_by = COALESCE($2, signed_by), \
         signed_at = CASE WHEN $2 IS NULL THEN signed_at ELSE now() END, \
         cosigned_by = COALESCE($3, cosigned_by), \
         cosigned_at = CASE WHEN $3 IS NULL THEN cosigned_at ELSE now() END, \
         updated_at = now() \
         WHERE id = $4 AND clinic_id = $5 AND status = $6 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(to.as_str())
    .bind(signed_by)
    .bind(cosigned_by)
    .bind(id)
    .bind(session.clinic_id)
    .bind(from.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    let note = note.ok_or_else(|| ApiError::conflict("Note was modified concurrently"))?;

    audit::record(
        &mut tx,
        session,
        AuditAction::StatusChange,
        NOTES.entity,
        id,
        json!({ "from": from.as_str(), "to": to.as_str() }),
    )
    .await?;
    tx.commit().await?;

    Ok(note)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_are_legal_only_before_signing() {
        assert!(TRANSITIONS.permits(NoteStatus::Draft, NoteAction::Edit));
        assert!(TRANSITIONS.permits(NoteStatus::PendingSignature, NoteAction::Edit));
        assert!(!TRANSITIONS.permits(NoteStatus::Signed, NoteAction::Edit));
        assert!(!TRANSITIONS.permits(NoteStatus::Cosigned, NoteAction::Edit));
    }

    #[test]
    fn signing_is_legal_from_both_editable_states() {
        assert_eq!(
            TRANSITIONS.apply(NoteStatus::Draft, NoteAction::Sign).unwrap(),
            NoteStatus::Signed
        );
        assert_eq!(
            TRANSITIONS.apply(NoteStatus::PendingSignature, NoteAction::Sign).unwrap(),
            NoteStatus::Signed
        );
    }

    #[test]
    fn cosign_requires_pending_cosign() {
        assert_eq!(
            TRANSITIONS.apply(NoteStatus::PendingCosign, NoteAction::Cosign).unwrap(),
            NoteStatus::Cosigned
        );
        let err = TRANSITIONS.apply(NoteStatus::Signed, NoteAction::Cosign).unwrap_err();
        assert_eq!(err.state, "SIGNED");
    }

    #[test]
    fn resigning_a_signed_note_is_rejected() {
        assert!(TRANSITIONS.apply(NoteStatus::Signed, NoteAction::Sign).is_err());
        assert!(TRANSITIONS.apply(NoteStatus::PendingCosign, NoteAction::Sign).is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            NoteStatus::Draft,
            NoteStatus::PendingSignature,
            NoteStatus::Signed,
            NoteStatus::PendingCosign,
            NoteStatus::Cosigned,
        ] {
            assert_eq!(NoteStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
