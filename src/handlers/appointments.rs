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
use crate::database::{Bind, DatabaseManager, Op};
use crate::error::ApiError;
use crate::gateway::{self, DeletePolicy, ResourceDef};
use crate::middleware::{ApiResponse, ApiResult, Permission, Session};
use crate::validate::FieldErrors;
use crate::workflow::{TransitionTable, WorkflowAction, WorkflowState};

const APPOINTMENTS: ResourceDef = ResourceDef {
    entity: "appointment",
    table: "appointments",
    delete: DeletePolicy::Soft,
    read: Permission::ScheduleRead,
    write: Permission::ScheduleWrite,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApptStatus {
    Scheduled,
    CheckedIn,
    Seated,
    Completed,
    Cancelled,
}

impl WorkflowState for ApptStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ApptStatus::Scheduled => "SCHEDULED",
            ApptStatus::CheckedIn => "CHECKED_IN",
            ApptStatus::Seated => "SEATED",
            ApptStatus::Completed => "COMPLETED",
            ApptStatus::Cancelled => "CANCELLED",
        }
    }
}

impl ApptStatus {
    fn parse(s: &str) -> Result<Self, ApiError> {
        Ok(match s {
            "SCHEDULED" => ApptStatus::Scheduled,
            "CHECKED_IN" => ApptStatus::CheckedIn,
            "SEATED" => ApptStatus::Seated,
            "COMPLETED" => ApptStatus::Completed,
            "CANCELLED" => ApptStatus::Cancelled,
            other => {
                tracing::error!("unknown appointment status in database: {}", other);
                return Err(ApiError::internal_server_error("Corrupt appointment status"));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApptAction {
    CheckIn,
    Seat,
    Complete,
    Cancel,
}

impl WorkflowAction for ApptAction {
    fn verb(&self) -> &'static str {
        match self {
            ApptAction::CheckIn => "check in",
            ApptAction::Seat => "seat",
            ApptAction::Complete => "complete",
            ApptAction::Cancel => "cancel",
        }
    }
}

/// Visit lifecycle. Cancellation is legal until the visit completes.
static TRANSITIONS: TransitionTable<ApptStatus, ApptAction> = TransitionTable::new(
    "appointment",
    &[
        (ApptStatus::Scheduled, ApptAction::CheckIn, ApptStatus::CheckedIn),
        (ApptStatus::CheckedIn, ApptAction::Seat, ApptStatus::Seated),
        (ApptStatus::Seated, ApptAction::Complete, ApptStatus::Completed),
        (ApptStatus::Scheduled, ApptAction::Cancel, ApptStatus::Cancelled),
        (ApptStatus::CheckedIn, ApptAction::Cancel, ApptStatus::Cancelled),
        (ApptStatus::Seated, ApptAction::Cancel, ApptStatus::Cancelled),
    ],
);

#[derive(Debug, FromRow, Serialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub status: String,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Cross-reference row tracking when a visit entered/left each stage
#[derive(Debug, FromRow, Serialize)]
pub struct FlowState {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_id: Uuid,
    pub stage: String,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub patient_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<String>,
    /// Half-open window on `scheduled_start`: `from <= start < to`
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointment {
    pub patient_id: Option<String>,
    pub provider_id: Option<String>,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    pub notes: Option<String>,
}

fn parse_rfc3339(v: &mut FieldErrors, field: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = v.require_str(field, value)?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            v.add(field, format!("Invalid timestamp format: {}", raw));
            None
        }
    }
}

/// GET /api/appointments
pub async fn list(
    Extension(session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<Appointment>> {
    let pool = DatabaseManager::pool().await?;
    let page = PageQuery { page: query.page, page_size: query.page_size };

    let result = gateway::list_page(
        &pool,
        &APPOINTMENTS,
        &session,
        &page,
        ("scheduled_start", false),
        |mut scope| {
            if let Some(pid) = query.patient_id {
                scope = scope.and_eq("patient_id", Bind::Uuid(pid));
            }
            if let Some(pid) = query.provider_id {
                scope = scope.and_eq("provider_id", Bind::Uuid(pid));
            }
            if let Some(status) = &query.status {
                scope = scope.and_eq("status", Bind::Text(status.clone()));
            }
            if let Some(from) = query.from {
                scope = scope.and_cmp("scheduled_start", Op::Gte, Bind::Timestamp(from));
            }
            if let Some(to) = query.to {
                scope = scope.and_cmp("scheduled_start", Op::Lt, Bind::Timestamp(to));
            }
            scope
        },
    )
    .await?;

    Ok(ApiResponse::success(result))
}

/// GET /api/appointments/:id
pub async fn get(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<Appointment> {
    let pool = DatabaseManager::pool().await?;
    let appt = gateway::fetch(&pool, &APPOINTMENTS, &session, id).await?;
    Ok(ApiResponse::success(appt))
}

/// GET /api/appointments/:id/flow - stage history for the visit
pub async fn flow(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<FlowState>> {
    session.require(APPOINTMENTS.read)?;
    let pool = DatabaseManager::pool().await?;

    // 404 before leaking whether any flow rows exist
    let _: Appointment = gateway::fetch(&pool, &APPOINTMENTS, &session, id).await?;

    let states: Vec<FlowState> =
        crate::database::ScopedQuery::new("appointment_flow_states", session.clinic_id)
            .and_eq("appointment_id", Bind::Uuid(id))
            .order_by("entered_at", false)
            .fetch_all(&pool)
            .await?;

    Ok(ApiResponse::success(states))
}

/// POST /api/appointments
pub async fn create(
    Extension(session): Extension<Session>,
    Json(payload): Json<CreateAppointment>,
) -> ApiResult<Appointment> {
    session.require(APPOINTMENTS.write)?;

    let mut v = FieldErrors::new();
    let patient_id = v.require_uuid("patient_id", payload.patient_id.as_deref());
    let provider_id = v.require_uuid("provider_id", payload.provider_id.as_deref());
    let start = parse_rfc3339(&mut v, "scheduled_start", payload.scheduled_start.as_deref());
    let end = parse_rfc3339(&mut v, "scheduled_end", payload.scheduled_end.as_deref());
    if let (Some(s), Some(e)) = (start, end) {
        if e <= s {
            v.add("scheduled_end", "Must be after scheduled_start");
        }
    }
    v.into_result()?;
    let (patient_id, provider_id) = (patient_id.unwrap(), provider_id.unwrap());
    let (start, end) = (start.unwrap(), end.unwrap());

    let pool = DatabaseManager::pool().await?;
    super::patients::assert_patient_in_clinic(&pool, &session, patient_id).await?;

    // Provider double-booking check; cancelled visits do not block the slot
    let conflicts: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM appointments \
         WHERE clinic_id = $1 AND provider_id = $2 AND deleted_at IS NULL \
           AND status NOT IN ('CANCELLED', 'COMPLETED') \
           AND scheduled_start < $3 AND scheduled_end > $4",
    )
    .bind(session.clinic_id)
    .bind(provider_id)
    .bind(end)
    .bind(start)
    .fetch_one(&pool)
    .await?;

    if conflicts > 0 {
        return Err(ApiError::overlap_conflict(
            "Provider already has an appointment in this time range",
        ));
    }

    let mut tx = pool.begin().await?;

    let appt: Appointment = sqlx::query_as(
        "INSERT INTO appointments \
         (id, clinic_id, patient_id, provider_id, scheduled_start, scheduled_end, status, notes, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, 'SCHEDULED', $7, $8, now(), now()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(patient_id)
    .bind(provider_id)
    .bind(start)
    .bind(end)
    .bind(payload.notes.as_deref().map(str::trim))
    .bind(session.user_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Create,
        APPOINTMENTS.entity,
        appt.id,
        json!({ "patient_id": patient_id, "provider_id": provider_id }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::created(appt))
}

/// DELETE /api/appointments/:id - soft delete
pub async fn delete(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    let pool = DatabaseManager::pool().await?;
    gateway::delete(&pool, &APPOINTMENTS, &session, id, &crate::gateway::NoHooks).await?;
    Ok(ApiResponse::success(json!({ "deleted": true })))
}

/// POST /api/appointments/:id/check-in
pub async fn check_in(
    session: Extension<Session>,
    id: Path<Uuid>,
) -> ApiResult<Appointment> {
    transition(session, id, ApptAction::CheckIn).await
}

/// POST /api/appointments/:id/seat
pub async fn seat(session: Extension<Session>, id: Path<Uuid>) -> ApiResult<Appointment> {
    transition(session, id, ApptAction::Seat).await
}

/// POST /api/appointments/:id/complete
pub async fn complete(session: Extension<Session>, id: Path<Uuid>) -> ApiResult<Appointment> {
    transition(session, id, ApptAction::Complete).await
}

/// POST /api/appointments/:id/cancel
pub async fn cancel(session: Extension<Session>, id: Path<Uuid>) -> ApiResult<Appointment> {
    transition(session, id, ApptAction::Cancel).await
}

/// Shared transition body: resolve the target status first, so an illegal
/// transition fails before any write and creates no flow-state row.
async fn transition(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    action: ApptAction,
) -> ApiResult<Appointment> {
    session.require(APPOINTMENTS.write)?;

    let pool = DatabaseManager::pool().await?;
    let appt: Appointment = gateway::fetch(&pool, &APPOINTMENTS, &session, id).await?;

    let current = ApptStatus::parse(&appt.status)?;
    let target = TRANSITIONS.apply(current, action)?;

    let mut tx = pool.begin().await?;

    // Compare-and-set on the status so a concurrent transition that already
    // committed makes this one fail instead of double-applying
    let updated: Option<Appointment> = sqlx::query_as(
        "UPDATE appointments SET status = $1, updated_at = now() \
         WHERE id = $2 AND clinic_id = $3 AND status = $4 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(target.as_str())
    .bind(id)
    .bind(session.clinic_id)
    .bind(current.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    let updated =
        updated.ok_or_else(|| ApiError::conflict("Appointment was modified concurrently"))?;

    // Close the open stage, then open the new one (cancel only closes)
    sqlx::query(
        "UPDATE appointment_flow_states SET exited_at = now() \
         WHERE appointment_id = $1 AND clinic_id = $2 AND exited_at IS NULL",
    )
    .bind(id)
    .bind(session.clinic_id)
    .execute(&mut *tx)
    .await?;

    if target != ApptStatus::Cancelled {
        sqlx::query(
            "INSERT INTO appointment_flow_states (id, clinic_id, appointment_id, stage, entered_at) \
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(Uuid::new_v4())
        .bind(session.clinic_id)
        .bind(id)
        .bind(target.as_str())
        .execute(&mut *tx)
        .await?;
    }

    audit::record(
        &mut tx,
        &session,
        AuditAction::StatusChange,
        APPOINTMENTS.entity,
        id,
        json!({ "from": current.as_str(), "to": target.as_str() }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::success(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_in_is_only_legal_from_scheduled() {
        assert_eq!(
            TRANSITIONS.apply(ApptStatus::Scheduled, ApptAction::CheckIn).unwrap(),
            ApptStatus::CheckedIn
        );
        // Checking in a completed appointment is rejected
        let err = TRANSITIONS
            .apply(ApptStatus::Completed, ApptAction::CheckIn)
            .unwrap_err();
        assert_eq!(err.state, "COMPLETED");
        assert_eq!(crate::error::ApiError::from(err).error_code(), "INVALID_STATUS");
    }

    #[test]
    fn visit_lifecycle_runs_in_order() {
        let s1 = TRANSITIONS.apply(ApptStatus::Scheduled, ApptAction::CheckIn).unwrap();
        let s2 = TRANSITIONS.apply(s1, ApptAction::Seat).unwrap();
        let s3 = TRANSITIONS.apply(s2, ApptAction::Complete).unwrap();
        assert_eq!(s3, ApptStatus::Completed);
    }

    #[test]
    fn completed_and_cancelled_are_terminal() {
        for action in [ApptAction::CheckIn, ApptAction::Seat, ApptAction::Complete, ApptAction::Cancel] {
            assert!(TRANSITIONS.apply(ApptStatus::Completed, action).is_err());
            assert!(TRANSITIONS.apply(ApptStatus::Cancelled, action).is_err());
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            ApptStatus::Scheduled,
            ApptStatus::CheckedIn,
            ApptStatus::Seated,
            ApptStatus::Completed,
            ApptStatus::Cancelled,
        ] {
            assert_eq!(ApptStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
