use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::api::{Page, PageQuery};
use crate::audit::{self, AuditAction};
use crate::database::{Bind, DatabaseManager, ScopedQuery};
use crate::error::ApiError;
use crate::gateway::{self, DeletePolicy, ResourceDef};
use crate::middleware::{ApiResponse, ApiResult, Permission, Session};
use crate::validate::FieldErrors;
use crate::workflow::{TransitionTable, WorkflowAction, WorkflowState};

const CASES: ResourceDef = ResourceDef {
    entity: "collection case",
    table: "collection_cases",
    delete: DeletePolicy::Soft,
    read: Permission::CollectionsRead,
    write: Permission::CollectionsWrite,
};

const PROMISES: ResourceDef = ResourceDef {
    entity: "payment promise",
    table: "payment_promises",
    delete: DeletePolicy::Soft,
    read: Permission::CollectionsRead,
    write: Permission::CollectionsWrite,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Open,
    InProgress,
    Settled,
    WrittenOff,
}

impl WorkflowState for CaseStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "OPEN",
            CaseStatus::InProgress => "IN_PROGRESS",
            CaseStatus::Settled => "SETTLED",
            CaseStatus::WrittenOff => "WRITTEN_OFF",
        }
    }
}

impl CaseStatus {
    fn parse(s: &str) -> Result<Self, ApiError> {
        Ok(match s {
            "OPEN" => CaseStatus::Open,
            "IN_PROGRESS" => CaseStatus::InProgress,
            "SETTLED" => CaseStatus::Settled,
            "WRITTEN_OFF" => CaseStatus::WrittenOff,
            other => {
                tracing::error!("unknown case status in database: {}", other);
                return Err(ApiError::internal_server_error("Corrupt case status"));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Partial,
    Broken,
}

impl WorkflowState for PromiseStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PromiseStatus::Pending => "PENDING",
            PromiseStatus::Fulfilled => "FULFILLED",
            PromiseStatus::Partial => "PARTIAL",
            PromiseStatus::Broken => "BROKEN",
        }
    }
}

impl PromiseStatus {
    fn parse(s: &str) -> Result<Self, ApiError> {
        Ok(match s {
            "PENDING" => PromiseStatus::Pending,
            "FULFILLED" => PromiseStatus::Fulfilled,
            "PARTIAL" => PromiseStatus::Partial,
            "BROKEN" => PromiseStatus::Broken,
            other => {
                tracing::error!("unknown promise status in database: {}", other);
                return Err(ApiError::internal_server_error("Corrupt promise status"));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseAction {
    Fulfill,
    Break,
}

impl WorkflowAction for PromiseAction {
    fn verb(&self) -> &'static str {
        match self {
            PromiseAction::Fulfill => "fulfill",
            PromiseAction::Break => "mark broken",
        }
    }
}

/// Promises only move out of PENDING; the fulfilled/partial split is decided
/// by the paid amount, not the table.
static PROMISE_TRANSITIONS: TransitionTable<PromiseStatus, PromiseAction> = TransitionTable::new(
    "payment promise",
    &[
        (PromiseStatus::Pending, PromiseAction::Fulfill, PromiseStatus::Fulfilled),
        (PromiseStatus::Pending, PromiseAction::Break, PromiseStatus::Broken),
    ],
);

#[derive(Debug, FromRow, Serialize)]
pub struct CollectionCase {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub original_balance: Decimal,
    pub current_balance: Decimal,
    pub paid_amount: Decimal,
    pub status: String,
    pub opened_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow, Serialize)]
pub struct PaymentPromise {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub case_id: Uuid,
    pub promised_amount: Decimal,
    pub promised_date: NaiveDate,
    pub paid_amount: Option<Decimal>,
    pub status: String,
    pub created_by: Uuid,
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
pub struct CreateCase {
    pub patient_id: Option<String>,
    pub original_balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePromise {
    pub promised_amount: Option<Decimal>,
    pub promised_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FulfillPromise {
    pub paid_amount: Option<Decimal>,
}

/// Aging bucket for a case opened `days` days ago
pub fn aging_bucket(days: i64) -> &'static str {
    match days {
        d if d <= 30 => "0-30",
        d if d <= 60 => "31-60",
        d if d <= 90 => "61-90",
        _ => "90+",
    }
}

/// The status a fulfilled promise lands in for a given payment
pub fn promise_outcome(promised: Decimal, paid: Decimal) -> PromiseStatus {
    if paid >= promised {
        PromiseStatus::Fulfilled
    } else {
        PromiseStatus::Partial
    }
}

/// GET /api/collections
pub async fn list_cases(
    Extension(session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<CollectionCase>> {
    let pool = DatabaseManager::pool().await?;
    let page = PageQuery { page: query.page, page_size: query.page_size };

    let result = gateway::list_page(
        &pool,
        &CASES,
        &session,
        &page,
        ("opened_at", false),
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

/// GET /api/collections/:id
pub async fn get_case(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<CollectionCase> {
    let pool = DatabaseManager::pool().await?;
    let case = gateway::fetch(&pool, &CASES, &session, id).await?;
    Ok(ApiResponse::success(case))
}

/// POST /api/collections
pub async fn create_case(
    Extension(session): Extension<Session>,
    Json(payload): Json<CreateCase>,
) -> ApiResult<CollectionCase> {
    session.require(CASES.write)?;

    let mut v = FieldErrors::new();
    let patient_id = v.require_uuid("patient_id", payload.patient_id.as_deref());
    let balance = v.require_positive_amount("original_balance", payload.original_balance);
    v.into_result()?;
    let (patient_id, balance) = (patient_id.unwrap(), balance.unwrap());

    let pool = DatabaseManager::pool().await?;
    super::patients::assert_patient_in_clinic(&pool, &session, patient_id).await?;

    let mut tx = pool.begin().await?;

    let case: CollectionCase = sqlx::query_as(
        "INSERT INTO collection_cases \
         (id, clinic_id, patient_id, original_balance, current_balance, paid_amount, status, opened_at, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $4, 0, 'OPEN', now(), $5, now(), now()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(patient_id)
    .bind(balance)
    .bind(session.user_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::Create,
        CASES.entity,
        case.id,
        json!({ "patient_id": patient_id, "original_balance": balance }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::created(case))
}

/// GET /api/collections/:id/promises
pub async fn list_promises(
    Extension(session): Extension<Session>,
    Path(case_id): Path<Uuid>,
) -> ApiResult<Vec<PaymentPromise>> {
    session.require(PROMISES.read)?;
    let pool = DatabaseManager::pool().await?;

    let _: CollectionCase = gateway::fetch(&pool, &CASES, &session, case_id).await?;

    let promises: Vec<PaymentPromise> = PROMISES
        .scope(&session)
        .and_eq("case_id", Bind::Uuid(case_id))
        .order_by("promised_date", false)
        .fetch_all(&pool)
        .await?;

    Ok(ApiResponse::success(promises))
}

/// POST /api/collections/:id/promises - record a payment promise against an
/// open case; the first promise moves the case into IN_PROGRESS
pub async fn create_promise(
    Extension(session): Extension<Session>,
    Path(case_id): Path<Uuid>,
    Json(payload): Json<CreatePromise>,
) -> ApiResult<PaymentPromise> {
    session.require(PROMISES.write)?;

    let mut v = FieldErrors::new();
    let amount = v.require_positive_amount("promised_amount", payload.promised_amount);
    let date = v.require_date("promised_date", payload.promised_date.as_deref());
    v.into_result()?;
    let (amount, date) = (amount.unwrap(), date.unwrap());

    let pool = DatabaseManager::pool().await?;
    let case: CollectionCase = gateway::fetch(&pool, &CASES, &session, case_id).await?;

    let case_status = CaseStatus::parse(&case.status)?;
    if !matches!(case_status, CaseStatus::Open | CaseStatus::InProgress) {
        return Err(ApiError::invalid_status(CASES.entity, case_status.as_str(), "promise against"));
    }

    let mut tx = pool.begin().await?;

    let promise: PaymentPromise = sqlx::query_as(
        "INSERT INTO payment_promises \
         (id, clinic_id, case_id, promised_amount, promised_date, status, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, now(), now()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(case_id)
    .bind(amount)
    .bind(date)
    .bind(session.user_id)
    .fetch_one(&mut *tx)
    .await?;

    if case_status == CaseStatus::Open {
        sqlx::query(
            "UPDATE collection_cases SET status = 'IN_PROGRESS', updated_at = now() \
             WHERE id = $1 AND clinic_id = $2 AND status = 'OPEN'",
        )
        .bind(case_id)
        .bind(session.clinic_id)
        .execute(&mut *tx)
        .await?;
    }

    audit::record(
        &mut tx,
        &session,
        AuditAction::Create,
        PROMISES.entity,
        promise.id,
        json!({ "case_id": case_id, "promised_amount": amount }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::created(promise))
}

/// POST /api/promises/:id/fulfill - apply a payment to a pending promise.
/// Promise outcome and parent-case balances move in the same transaction.
pub async fn fulfill_promise(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FulfillPromise>,
) -> ApiResult<serde_json::Value> {
    session.require(PROMISES.write)?;

    let mut v = FieldErrors::new();
    let paid = v.require_positive_amount("paid_amount", payload.paid_amount);
    v.into_result()?;
    let paid = paid.unwrap();

    let pool = DatabaseManager::pool().await?;
    let promise: PaymentPromise = gateway::fetch(&pool, &PROMISES, &session, id).await?;

    let current = PromiseStatus::parse(&promise.status)?;
    PROMISE_TRANSITIONS.apply(current, PromiseAction::Fulfill)?;
    let outcome = promise_outcome(promise.promised_amount, paid);

    let mut tx = pool.begin().await?;

    // Compare-and-set on PENDING so two concurrent payments cannot both be
    // applied to the case balance
    let promise: Option<PaymentPromise> = sqlx::query_as(
        "UPDATE payment_promises SET status = $1, paid_amount = $2, updated_at = now() \
         WHERE id = $3 AND clinic_id = $4 AND status = $5 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(outcome.as_str())
    .bind(paid)
    .bind(id)
    .bind(session.clinic_id)
    .bind(current.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    let promise =
        promise.ok_or_else(|| ApiError::conflict("Promise was modified concurrently"))?;

    // Settle the case when the payment clears the balance
    let case: CollectionCase = sqlx::query_as(
        "UPDATE collection_cases SET \
         paid_amount = paid_amount + $1, \
         current_balance = current_balance - $1, \
         status = CASE WHEN current_balance - $1 <= 0 THEN 'SETTLED' ELSE status END, \
         updated_at = now() \
         WHERE id = $2 AND clinic_id = $3 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(paid)
    .bind(promise.case_id)
    .bind(session.clinic_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::StatusChange,
        PROMISES.entity,
        id,
        json!({
            "from": current.as_str(),
            "to": outcome.as_str(),
            "paid_amount": paid,
            "case_id": promise.case_id,
        }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::success(json!({ "promise": promise, "case": case })))
}

/// POST /api/promises/:id/break - mark a pending promise as broken
pub async fn break_promise(
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentPromise> {
    session.require(PROMISES.write)?;

    let pool = DatabaseManager::pool().await?;
    let promise: PaymentPromise = gateway::fetch(&pool, &PROMISES, &session, id).await?;

    let current = PromiseStatus::parse(&promise.status)?;
    let target = PROMISE_TRANSITIONS.apply(current, PromiseAction::Break)?;

    let mut tx = pool.begin().await?;

    let promise: Option<PaymentPromise> = sqlx::query_as(
        "UPDATE payment_promises SET status = $1, updated_at = now() \
         WHERE id = $2 AND clinic_id = $3 AND status = $4 AND deleted_at IS NULL \
         RETURNING *",
    )
    .bind(target.as_str())
    .bind(id)
    .bind(session.clinic_id)
    .bind(current.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    let promise =
        promise.ok_or_else(|| ApiError::conflict("Promise was modified concurrently"))?;

    audit::record(
        &mut tx,
        &session,
        AuditAction::StatusChange,
        PROMISES.entity,
        id,
        json!({ "from": current.as_str(), "to": target.as_str() }),
    )
    .await?;
    tx.commit().await?;

    Ok(ApiResponse::success(promise))
}

#[derive(Debug, Default, Serialize)]
pub struct AgingBucket {
    pub cases: u64,
    pub balance: Decimal,
}

#[derive(Debug, Default, Serialize)]
pub struct AgingSummary {
    #[serde(rename = "0-30")]
    pub b0_30: AgingBucket,
    #[serde(rename = "31-60")]
    pub b31_60: AgingBucket,
    #[serde(rename = "61-90")]
    pub b61_90: AgingBucket,
    #[serde(rename = "90+")]
    pub b90_plus: AgingBucket,
}

impl AgingSummary {
    fn add(&mut self, bucket: &str, balance: Decimal) {
        let slot = match bucket {
            "0-30" => &mut self.b0_30,
            "31-60" => &mut self.b31_60,
            "61-90" => &mut self.b61_90,
            _ => &mut self.b90_plus,
        };
        slot.cases += 1;
        slot.balance += balance;
    }
}

/// GET /api/collections/aging - outstanding balances bucketed by age
pub async fn aging(Extension(session): Extension<Session>) -> ApiResult<AgingSummary> {
    session.require(CASES.read)?;
    let pool = DatabaseManager::pool().await?;

    let open_cases: Vec<CollectionCase> = ScopedQuery::active("collection_cases", session.clinic_id)
        .and_eq("status", Bind::Text("OPEN".into()))
        .fetch_all(&pool)
        .await?;
    let in_progress: Vec<CollectionCase> = ScopedQuery::active("collection_cases", session.clinic_id)
        .and_eq("status", Bind::Text("IN_PROGRESS".into()))
        .fetch_all(&pool)
        .await?;

    let now = Utc::now();
    let mut summary = AgingSummary::default();
    for case in open_cases.iter().chain(in_progress.iter()) {
        let days = (now - case.opened_at).num_days();
        summary.add(aging_bucket(days), case.current_balance);
    }

    Ok(ApiResponse::success(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[test]
    fn aging_buckets_split_on_boundaries() {
        assert_eq!(aging_bucket(0), "0-30");
        assert_eq!(aging_bucket(30), "0-30");
        assert_eq!(aging_bucket(31), "31-60");
        assert_eq!(aging_bucket(60), "31-60");
        assert_eq!(aging_bucket(61), "61-90");
        assert_eq!(aging_bucket(90), "61-90");
        assert_eq!(aging_bucket(91), "90+");
        assert_eq!(aging_bucket(365), "90+");
    }

    #[test]
    fn full_payment_fulfills_the_promise() {
        assert_eq!(promise_outcome(dec("500"), dec("500")), PromiseStatus::Fulfilled);
        assert_eq!(promise_outcome(dec("500"), dec("600")), PromiseStatus::Fulfilled);
    }

    #[test]
    fn short_payment_is_partial() {
        assert_eq!(promise_outcome(dec("500"), dec("499.99")), PromiseStatus::Partial);
    }

    #[test]
    fn only_pending_promises_can_be_fulfilled_or_broken() {
        for status in [PromiseStatus::Fulfilled, PromiseStatus::Partial, PromiseStatus::Broken] {
            assert!(PROMISE_TRANSITIONS.apply(status, PromiseAction::Fulfill).is_err());
            assert!(PROMISE_TRANSITIONS.apply(status, PromiseAction::Break).is_err());
        }
        assert_eq!(
            PROMISE_TRANSITIONS.apply(PromiseStatus::Pending, PromiseAction::Fulfill).unwrap(),
            PromiseStatus::Fulfilled
        );
    }

    #[test]
    fn aging_summary_accumulates_counts_and_balances() {
        let mut s = AgingSummary::default();
        s.add("0-30", dec("100"));
        s.add("0-30", dec("50"));
        s.add("90+", dec("25"));
        assert_eq!(s.b0_30.cases, 2);
        assert_eq!(s.b0_30.balance, dec("150"));
        assert_eq!(s.b90_plus.cases, 1);
    }
}
