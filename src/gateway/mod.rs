//! Tenant-scoped CRUD gateway.
//!
//! One reusable layer instantiated per resource. A `ResourceDef` declares the
//! table, delete policy, and the permission pair; the gateway guarantees that
//! every read/write runs under the caller's clinic predicate, that deletes
//! follow the declared policy, and that every mutation lands an audit entry
//! on the same transaction.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::api::{Page, PageQuery};
use crate::audit::{self, AuditAction};
use crate::database::scope::ScopedQuery;
use crate::error::ApiError;
use crate::middleware::{Permission, Session};

/// Per-resource delete policy. Soft is the default posture; Hard is an
/// explicit per-resource decision (e.g. image tags cascading assignments).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    Soft,
    Hard,
}

/// Static description of one gateway instantiation
pub struct ResourceDef {
    /// Singular entity name used in messages and audit entries
    pub entity: &'static str,
    pub table: &'static str,
    pub delete: DeletePolicy,
    pub read: Permission,
    pub write: Permission,
}

impl ResourceDef {
    /// Base scope for reads: tenant predicate plus, for soft-deletable
    /// resources, the active-rows filter.
    pub fn scope(&self, session: &Session) -> ScopedQuery {
        match self.delete {
            DeletePolicy::Soft => ScopedQuery::active(self.table, session.clinic_id),
            DeletePolicy::Hard => ScopedQuery::new(self.table, session.clinic_id),
        }
    }

    /// Scope that also sees soft-deleted rows (restore path)
    pub fn scope_with_deleted(&self, session: &Session) -> ScopedQuery {
        ScopedQuery::new(self.table, session.clinic_id)
    }

    fn not_found(&self) -> ApiError {
        ApiError::not_found(format!("{} not found", self.entity))
    }
}

/// Resource-specific behavior the gateway invokes around its own writes
#[async_trait]
pub trait GatewayHooks: Send + Sync {
    /// Runs inside the delete transaction, before the row is removed.
    /// Hard-delete resources use this to cascade dependent rows.
    async fn before_delete(
        &self,
        _tx: &mut Transaction<'_, Postgres>,
        _session: &Session,
        _id: Uuid,
    ) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Default hooks: nothing beyond the gateway's own writes
pub struct NoHooks;

#[async_trait]
impl GatewayHooks for NoHooks {}

/// Paginated list under the tenant scope. `filters` customizes the base
/// scope (extra predicates); it is applied identically to the item query and
/// the COUNT so `total` always matches the filter.
pub async fn list_page<T, F>(
    pool: &PgPool,
    def: &ResourceDef,
    session: &Session,
    page: &PageQuery,
    order: (&'static str, bool),
    filters: F,
) -> Result<Page<T>, ApiError>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin + Serialize,
    F: Fn(ScopedQuery) -> ScopedQuery,
{
    session.require(def.read)?;

    let total = filters(def.scope(session)).count(pool).await?;
    let items = filters(def.scope(session))
        .order_by(order.0, order.1)
        .paginate(page)
        .fetch_all(pool)
        .await?;

    Ok(Page::new(items, total, page))
}

/// Fetch one row by id, resolving cross-tenant ids to NOT_FOUND
pub async fn fetch<T>(
    pool: &PgPool,
    def: &ResourceDef,
    session: &Session,
    id: Uuid,
) -> Result<T, ApiError>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
{
    session.require(def.read)?;

    def.scope(session)
        .and_eq("id", crate::database::Bind::Uuid(id))
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| def.not_found())
}

/// Delete by id following the resource's declared policy. Soft delete is a
/// timestamp write; hard delete removes the row after `hooks.before_delete`
/// has cascaded dependents. Audit rides the same transaction.
pub async fn delete(
    pool: &PgPool,
    def: &ResourceDef,
    session: &Session,
    id: Uuid,
    hooks: &dyn GatewayHooks,
) -> Result<(), ApiError> {
    session.require(def.write)?;

    let mut tx = pool.begin().await?;

    let (rows, action) = match def.delete {
        DeletePolicy::Soft => {
            let sql = format!(
                "UPDATE \"{}\" SET deleted_at = now(), updated_at = now() \
                 WHERE id = $1 AND clinic_id = $2 AND deleted_at IS NULL",
                def.table
            );
            let result = sqlx::query(&sql)
                .bind(id)
                .bind(session.clinic_id)
                .execute(&mut *tx)
                .await?;
            (result.rows_affected(), AuditAction::SoftDelete)
        }
        DeletePolicy::Hard => {
            hooks.before_delete(&mut tx, session, id).await?;
            let sql = format!(
                "DELETE FROM \"{}\" WHERE id = $1 AND clinic_id = $2",
                def.table
            );
            let result = sqlx::query(&sql)
                .bind(id)
                .bind(session.clinic_id)
                .execute(&mut *tx)
                .await?;
            (result.rows_affected(), AuditAction::HardDelete)
        }
    };

    if rows == 0 {
        return Err(def.not_found());
    }

    audit::record(&mut tx, session, action, def.entity, id, json!({})).await?;
    tx.commit().await?;
    Ok(())
}

/// Clear `deleted_at` on a soft-deleted row
pub async fn restore(
    pool: &PgPool,
    def: &ResourceDef,
    session: &Session,
    id: Uuid,
) -> Result<(), ApiError> {
    session.require(def.write)?;

    if def.delete != DeletePolicy::Soft {
        return Err(ApiError::bad_request(format!(
            "{} does not support restore",
            def.entity
        )));
    }

    let mut tx = pool.begin().await?;

    let sql = format!(
        "UPDATE \"{}\" SET deleted_at = NULL, updated_at = now() \
         WHERE id = $1 AND clinic_id = $2 AND deleted_at IS NOT NULL",
        def.table
    );
    let result = sqlx::query(&sql)
        .bind(id)
        .bind(session.clinic_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(def.not_found());
    }

    audit::record(&mut tx, session, AuditAction::Restore, def.entity, id, json!({})).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            user_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            username: "frontdesk".to_string(),
            permissions: vec![Permission::PatientsRead],
        }
    }

    const PATIENTS: ResourceDef = ResourceDef {
        entity: "patient",
        table: "patients",
        delete: DeletePolicy::Soft,
        read: Permission::PatientsRead,
        write: Permission::PatientsWrite,
    };

    const TAGS: ResourceDef = ResourceDef {
        entity: "image tag",
        table: "image_tags",
        delete: DeletePolicy::Hard,
        read: Permission::ImagingRead,
        write: Permission::ImagingWrite,
    };

    #[test]
    fn soft_resources_scope_out_deleted_rows() {
        let sql = PATIENTS.scope(&session()).to_select_sql();
        assert!(sql.contains("\"deleted_at\" IS NULL"));
        assert!(sql.contains("\"clinic_id\" = $1"));
    }

    #[test]
    fn hard_resources_have_no_deleted_filter() {
        let sql = TAGS.scope(&session()).to_select_sql();
        assert!(!sql.contains("deleted_at"));
        assert!(sql.contains("\"clinic_id\" = $1"));
    }

    #[test]
    fn restore_scope_sees_deleted_rows() {
        let sql = PATIENTS.scope_with_deleted(&session()).to_select_sql();
        assert!(!sql.contains("deleted_at"));
    }
}
