//! Compliance audit trail. Every successful mutation appends one entry
//! recording actor, action kind, entity type/id, and a details payload.
//!
//! Entries are written on the mutation's own transaction so the audit trail
//! and the primary write commit or roll back together.

use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::middleware::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    SoftDelete,
    HardDelete,
    Restore,
    StatusChange,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::SoftDelete => "SOFT_DELETE",
            AuditAction::HardDelete => "HARD_DELETE",
            AuditAction::Restore => "RESTORE",
            AuditAction::StatusChange => "STATUS_CHANGE",
        }
    }
}

/// Append an audit entry on the caller's transaction
pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    session: &Session,
    action: AuditAction,
    entity_type: &'static str,
    entity_id: Uuid,
    details: Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_log (id, clinic_id, actor_id, action, entity_type, entity_id, details, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, now())",
    )
    .bind(Uuid::new_v4())
    .bind(session.clinic_id)
    .bind(session.user_id)
    .bind(action.as_str())
    .bind(entity_type)
    .bind(entity_id)
    .bind(details)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        action = action.as_str(),
        entity_type,
        %entity_id,
        "audit entry recorded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::Create.as_str(), "CREATE");
        assert_eq!(AuditAction::SoftDelete.as_str(), "SOFT_DELETE");
        assert_eq!(AuditAction::StatusChange.as_str(), "STATUS_CHANGE");
    }
}
