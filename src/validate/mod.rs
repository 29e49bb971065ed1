//! Request validation harness. Collects every offending field before any
//! data access so a single response enumerates the whole problem.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: HashMap<String, String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        // First error per field wins
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fail the request with VALIDATION_ERROR if anything was collected
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation("Invalid request", self.errors))
        }
    }

    /// Require a non-empty string, returning its trimmed form
    pub fn require_str(&mut self, field: &str, value: Option<&str>) -> Option<String> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some(v.to_string()),
            _ => {
                self.add(field, "This field is required");
                None
            }
        }
    }

    /// Require a parsable UUID
    pub fn require_uuid(&mut self, field: &str, value: Option<&str>) -> Option<Uuid> {
        let raw = self.require_str(field, value)?;
        match Uuid::parse_str(&raw) {
            Ok(u) => Some(u),
            Err(_) => {
                self.add(field, format!("Invalid UUID format: {}", raw));
                None
            }
        }
    }

    /// Require an ISO-8601 date (YYYY-MM-DD)
    pub fn require_date(&mut self, field: &str, value: Option<&str>) -> Option<NaiveDate> {
        let raw = self.require_str(field, value)?;
        match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                self.add(field, format!("Invalid date format: {}", raw));
                None
            }
        }
    }

    /// Require a strictly positive money amount
    pub fn require_positive_amount(&mut self, field: &str, value: Option<Decimal>) -> Option<Decimal> {
        match value {
            Some(v) if v > Decimal::ZERO => Some(v),
            Some(_) => {
                self.add(field, "Amount must be greater than zero");
                None
            }
            None => {
                self.add(field, "This field is required");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_harness_passes() {
        assert!(FieldErrors::new().into_result().is_ok());
    }

    #[test]
    fn collects_every_offending_field() {
        let mut v = FieldErrors::new();
        v.require_str("first_name", None);
        v.require_str("last_name", Some("   "));
        v.require_uuid("patient_id", Some("not-a-uuid"));
        let err = v.into_result().unwrap_err();
        let body = err.to_json();
        let fields = &body["error"]["details"]["field_errors"];
        assert!(fields.get("first_name").is_some());
        assert!(fields.get("last_name").is_some());
        assert!(fields.get("patient_id").is_some());
    }

    #[test]
    fn valid_values_pass_through_trimmed() {
        let mut v = FieldErrors::new();
        assert_eq!(v.require_str("name", Some("  Alice ")).as_deref(), Some("Alice"));
        assert!(v
            .require_uuid("id", Some("11111111-1111-1111-1111-111111111111"))
            .is_some());
        assert!(v.require_date("dob", Some("2010-04-01")).is_some());
        assert!(v.is_empty());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let mut v = FieldErrors::new();
        assert!(v
            .require_positive_amount("promised_amount", Some(Decimal::ZERO))
            .is_none());
        assert!(v.into_result().is_err());
    }
}
