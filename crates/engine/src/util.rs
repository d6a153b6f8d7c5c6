//! Internal helpers for model validation and conversion.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation and mapping logic so the engine enforces consistent invariants.

use sea_orm::{DbErr, SqlErr};
use serde::{Serialize, de::DeserializeOwned};

use crate::{ConflictCode, EngineError, ResultEngine};

/// Longest accepted transaction or value id.
pub(crate) const MAX_ID_LEN: usize = 64;

/// Validate a caller-supplied id (the idempotency key of a request).
pub(crate) fn validate_id(value: &str, label: &str) -> ResultEngine<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{label} must not be empty")));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(EngineError::Validation(format!(
            "{label} must be at most {MAX_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Parse an optional JSON text column.
pub(crate) fn parse_json<T: DeserializeOwned>(value: Option<&str>) -> ResultEngine<Option<T>> {
    value
        .map(serde_json::from_str)
        .transpose()
        .map_err(EngineError::from)
}

/// Serialize an optional value into a JSON text column.
pub(crate) fn to_json_text<T: Serialize>(value: Option<&T>) -> ResultEngine<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(EngineError::from)
}

/// Turn a unique-key violation on insert into `code`; other errors pass through.
pub(crate) fn unique_violation_as(err: DbErr, code: ConflictCode, message: &str) -> EngineError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => EngineError::conflict(code, message),
        _ => EngineError::Database(err),
    }
}
