//! Synchronous input validation for the service surface.
//!
//! These checks run before any run row is created, so a bad request never
//! leaves a half-configured run behind.

use std::collections::BTreeMap;

use crate::error::CoreError;

/// Maximum length of a run or template title.
const MAX_TITLE_LEN: usize = 255;

/// Template variable kinds an operator can configure.
pub const VARIABLE_KINDS: &[&str] = &["text", "number", "date", "datetime", "select"];

/// Source database engines a credential may describe. Only `postgresql` is
/// executable by the query client; the rest are stored for inventory parity.
pub const DB_ENGINES: &[&str] = &["mysql", "postgresql", "sqlserver", "oracle"];

/// Validate a run/template title: non-empty after trimming, bounded length.
pub fn validate_title(title: &str) -> Result<(), CoreError> {
    if title.trim().is_empty() {
        return Err(CoreError::Validation(
            "Title must not be empty".to_string(),
        ));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(CoreError::Validation(format!(
            "Title must not exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a template variable kind string.
pub fn validate_variable_kind(kind: &str) -> Result<(), CoreError> {
    if VARIABLE_KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unknown variable kind: '{kind}'. Valid kinds: {}",
            VARIABLE_KINDS.join(", ")
        )))
    }
}

/// Validate a source database engine string.
pub fn validate_db_engine(engine: &str) -> Result<(), CoreError> {
    if DB_ENGINES.contains(&engine) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unknown database engine: '{engine}'. Valid engines: {}",
            DB_ENGINES.join(", ")
        )))
    }
}

/// Check that every required template variable was supplied a non-blank
/// value. Returns a single validation error naming all the gaps.
pub fn validate_required_variables(
    required: &[String],
    supplied: &BTreeMap<String, String>,
) -> Result<(), CoreError> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| {
            supplied
                .get(name.as_str())
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Missing required variables: {}",
            missing.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn supplied(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_title_rejected() {
        assert!(validate_title("").is_err());
        assert!(validate_title("   ").is_err());
        assert!(validate_title("September reminder wave").is_ok());
    }

    #[test]
    fn oversized_title_rejected() {
        assert!(validate_title(&"x".repeat(256)).is_err());
        assert!(validate_title(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn variable_kinds_validated() {
        assert!(validate_variable_kind("text").is_ok());
        assert!(validate_variable_kind("select").is_ok());
        assert!(validate_variable_kind("json").is_err());
    }

    #[test]
    fn db_engines_validated() {
        assert!(validate_db_engine("postgresql").is_ok());
        assert!(validate_db_engine("sqlite").is_err());
    }

    #[test]
    fn missing_required_variable_named_in_error() {
        let required = vec!["due_date".to_string(), "city".to_string()];
        let err = validate_required_variables(&required, &supplied(&[("due_date", "2026-09-01")]))
            .unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let required = vec!["city".to_string()];
        assert!(validate_required_variables(&required, &supplied(&[("city", "  ")])).is_err());
        assert!(validate_required_variables(&required, &supplied(&[("city", "SP")])).is_ok());
    }
}
