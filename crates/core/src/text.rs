//! Text and date normalization helpers shared by the processors.

use chrono::{NaiveDate, NaiveDateTime};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Brazilian short date format used by the enrichment API and HSM slots.
pub const BR_DATE_FORMAT: &str = "%d/%m/%Y";

/// Brazilian date-time format used for HSM slots.
pub const BR_DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Normalize a display name: strip diacritics (NFD decomposition, combining
/// marks dropped) and uppercase the rest.
pub fn normalize_name(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_uppercase()
}

/// Parse a `DD/MM/YYYY` date as delivered by the enrichment API.
/// Returns `None` for empty or malformed input; the caller records the item
/// without a due date rather than failing it.
pub fn br_date_to_iso(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(raw, BR_DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::warn!(value = %raw, "Unparseable due date: {e}");
            None
        }
    }
}

/// Format a date back into the `DD/MM/YYYY` form HSM slots expect.
pub fn format_br_date(date: NaiveDate) -> String {
    date.format(BR_DATE_FORMAT).to_string()
}

/// Format a date-time into the `DD/MM/YYYY HH:MM` form HSM slots expect.
pub fn format_br_datetime(dt: NaiveDateTime) -> String {
    dt.format(BR_DATETIME_FORMAT).to_string()
}

/// Render a JSON value as the string form sent to the messaging provider.
/// Null becomes the empty string, strings pass through unquoted, everything
/// else uses its JSON text form.
pub fn json_to_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten a JSON object into a name -> display-string map. Values pass
/// through [`json_to_display`]; non-object input yields an empty map.
pub fn json_object_to_map(
    value: &serde_json::Value,
) -> std::collections::BTreeMap<String, String> {
    match value {
        serde_json::Value::Object(entries) => entries
            .iter()
            .map(|(name, v)| (name.clone(), json_to_display(v)))
            .collect(),
        _ => std::collections::BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
