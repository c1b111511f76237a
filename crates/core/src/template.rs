//! SQL template engine: `{{variable}}` extraction and substitution.
//!
//! Placeholders are `{{name}}` where `name` starts with a letter or
//! underscore and continues with letters, digits, underscores, or hyphens.
//! Whitespace inside the braces is tolerated (`{{ name }}`) and matching is
//! case-insensitive throughout.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

/// Matches one placeholder and captures its identifier.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*\}\}").expect("hard-coded regex is valid")
});

/// Matches anything brace-wrapped, including malformed names, for the
/// leftover scan after substitution.
static ANY_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([^}]+)\}\}").expect("hard-coded regex is valid")
});

/// Extract all placeholder names from a SQL text.
///
/// Returns a sorted, duplicate-free list. Empty input yields an empty list.
pub fn extract_variables(sql: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for caps in PLACEHOLDER.captures_iter(sql) {
        if let Some(m) = caps.get(1) {
            let name = m.as_str().trim();
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
    }
    names.into_iter().collect()
}

/// Substitute placeholder values into a SQL text.
///
/// Every occurrence of each supplied name is replaced, in both the exact
/// (`{{name}}`) and whitespace-padded (`{{ name }}`) forms. Names absent
/// from `values` are left in the output as literal placeholders so callers
/// can detect them with [`leftover_placeholders`]. A supplied value that
/// matches zero occurrences is logged, not an error.
pub fn substitute(sql: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = sql.to_string();
    for (name, value) in values {
        let pattern = format!(r"(?i)\{{\{{\s*{}\s*\}}\}}", regex::escape(name));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(variable = %name, "Skipping unsubstitutable variable: {e}");
                continue;
            }
        };
        let count = re.find_iter(&out).count();
        if count == 0 {
            tracing::warn!(variable = %name, "Variable not found in SQL text, nothing substituted");
            continue;
        }
        // NoExpand: values are literal text, `$` must never be treated as a
        // capture-group reference.
        out = re
            .replace_all(&out, regex::NoExpand(value.as_str()))
            .into_owned();
        tracing::debug!(variable = %name, occurrences = count, "Substituted template variable");
    }
    out
}

/// Scan a (typically already substituted) SQL text for remaining
/// placeholders. Returns the trimmed inner names in order of appearance.
pub fn leftover_placeholders(sql: &str) -> Vec<String> {
    ANY_PLACEHOLDER
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Derive a human-readable label from a variable name:
/// `due_date` becomes `Due Date`.
pub fn default_label(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reconciliation plan between the placeholders found in a SQL text and the
/// variable definitions already stored for the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    /// Names present in the SQL with no stored definition yet.
    pub create: Vec<String>,
    /// Stored, active definitions whose name no longer appears in the SQL.
    pub deactivate: Vec<String>,
    /// Stored, inactive definitions whose name reappeared in the SQL.
    pub reactivate: Vec<String>,
}

impl SyncPlan {
    /// True when the plan would change nothing.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.deactivate.is_empty() && self.reactivate.is_empty()
    }
}

/// Compute the reconciliation between SQL placeholders and stored variable
/// definitions. `existing` pairs each stored name with its active flag.
/// The plan never deletes: removed variables are deactivated so their
/// configuration survives a placeholder being restored later.
pub fn sync_plan(sql_vars: &[String], existing: &[(String, bool)]) -> SyncPlan {
    let sql_set: BTreeSet<&str> = sql_vars.iter().map(String::as_str).collect();
    let existing_set: BTreeSet<&str> = existing.iter().map(|(n, _)| n.as_str()).collect();

    let create = sql_set
        .iter()
        .filter(|name| !existing_set.contains(*name))
        .map(|name| (*name).to_string())
        .collect();

    let deactivate = existing
        .iter()
        .filter(|(name, active)| *active && !sql_set.contains(name.as_str()))
        .map(|(name, _)| name.clone())
        .collect();

    let reactivate = existing
        .iter()
        .filter(|(name, active)| !*active && sql_set.contains(name.as_str()))
        .map(|(name, _)| name.clone())
        .collect();

    SyncPlan {
        create,
        deactivate,
        reactivate,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
