//! SQL query template models and DTOs.

use campaign_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `query_templates` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueryTemplate {
    pub id: DbId,
    pub title: String,
    pub description: Option<String>,
    pub sql_text: String,
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `template_variables` table.
///
/// Variable names are unique per template; removed variables are
/// deactivated, never deleted, so their configuration survives a
/// placeholder being restored to the SQL text.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TemplateVariable {
    pub id: DbId,
    pub template_id: DbId,
    pub name: String,
    pub label: String,
    pub kind: String,
    pub required: bool,
    pub default_value: String,
    pub options: String,
    pub position: i32,
    pub active: bool,
}

impl TemplateVariable {
    /// The `options` column stores one entry per line for `select` kinds.
    pub fn options_list(&self) -> Vec<String> {
        self.options
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }
}

/// DTO for creating a new query template.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQueryTemplate {
    pub title: String,
    pub description: Option<String>,
    pub sql_text: String,
}

/// DTO for creating a new template variable.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateVariable {
    pub template_id: DbId,
    pub name: String,
    pub label: String,
    pub kind: String,
    pub required: bool,
    pub default_value: String,
    pub options: String,
    pub position: i32,
}
