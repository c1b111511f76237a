//! Query run and per-client result models.

use campaign_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `query_runs` table: one execution instance.
///
/// State machine: `pending -> running -> {completed | cancelled | error}`.
/// Restart is the only sanctioned exit from a terminal state.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueryRun {
    pub id: DbId,
    pub title: String,
    pub template_id: DbId,
    pub hubsoft_credential_id: DbId,
    pub db_credential_id: DbId,
    pub variable_values: serde_json::Value,
    pub status: String,
    pub total_rows: i32,
    pub total_enriched: i32,
    pub total_errors: i32,
    pub log: String,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

/// DTO for creating a new query run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQueryRun {
    pub title: String,
    pub template_id: DbId,
    pub hubsoft_credential_id: DbId,
    pub db_credential_id: DbId,
    pub variable_values: serde_json::Value,
}

/// A row from the `client_query_results` table: at most one per
/// (run, client) pairing. Re-processing the same pairing updates the row in
/// place, which is what makes a run safely restartable per item.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ClientQueryResult {
    pub id: DbId,
    pub run_id: DbId,
    pub client_id: DbId,
    pub source_row: Option<serde_json::Value>,
    pub api_response: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub queried_at: Timestamp,
}

/// DTO for upserting a per-client result.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertClientQueryResult {
    pub run_id: DbId,
    pub client_id: DbId,
    pub source_row: Option<serde_json::Value>,
    pub api_response: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

/// One joined row for the tabular results export: the client snapshot plus
/// the per-run outcome flags.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ResultExportRow {
    pub client_code: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub invoice_amount: Option<bigdecimal::BigDecimal>,
    pub invoice_due_date: Option<chrono::NaiveDate>,
    pub barcode: Option<String>,
    pub pix_code: Option<String>,
    pub invoice_link: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Progress snapshot returned to status pollers.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRunStatusView {
    pub id: DbId,
    pub status: String,
    pub total_rows: i32,
    pub total_enriched: i32,
    pub total_errors: i32,
    pub log: String,
    pub finished_at: Option<Timestamp>,
}

impl From<QueryRun> for QueryRunStatusView {
    fn from(run: QueryRun) -> Self {
        Self {
            id: run.id,
            status: run.status,
            total_rows: run.total_rows,
            total_enriched: run.total_enriched,
            total_errors: run.total_errors,
            log: run.log,
            finished_at: run.finished_at,
        }
    }
}
