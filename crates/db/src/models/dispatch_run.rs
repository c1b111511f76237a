//! Dispatch run and per-client dispatch item models.

use campaign_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `dispatch_runs` table: one messaging campaign over the
/// successful results of a completed query run.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DispatchRun {
    pub id: DbId,
    pub title: String,
    pub primary_template_id: DbId,
    pub fallback_template_id: Option<DbId>,
    /// HSM slot -> client field name, for the primary template.
    pub primary_mapping: serde_json::Value,
    /// HSM slot -> client field name, for the fallback template.
    pub fallback_mapping: serde_json::Value,
    pub matrix_config_id: DbId,
    pub query_run_id: DbId,
    pub status: String,
    pub total_clients: i32,
    pub total_sent: i32,
    pub total_errors: i32,
    pub total_pending: i32,
    pub log: String,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// DTO for creating a new dispatch run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDispatchRun {
    pub title: String,
    pub primary_template_id: DbId,
    pub fallback_template_id: Option<DbId>,
    pub primary_mapping: serde_json::Value,
    pub fallback_mapping: serde_json::Value,
    pub matrix_config_id: DbId,
    pub query_run_id: DbId,
}

/// A row from the `dispatch_results` table: at most one per
/// (dispatch run, client) pairing.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DispatchResult {
    pub id: DbId,
    pub dispatch_run_id: DbId,
    pub client_id: DbId,
    pub status: String,
    /// Which template variant was actually used: `primary` or `fallback`.
    pub template_used: String,
    pub variables_sent: serde_json::Value,
    pub api_response: Option<serde_json::Value>,
    pub error_detail: Option<String>,
    pub attempts: i32,
    pub sent_at: Option<Timestamp>,
}

/// Progress snapshot returned to status pollers.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRunStatusView {
    pub id: DbId,
    pub status: String,
    pub total_clients: i32,
    pub total_sent: i32,
    pub total_errors: i32,
    pub total_pending: i32,
    pub log: String,
    pub finished_at: Option<Timestamp>,
}

impl From<DispatchRun> for DispatchRunStatusView {
    fn from(run: DispatchRun) -> Self {
        Self {
            id: run.id,
            status: run.status,
            total_clients: run.total_clients,
            total_sent: run.total_sent,
            total_errors: run.total_errors,
            total_pending: run.total_pending,
            log: run.log,
            finished_at: run.finished_at,
        }
    }
}
