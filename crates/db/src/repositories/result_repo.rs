//! Repository for the `client_query_results` table.
//!
//! One row per (run, client) pairing, maintained by upsert so re-entrant
//! processing after a crash or restart updates instead of duplicating.

use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::client::ConsultedClient;
use crate::models::query_run::{ClientQueryResult, ResultExportRow, UpsertClientQueryResult};

const COLUMNS: &str =
    "id, run_id, client_id, source_row, api_response, success, error, queried_at";

const CLIENT_COLUMNS: &str = "c.id, c.client_code, c.display_name, c.phone, c.invoice_id, \
     c.invoice_due_date, c.invoice_amount, c.pix_code, c.barcode, c.invoice_link, \
     c.db_credential_id, c.created_at, c.updated_at";

/// Upsert-oriented access to per-client query results.
pub struct ClientQueryResultRepo;

impl ClientQueryResultRepo {
    /// Upsert the result for one (run, client) pairing.
    pub async fn upsert(
        pool: &PgPool,
        input: &UpsertClientQueryResult,
    ) -> Result<ClientQueryResult, sqlx::Error> {
        let query = format!(
            "INSERT INTO client_query_results \
                (run_id, client_id, source_row, api_response, success, error) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (run_id, client_id) DO UPDATE SET \
                source_row = EXCLUDED.source_row, \
                api_response = EXCLUDED.api_response, \
                success = EXCLUDED.success, \
                error = EXCLUDED.error, \
                queried_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ClientQueryResult>(&query)
            .bind(input.run_id)
            .bind(input.client_id)
            .bind(&input.source_row)
            .bind(&input.api_response)
            .bind(input.success)
            .bind(&input.error)
            .fetch_one(pool)
            .await
    }

    /// List all results for a run, newest first.
    pub async fn list_by_run(
        pool: &PgPool,
        run_id: DbId,
    ) -> Result<Vec<ClientQueryResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM client_query_results \
             WHERE run_id = $1 \
             ORDER BY queried_at DESC"
        );
        sqlx::query_as::<_, ClientQueryResult>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }

    /// Count successful results for a run.
    pub async fn count_success(pool: &PgPool, run_id: DbId) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM client_query_results WHERE run_id = $1 AND success",
        )
        .bind(run_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Clients behind the successful results of a run, in result order.
    /// This is the input set for a messaging dispatch run.
    pub async fn successful_clients(
        pool: &PgPool,
        run_id: DbId,
    ) -> Result<Vec<ConsultedClient>, sqlx::Error> {
        let query = format!(
            "SELECT {CLIENT_COLUMNS} FROM client_query_results r \
             JOIN consulted_clients c ON c.id = r.client_id \
             WHERE r.run_id = $1 AND r.success \
             ORDER BY r.id"
        );
        sqlx::query_as::<_, ConsultedClient>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }

    /// Joined rows for the tabular export, optionally including failures.
    pub async fn export_rows(
        pool: &PgPool,
        run_id: DbId,
        include_errors: bool,
    ) -> Result<Vec<ResultExportRow>, sqlx::Error> {
        let query = "SELECT c.client_code, c.display_name, c.phone, c.invoice_amount, \
                c.invoice_due_date, c.barcode, c.pix_code, c.invoice_link, \
                r.success, r.error \
             FROM client_query_results r \
             JOIN consulted_clients c ON c.id = r.client_id \
             WHERE r.run_id = $1 AND (r.success OR $2) \
             ORDER BY r.id";
        sqlx::query_as::<_, ResultExportRow>(query)
            .bind(run_id)
            .bind(include_errors)
            .fetch_all(pool)
            .await
    }

    /// Delete every result row for a run. Used by restart, which clears the
    /// detail rows before resetting the run itself.
    pub async fn delete_by_run(pool: &PgPool, run_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM client_query_results WHERE run_id = $1")
            .bind(run_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
