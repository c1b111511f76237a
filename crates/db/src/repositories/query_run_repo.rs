//! Repository for the `query_runs` table.

use campaign_core::status;
use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::query_run::{CreateQueryRun, QueryRun};

const COLUMNS: &str = "id, title, template_id, hubsoft_credential_id, db_credential_id, \
     variable_values, status, total_rows, total_enriched, total_errors, log, \
     started_at, finished_at";

/// CRUD and progress bookkeeping for query runs.
pub struct QueryRunRepo;

impl QueryRunRepo {
    /// Insert a new run in `pending` status.
    pub async fn create(pool: &PgPool, input: &CreateQueryRun) -> Result<QueryRun, sqlx::Error> {
        let query = format!(
            "INSERT INTO query_runs \
                (title, template_id, hubsoft_credential_id, db_credential_id, variable_values) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueryRun>(&query)
            .bind(&input.title)
            .bind(input.template_id)
            .bind(input.hubsoft_credential_id)
            .bind(input.db_credential_id)
            .bind(&input.variable_values)
            .fetch_one(pool)
            .await
    }

    /// Find a run by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<QueryRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM query_runs WHERE id = $1");
        sqlx::query_as::<_, QueryRun>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Re-read just the persisted status. The orchestrator polls this once
    /// per item for cooperative cancellation.
    pub async fn current_status(pool: &PgPool, id: DbId) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM query_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|(status,)| status))
    }

    /// List runs in a given status, oldest first (worker claim order).
    pub async fn list_by_status(
        pool: &PgPool,
        run_status: &str,
        limit: i64,
    ) -> Result<Vec<QueryRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM query_runs \
             WHERE status = $1 \
             ORDER BY started_at \
             LIMIT $2"
        );
        sqlx::query_as::<_, QueryRun>(&query)
            .bind(run_status)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Update the status, appending to the log and stamping finished_at when
    /// the new status is terminal.
    pub async fn update_status(
        pool: &PgPool,
        id: DbId,
        run_status: &str,
        log_line: Option<&str>,
    ) -> Result<Option<QueryRun>, sqlx::Error> {
        let terminal = status::is_terminal(run_status);
        let query = format!(
            "UPDATE query_runs SET \
                status = $2, \
                log = CASE WHEN $3::text IS NULL THEN log ELSE log || $3 || E'\\n' END, \
                finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueryRun>(&query)
            .bind(id)
            .bind(run_status)
            .bind(log_line)
            .bind(terminal)
            .fetch_optional(pool)
            .await
    }

    /// Record the source row count once the SQL has executed.
    pub async fn set_total_rows(pool: &PgPool, id: DbId, total: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE query_runs SET total_rows = $2 WHERE id = $1")
            .bind(id)
            .bind(total)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Flush the running counters and the full log buffer. Called every few
    /// items, not per item; the log column is replaced wholesale because the
    /// orchestrator owns the authoritative buffer in memory.
    pub async fn flush_progress(
        pool: &PgPool,
        id: DbId,
        total_enriched: i32,
        total_errors: i32,
        log: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE query_runs SET \
                total_enriched = $2, total_errors = $3, log = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(total_enriched)
        .bind(total_errors)
        .bind(log)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Reset a terminal run back to `pending` for a restart: counters to
    /// zero, log cleared, finish time dropped, start time renewed. The
    /// caller is responsible for deleting the run's detail rows first.
    pub async fn reset_for_restart(pool: &PgPool, id: DbId) -> Result<Option<QueryRun>, sqlx::Error> {
        let query = format!(
            "UPDATE query_runs SET \
                status = $2, \
                total_rows = 0, total_enriched = 0, total_errors = 0, \
                log = '', \
                started_at = NOW(), finished_at = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueryRun>(&query)
            .bind(id)
            .bind(status::RUN_STATUS_PENDING)
            .fetch_optional(pool)
            .await
    }
}
