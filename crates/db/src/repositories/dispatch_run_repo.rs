//! Repository for the `dispatch_runs` table.

use campaign_core::status;
use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::dispatch_run::{CreateDispatchRun, DispatchRun};

const COLUMNS: &str = "id, title, primary_template_id, fallback_template_id, primary_mapping, \
     fallback_mapping, matrix_config_id, query_run_id, status, total_clients, total_sent, \
     total_errors, total_pending, log, created_at, started_at, finished_at";

/// CRUD and progress bookkeeping for dispatch runs.
pub struct DispatchRunRepo;

impl DispatchRunRepo {
    /// Insert a new dispatch run in `pending` status.
    pub async fn create(pool: &PgPool, input: &CreateDispatchRun) -> Result<DispatchRun, sqlx::Error> {
        let query = format!(
            "INSERT INTO dispatch_runs \
                (title, primary_template_id, fallback_template_id, primary_mapping, \
                 fallback_mapping, matrix_config_id, query_run_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DispatchRun>(&query)
            .bind(&input.title)
            .bind(input.primary_template_id)
            .bind(input.fallback_template_id)
            .bind(&input.primary_mapping)
            .bind(&input.fallback_mapping)
            .bind(input.matrix_config_id)
            .bind(input.query_run_id)
            .fetch_one(pool)
            .await
    }

    /// Find a dispatch run by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<DispatchRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM dispatch_runs WHERE id = $1");
        sqlx::query_as::<_, DispatchRun>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Re-read just the persisted status (cooperative cancellation poll).
    pub async fn current_status(pool: &PgPool, id: DbId) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM dispatch_runs WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(s,)| s))
    }

    /// List dispatch runs in a given status, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        run_status: &str,
        limit: i64,
    ) -> Result<Vec<DispatchRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatch_runs \
             WHERE status = $1 \
             ORDER BY created_at \
             LIMIT $2"
        );
        sqlx::query_as::<_, DispatchRun>(&query)
            .bind(run_status)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// The most recent dispatch run for a query run, if any. Used to clone
    /// template and mapping configuration into a new run.
    pub async fn latest_for_query_run(
        pool: &PgPool,
        query_run_id: DbId,
    ) -> Result<Option<DispatchRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatch_runs \
             WHERE query_run_id = $1 \
             ORDER BY created_at DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, DispatchRun>(&query)
            .bind(query_run_id)
            .fetch_optional(pool)
            .await
    }

    /// Update the status, appending to the log. The start timestamp is set
    /// only the first time the run enters `sending` (idempotent); the end
    /// timestamp is stamped whenever the new status is terminal.
    pub async fn update_status(
        pool: &PgPool,
        id: DbId,
        run_status: &str,
        log_line: Option<&str>,
    ) -> Result<Option<DispatchRun>, sqlx::Error> {
        let starting = run_status == status::DISPATCH_STATUS_SENDING;
        let terminal = status::dispatch_is_terminal(run_status);
        let query = format!(
            "UPDATE dispatch_runs SET \
                status = $2, \
                log = CASE WHEN $3::text IS NULL THEN log ELSE log || $3 || E'\\n' END, \
                started_at = CASE WHEN $4 AND started_at IS NULL THEN NOW() ELSE started_at END, \
                finished_at = CASE WHEN $5 THEN NOW() ELSE finished_at END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DispatchRun>(&query)
            .bind(id)
            .bind(run_status)
            .bind(log_line)
            .bind(starting)
            .bind(terminal)
            .fetch_optional(pool)
            .await
    }

    /// Record the number of clients queued when the items are bulk-created.
    pub async fn set_totals_on_start(
        pool: &PgPool,
        id: DbId,
        total_clients: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE dispatch_runs SET total_clients = $2, total_pending = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(total_clients)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Flush the aggregate counters and the log buffer.
    pub async fn flush_progress(
        pool: &PgPool,
        id: DbId,
        total_sent: i32,
        total_errors: i32,
        total_pending: i32,
        log: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE dispatch_runs SET \
                total_sent = $2, total_errors = $3, total_pending = $4, log = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(total_sent)
        .bind(total_errors)
        .bind(total_pending)
        .bind(log)
        .execute(pool)
        .await?;
        Ok(())
    }
}
