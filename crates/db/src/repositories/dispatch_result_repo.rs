//! Repository for the `dispatch_results` table.
//!
//! Items are bulk-created in `pending` status when a dispatch run starts,
//! then transitioned one at a time by the dispatch loop.

use campaign_core::status;
use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::dispatch_run::DispatchResult;

const COLUMNS: &str = "id, dispatch_run_id, client_id, status, template_used, variables_sent, \
     api_response, error_detail, attempts, sent_at";

/// Access to per-client dispatch items.
pub struct DispatchResultRepo;

impl DispatchResultRepo {
    /// Bulk-insert one pending item per client. Conflicting pairings (from a
    /// previous interrupted start) are left untouched, which makes starting
    /// a dispatch run re-entrant.
    pub async fn create_pending_batch(
        pool: &PgPool,
        dispatch_run_id: DbId,
        client_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if client_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO dispatch_results (dispatch_run_id, client_id) \
             SELECT $1, unnest($2::bigint[]) \
             ON CONFLICT (dispatch_run_id, client_id) DO NOTHING",
        )
        .bind(dispatch_run_id)
        .bind(client_ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List the pending items for a run in insertion order.
    pub async fn list_pending(
        pool: &PgPool,
        dispatch_run_id: DbId,
    ) -> Result<Vec<DispatchResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatch_results \
             WHERE dispatch_run_id = $1 AND status = $2 \
             ORDER BY id"
        );
        sqlx::query_as::<_, DispatchResult>(&query)
            .bind(dispatch_run_id)
            .bind(status::ITEM_STATUS_PENDING)
            .fetch_all(pool)
            .await
    }

    /// Mark an item as accepted by the provider.
    pub async fn mark_sent(
        pool: &PgPool,
        id: DbId,
        template_used: &str,
        variables_sent: &serde_json::Value,
        api_response: &serde_json::Value,
    ) -> Result<Option<DispatchResult>, sqlx::Error> {
        let query = format!(
            "UPDATE dispatch_results SET \
                status = $2, template_used = $3, variables_sent = $4, \
                api_response = $5, sent_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DispatchResult>(&query)
            .bind(id)
            .bind(status::ITEM_STATUS_SENT)
            .bind(template_used)
            .bind(variables_sent)
            .bind(api_response)
            .fetch_optional(pool)
            .await
    }

    /// Mark an item as failed, bumping its attempt counter and keeping any
    /// partial provider response for diagnosis.
    pub async fn mark_error(
        pool: &PgPool,
        id: DbId,
        template_used: &str,
        variables_sent: &serde_json::Value,
        error_detail: &str,
        api_response: Option<&serde_json::Value>,
    ) -> Result<Option<DispatchResult>, sqlx::Error> {
        let query = format!(
            "UPDATE dispatch_results SET \
                status = $2, template_used = $3, variables_sent = $4, \
                error_detail = $5, api_response = COALESCE($6, api_response), \
                attempts = attempts + 1, sent_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DispatchResult>(&query)
            .bind(id)
            .bind(status::ITEM_STATUS_ERROR)
            .bind(template_used)
            .bind(variables_sent)
            .bind(error_detail)
            .bind(api_response)
            .fetch_optional(pool)
            .await
    }

    /// Mark every still-pending item of a run as cancelled. Called when the
    /// dispatch loop observes a cancellation.
    pub async fn cancel_pending(pool: &PgPool, dispatch_run_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE dispatch_results SET status = $2 \
             WHERE dispatch_run_id = $1 AND status = $3",
        )
        .bind(dispatch_run_id)
        .bind(status::ITEM_STATUS_CANCELLED)
        .bind(status::ITEM_STATUS_PENDING)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List all items for a run in insertion order.
    pub async fn list_by_run(
        pool: &PgPool,
        dispatch_run_id: DbId,
    ) -> Result<Vec<DispatchResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatch_results \
             WHERE dispatch_run_id = $1 \
             ORDER BY id"
        );
        sqlx::query_as::<_, DispatchResult>(&query)
            .bind(dispatch_run_id)
            .fetch_all(pool)
            .await
    }

    /// Count items by status for a run.
    pub async fn count_by_status(
        pool: &PgPool,
        dispatch_run_id: DbId,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM dispatch_results \
             WHERE dispatch_run_id = $1 \
             GROUP BY status \
             ORDER BY status",
        )
        .bind(dispatch_run_id)
        .fetch_all(pool)
        .await
    }
}
