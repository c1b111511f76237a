//! Background worker: claims pending runs and launches their orchestrators.
//!
//! The service layer already spawns an orchestrator when it creates a query
//! run; the poll step here is the safety net that picks up runs whose task
//! died with the process, plus dispatch runs waiting to start.

use campaign_core::status;
use campaign_db::repositories::{ClientQueryResultRepo, DispatchRunRepo, QueryRunRepo};
use campaign_pipeline::{dispatch_run, query_run, PipelineContext, RunKind};

/// Maximum runs claimed per poll, per kind.
const CLAIM_LIMIT: i64 = 10;

/// One poll step: launch orchestrators for claimable runs. Returns how many
/// were launched. Runs with a live orchestrator are skipped via the
/// registry; dispatch runs stay queued until their source run is eligible.
pub async fn poll_once(ctx: &PipelineContext) -> Result<usize, sqlx::Error> {
    let mut launched = 0;

    for run in
        QueryRunRepo::list_by_status(&ctx.pool, status::RUN_STATUS_PENDING, CLAIM_LIMIT).await?
    {
        if ctx.registry.contains(RunKind::Query, run.id) {
            continue;
        }
        tracing::info!(run_id = run.id, title = %run.title, "Launching query run");
        let task_ctx = ctx.clone();
        tokio::spawn(async move {
            query_run::execute(&task_ctx, run.id).await;
        });
        launched += 1;
    }

    for run in
        DispatchRunRepo::list_by_status(&ctx.pool, status::DISPATCH_STATUS_PENDING, CLAIM_LIMIT)
            .await?
    {
        if ctx.registry.contains(RunKind::Dispatch, run.id) {
            continue;
        }
        if !dispatch_is_eligible(ctx, run.query_run_id).await? {
            tracing::debug!(
                dispatch_id = run.id,
                query_run_id = run.query_run_id,
                "Dispatch run waiting for an eligible source run"
            );
            continue;
        }
        tracing::info!(dispatch_id = run.id, title = %run.title, "Launching dispatch run");
        let task_ctx = ctx.clone();
        tokio::spawn(async move {
            dispatch_run::execute(&task_ctx, run.id).await;
        });
        launched += 1;
    }

    Ok(launched)
}

/// A dispatch run may start once its source query run completed with at
/// least one successful result.
async fn dispatch_is_eligible(
    ctx: &PipelineContext,
    query_run_id: i64,
) -> Result<bool, sqlx::Error> {
    let completed = QueryRunRepo::current_status(&ctx.pool, query_run_id)
        .await?
        .as_deref()
        == Some(status::RUN_STATUS_COMPLETED);
    if !completed {
        return Ok(false);
    }
    Ok(ClientQueryResultRepo::count_success(&ctx.pool, query_run_id).await? > 0)
}
