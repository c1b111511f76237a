//! The query run orchestrator: source SQL -> per-client enrichment loop.

use campaign_core::status;
use campaign_core::template;
use campaign_core::text::json_object_to_map;
use campaign_core::types::DbId;
use campaign_db::repositories::{
    DbCredentialRepo, HubsoftCredentialRepo, QueryRunRepo, QueryTemplateRepo,
};
use campaign_hubsoft::HubsoftClient;
use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::processor;
use crate::registry::RunKind;
use crate::source;

/// Append one line to the in-memory log buffer. The buffer is the
/// authoritative log; checkpoints write it to the run row wholesale.
fn log_line(buffer: &mut String, line: impl AsRef<str>) {
    buffer.push_str(line.as_ref());
    buffer.push('\n');
}

/// True when the run should stop: the registry token fired, or an external
/// actor persisted `cancelled` directly (worker restart path).
async fn cancel_requested(
    ctx: &PipelineContext,
    run_id: DbId,
    token: &CancellationToken,
) -> Result<bool, sqlx::Error> {
    if token.is_cancelled() {
        return Ok(true);
    }
    let persisted = QueryRunRepo::current_status(&ctx.pool, run_id).await?;
    Ok(persisted.as_deref() == Some(status::RUN_STATUS_CANCELLED))
}

/// Drive a query run to a terminal state. Never returns an error: any
/// failure that escapes the loop is recorded on the run row.
pub async fn execute(ctx: &PipelineContext, run_id: DbId) {
    let token = ctx.registry.register(RunKind::Query, run_id);
    if let Err(e) = run_loop(ctx, run_id, &token).await {
        tracing::error!(run_id, "Query run aborted: {e}");
        let line = format!("Run aborted: {e}");
        if let Err(db) =
            QueryRunRepo::update_status(&ctx.pool, run_id, status::RUN_STATUS_ERROR, Some(&line))
                .await
        {
            tracing::error!(run_id, "Could not record run failure: {db}");
        }
    }
    ctx.registry.deregister(RunKind::Query, run_id);
}

async fn run_loop(
    ctx: &PipelineContext,
    run_id: DbId,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    let run = QueryRunRepo::find_by_id(&ctx.pool, run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: run_id,
        })?;
    let query_template = QueryTemplateRepo::find_by_id(&ctx.pool, run.template_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_template",
            id: run.template_id,
        })?;
    let db_credential = DbCredentialRepo::find_by_id(&ctx.pool, run.db_credential_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "db_credential",
            id: run.db_credential_id,
        })?;
    let hubsoft_credential =
        HubsoftCredentialRepo::find_by_id(&ctx.pool, run.hubsoft_credential_id)
            .await?
            .ok_or(PipelineError::NotFound {
                entity: "hubsoft_credential",
                id: run.hubsoft_credential_id,
            })?;

    QueryRunRepo::update_status(&ctx.pool, run_id, status::RUN_STATUS_RUNNING, None).await?;
    tracing::info!(run_id, title = %run.title, "Query run started");

    let mut log = String::new();
    log_line(&mut log, format!("Run started: {}", run.title));

    // Substitute template variables; unresolved placeholders are a warning,
    // the database will reject the statement if they actually matter.
    let values = json_object_to_map(&run.variable_values);
    let sql = template::substitute(&query_template.sql_text, &values);
    for name in template::leftover_placeholders(&sql) {
        tracing::warn!(run_id, variable = %name, "Unresolved placeholder in SQL");
        log_line(&mut log, format!("Warning: unresolved placeholder '{{{{{name}}}}}'"));
    }

    let rows = source::fetch_rows(&db_credential, &sql).await?;
    if rows.is_empty() {
        tracing::warn!(run_id, "Source query returned no rows");
        log_line(&mut log, "Source query returned no rows");
        QueryRunRepo::flush_progress(&ctx.pool, run_id, 0, 0, &log).await?;
        QueryRunRepo::update_status(
            &ctx.pool,
            run_id,
            status::RUN_STATUS_ERROR,
            Some("Run aborted: source query returned no rows"),
        )
        .await?;
        return Ok(());
    }

    let total = rows.len();
    QueryRunRepo::set_total_rows(&ctx.pool, run_id, total as i32).await?;
    log_line(&mut log, format!("Source rows: {total}"));

    let duplicates = count_duplicate_codes(&rows);
    if duplicates > 0 {
        tracing::warn!(run_id, duplicates, "Duplicate client codes in source rows");
        log_line(
            &mut log,
            format!("Warning: {duplicates} duplicate client code(s); later rows overwrite earlier results"),
        );
    }

    // Authenticate up front so a bad credential fails the run before any
    // item is touched.
    let mut hubsoft = HubsoftClient::new(hubsoft_credential)?;
    hubsoft.ensure_token().await?;

    let mut enriched: i32 = 0;
    let mut errors: i32 = 0;

    for (index, row) in rows.iter().enumerate() {
        if cancel_requested(ctx, run_id, token).await? {
            log_line(&mut log, format!("Cancelled after {index} of {total} rows"));
            QueryRunRepo::flush_progress(&ctx.pool, run_id, enriched, errors, &log).await?;
            QueryRunRepo::update_status(
                &ctx.pool,
                run_id,
                status::RUN_STATUS_CANCELLED,
                Some(&format!(
                    "Run cancelled: {enriched} enriched, {errors} errors, {} rows unprocessed",
                    total - index
                )),
            )
            .await?;
            tracing::info!(run_id, processed = index, "Query run cancelled");
            return Ok(());
        }

        let outcome = processor::process_record(&ctx.pool, &mut hubsoft, &run, row).await?;
        if outcome.success {
            enriched += 1;
        } else {
            errors += 1;
        }
        log_line(
            &mut log,
            format!(
                "[{}/{total}] {}: {}",
                index + 1,
                outcome.client_code,
                outcome.message
            ),
        );

        if (index + 1) % ctx.query_flush_every as usize == 0 {
            QueryRunRepo::flush_progress(&ctx.pool, run_id, enriched, errors, &log).await?;
            tracing::debug!(run_id, enriched, errors, "Progress checkpoint");
        }
        if index + 1 < total && !ctx.item_delay.is_zero() {
            tokio::time::sleep(ctx.item_delay).await;
        }
    }

    QueryRunRepo::flush_progress(&ctx.pool, run_id, enriched, errors, &log).await?;
    QueryRunRepo::update_status(
        &ctx.pool,
        run_id,
        status::RUN_STATUS_COMPLETED,
        Some(&format!(
            "Run completed: {enriched} enriched, {errors} errors of {total} rows"
        )),
    )
    .await?;
    tracing::info!(run_id, enriched, errors, total, "Query run completed");
    Ok(())
}

/// Number of source rows whose client code already appeared earlier.
fn count_duplicate_codes(rows: &[source::SourceRow]) -> usize {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .map(|row| processor::row_field(row, "codigo_cliente"))
        .filter(|code| !code.is_empty() && !seen.insert(code.clone()))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(code: &str) -> source::SourceRow {
        json!({"codigo_cliente": code}).as_object().cloned().unwrap()
    }

    #[test]
    fn duplicate_codes_counted_once_per_extra_row() {
        let rows = vec![row("1"), row("2"), row("1"), row("1"), row("3")];
        assert_eq!(count_duplicate_codes(&rows), 2);
    }

    #[test]
    fn blank_codes_not_counted_as_duplicates() {
        let rows = vec![row(""), row(""), row("1")];
        assert_eq!(count_duplicate_codes(&rows), 0);
    }

    #[test]
    fn log_buffer_accumulates_lines() {
        let mut buffer = String::new();
        log_line(&mut buffer, "a");
        log_line(&mut buffer, "b");
        assert_eq!(buffer, "a\nb\n");
    }
}
