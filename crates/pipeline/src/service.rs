//! Operations consumed by presentation layers (admin tooling, schedulers).
//!
//! Everything validates synchronously and returns quickly; the long-running
//! work happens in detached orchestrator tasks.

use campaign_core::dispatch::FIELD_KEYS;
use campaign_core::template::{self, SyncPlan};
use campaign_core::text::json_object_to_map;
use campaign_core::types::DbId;
use campaign_core::{status, validate};
use campaign_db::models::dispatch_run::{CreateDispatchRun, DispatchRunStatusView};
use campaign_db::models::query_run::{CreateQueryRun, QueryRunStatusView, ResultExportRow};
use campaign_db::repositories::{
    ClientQueryResultRepo, DbCredentialRepo, DispatchResultRepo, DispatchRunRepo,
    HsmTemplateRepo, HubsoftCredentialRepo, MatrixConfigRepo, QueryRunRepo, QueryTemplateRepo,
};
use serde_json::Value;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::registry::RunKind;
use crate::{dispatch_run, query_run};

// ---------------------------------------------------------------------------
// Query runs
// ---------------------------------------------------------------------------

/// Validate and create a query run, then launch its orchestrator as a
/// detached task. Returns the new run's ID immediately.
pub async fn create_query_run(
    ctx: &PipelineContext,
    input: CreateQueryRun,
) -> Result<DbId, PipelineError> {
    validate::validate_title(&input.title)?;

    let query_template = QueryTemplateRepo::find_by_id(&ctx.pool, input.template_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_template",
            id: input.template_id,
        })?;
    if !query_template.active {
        return Err(PipelineError::Ineligible(format!(
            "Query template {} is inactive",
            query_template.id
        )));
    }
    DbCredentialRepo::find_by_id(&ctx.pool, input.db_credential_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "db_credential",
            id: input.db_credential_id,
        })?;
    HubsoftCredentialRepo::find_by_id(&ctx.pool, input.hubsoft_credential_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "hubsoft_credential",
            id: input.hubsoft_credential_id,
        })?;

    let required: Vec<String> =
        QueryTemplateRepo::list_active_variables(&ctx.pool, query_template.id)
            .await?
            .into_iter()
            .filter(|variable| variable.required)
            .map(|variable| variable.name)
            .collect();
    let supplied = json_object_to_map(&input.variable_values);
    validate::validate_required_variables(&required, &supplied)?;

    let run = QueryRunRepo::create(&ctx.pool, &input).await?;
    tracing::info!(run_id = run.id, title = %run.title, "Query run created");

    let task_ctx = ctx.clone();
    let run_id = run.id;
    tokio::spawn(async move {
        query_run::execute(&task_ctx, run_id).await;
    });

    Ok(run.id)
}

/// Progress snapshot for pollers.
pub async fn run_status(
    ctx: &PipelineContext,
    run_id: DbId,
) -> Result<QueryRunStatusView, PipelineError> {
    let run = QueryRunRepo::find_by_id(&ctx.pool, run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: run_id,
        })?;
    Ok(run.into())
}

/// Request cancellation of a pending or running query run. The persisted
/// status flips immediately; the loop observes it (or the token) and stops
/// before its next item.
pub async fn cancel_query_run(ctx: &PipelineContext, run_id: DbId) -> Result<(), PipelineError> {
    let run = QueryRunRepo::find_by_id(&ctx.pool, run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: run_id,
        })?;
    if !status::can_cancel(&run.status) {
        return Err(PipelineError::Ineligible(format!(
            "Query run {run_id} is '{}', only pending or running runs can be cancelled",
            run.status
        )));
    }

    QueryRunRepo::update_status(
        &ctx.pool,
        run_id,
        status::RUN_STATUS_CANCELLED,
        Some("Cancellation requested"),
    )
    .await?;
    ctx.registry.cancel(RunKind::Query, run_id);
    tracing::info!(run_id, "Query run cancellation requested");
    Ok(())
}

/// Restart a terminal query run in place: drop its result rows, zero the
/// counters, clear the log, and relaunch from pending.
pub async fn restart_query_run(ctx: &PipelineContext, run_id: DbId) -> Result<(), PipelineError> {
    let run = QueryRunRepo::find_by_id(&ctx.pool, run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: run_id,
        })?;
    if !status::can_restart(&run.status) {
        return Err(PipelineError::Ineligible(format!(
            "Query run {run_id} is '{}', only finished runs can be restarted",
            run.status
        )));
    }

    let deleted = ClientQueryResultRepo::delete_by_run(&ctx.pool, run_id).await?;
    QueryRunRepo::reset_for_restart(&ctx.pool, run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: run_id,
        })?;
    tracing::info!(run_id, deleted, "Query run reset for restart");

    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        query_run::execute(&task_ctx, run_id).await;
    });
    Ok(())
}

/// Tabular export of a run's results, optionally including failed items.
pub async fn export_results(
    ctx: &PipelineContext,
    run_id: DbId,
    include_errors: bool,
) -> Result<Vec<ResultExportRow>, PipelineError> {
    QueryRunRepo::find_by_id(&ctx.pool, run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: run_id,
        })?;
    Ok(ClientQueryResultRepo::export_rows(&ctx.pool, run_id, include_errors).await?)
}

// ---------------------------------------------------------------------------
// Dispatch runs
// ---------------------------------------------------------------------------

/// Reject mappings that reference field names the client snapshot does not
/// expose; a typo here would silently send blank variables.
fn validate_mapping(label: &str, mapping: &Value) -> Result<(), PipelineError> {
    for (slot, field) in json_object_to_map(mapping) {
        if !FIELD_KEYS.contains(&field.as_str()) {
            return Err(PipelineError::Validation(format!(
                "{label} mapping slot '{slot}' references unknown field '{field}'. Valid fields: {}",
                FIELD_KEYS.join(", ")
            )));
        }
    }
    Ok(())
}

/// Validate and create a dispatch run in `pending` status. The worker (or
/// [`start_dispatch_run`]) launches it.
pub async fn create_dispatch_run(
    ctx: &PipelineContext,
    input: CreateDispatchRun,
) -> Result<DbId, PipelineError> {
    validate::validate_title(&input.title)?;
    validate_mapping("primary", &input.primary_mapping)?;
    validate_mapping("fallback", &input.fallback_mapping)?;

    let query_run = QueryRunRepo::find_by_id(&ctx.pool, input.query_run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: input.query_run_id,
        })?;
    if query_run.status != status::RUN_STATUS_COMPLETED {
        return Err(PipelineError::Ineligible(format!(
            "Query run {} is '{}', only completed runs can be dispatched",
            query_run.id, query_run.status
        )));
    }
    if ClientQueryResultRepo::count_success(&ctx.pool, query_run.id).await? == 0 {
        return Err(PipelineError::Ineligible(format!(
            "Query run {} has no successful results to dispatch",
            query_run.id
        )));
    }

    HsmTemplateRepo::find_by_id(&ctx.pool, input.primary_template_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "hsm_template",
            id: input.primary_template_id,
        })?;
    if let Some(id) = input.fallback_template_id {
        HsmTemplateRepo::find_by_id(&ctx.pool, id)
            .await?
            .ok_or(PipelineError::NotFound {
                entity: "hsm_template",
                id,
            })?;
    }
    MatrixConfigRepo::find_by_id(&ctx.pool, input.matrix_config_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "matrix_api_config",
            id: input.matrix_config_id,
        })?;

    let run = DispatchRunRepo::create(&ctx.pool, &input).await?;
    tracing::info!(dispatch_id = run.id, title = %run.title, "Dispatch run created");
    Ok(run.id)
}

/// Create a dispatch run reusing the template and mapping configuration of
/// the most recent dispatch run for the same query run.
pub async fn create_dispatch_run_from_last(
    ctx: &PipelineContext,
    query_run_id: DbId,
    title: String,
) -> Result<DbId, PipelineError> {
    let previous = DispatchRunRepo::latest_for_query_run(&ctx.pool, query_run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "dispatch_run",
            id: query_run_id,
        })?;
    create_dispatch_run(
        ctx,
        CreateDispatchRun {
            title,
            primary_template_id: previous.primary_template_id,
            fallback_template_id: previous.fallback_template_id,
            primary_mapping: previous.primary_mapping,
            fallback_mapping: previous.fallback_mapping,
            matrix_config_id: previous.matrix_config_id,
            query_run_id,
        },
    )
    .await
}

/// Launch the orchestrator for a pending or paused dispatch run.
pub async fn start_dispatch_run(
    ctx: &PipelineContext,
    dispatch_id: DbId,
) -> Result<(), PipelineError> {
    let run = DispatchRunRepo::find_by_id(&ctx.pool, dispatch_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "dispatch_run",
            id: dispatch_id,
        })?;
    if !status::dispatch_can_start(&run.status) {
        return Err(PipelineError::Ineligible(format!(
            "Dispatch run {dispatch_id} is '{}', expected pending or paused",
            run.status
        )));
    }
    if ctx.registry.contains(RunKind::Dispatch, dispatch_id) {
        return Err(PipelineError::Ineligible(format!(
            "Dispatch run {dispatch_id} is already being processed"
        )));
    }

    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        dispatch_run::execute(&task_ctx, dispatch_id).await;
    });
    Ok(())
}

/// Progress snapshot for pollers.
pub async fn dispatch_status(
    ctx: &PipelineContext,
    dispatch_id: DbId,
) -> Result<DispatchRunStatusView, PipelineError> {
    let run = DispatchRunRepo::find_by_id(&ctx.pool, dispatch_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "dispatch_run",
            id: dispatch_id,
        })?;
    Ok(run.into())
}

/// Request cancellation of a dispatch run. A live loop marks the remaining
/// items cancelled itself; for a run with no loop the items are cancelled
/// here so none are left dangling in pending.
pub async fn cancel_dispatch_run(
    ctx: &PipelineContext,
    dispatch_id: DbId,
) -> Result<(), PipelineError> {
    let run = DispatchRunRepo::find_by_id(&ctx.pool, dispatch_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "dispatch_run",
            id: dispatch_id,
        })?;
    if !status::dispatch_can_cancel(&run.status) {
        return Err(PipelineError::Ineligible(format!(
            "Dispatch run {dispatch_id} is '{}', cannot be cancelled",
            run.status
        )));
    }

    DispatchRunRepo::update_status(
        &ctx.pool,
        dispatch_id,
        status::DISPATCH_STATUS_CANCELLED,
        Some("Cancellation requested"),
    )
    .await?;
    let live = ctx.registry.cancel(RunKind::Dispatch, dispatch_id);
    if !live {
        let skipped = DispatchResultRepo::cancel_pending(&ctx.pool, dispatch_id).await?;
        tracing::info!(dispatch_id, skipped, "Cancelled dispatch run with no live loop");
    }
    Ok(())
}

/// Pause a sending dispatch run. The loop checkpoints and exits at the next
/// item boundary; `start_dispatch_run` resumes from the remaining items.
pub async fn pause_dispatch_run(
    ctx: &PipelineContext,
    dispatch_id: DbId,
) -> Result<(), PipelineError> {
    let run = DispatchRunRepo::find_by_id(&ctx.pool, dispatch_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "dispatch_run",
            id: dispatch_id,
        })?;
    if run.status != status::DISPATCH_STATUS_SENDING {
        return Err(PipelineError::Ineligible(format!(
            "Dispatch run {dispatch_id} is '{}', only sending runs can be paused",
            run.status
        )));
    }
    DispatchRunRepo::update_status(
        &ctx.pool,
        dispatch_id,
        status::DISPATCH_STATUS_PAUSED,
        Some("Pause requested"),
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Template administration
// ---------------------------------------------------------------------------

/// Reconcile a template's stored variable definitions with the placeholders
/// currently present in its SQL text. Returns the applied plan.
pub async fn sync_template_variables(
    ctx: &PipelineContext,
    template_id: DbId,
) -> Result<SyncPlan, PipelineError> {
    let query_template = QueryTemplateRepo::find_by_id(&ctx.pool, template_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_template",
            id: template_id,
        })?;

    let sql_vars = template::extract_variables(&query_template.sql_text);
    let existing: Vec<(String, bool)> = QueryTemplateRepo::list_variables(&ctx.pool, template_id)
        .await?
        .into_iter()
        .map(|variable| (variable.name, variable.active))
        .collect();

    let plan = template::sync_plan(&sql_vars, &existing);
    if !plan.is_empty() {
        QueryTemplateRepo::apply_sync_plan(&ctx.pool, template_id, &plan).await?;
        tracing::info!(
            template_id,
            created = plan.create.len(),
            deactivated = plan.deactivate.len(),
            reactivated = plan.reactivate.len(),
            "Template variables reconciled"
        );
    }
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn mappings_accept_known_fields() {
        let mapping = json!({"1": "nome_cliente", "2": "valor"});
        assert!(validate_mapping("primary", &mapping).is_ok());
        assert!(validate_mapping("primary", &json!({})).is_ok());
    }

    #[test]
    fn mappings_reject_unknown_fields() {
        let mapping = json!({"1": "nome_cliete"});
        let err = validate_mapping("primary", &mapping).unwrap_err();
        assert_matches!(err, PipelineError::Validation(msg) => {
            assert!(msg.contains("nome_cliete"));
        });
    }
}
