//! The dispatch run orchestrator: successful query results -> HSM sends.

use std::collections::{BTreeMap, HashMap};

use campaign_core::dispatch::{choose_template, is_blank, resolve_variables};
use campaign_core::status;
use campaign_core::text::json_object_to_map;
use campaign_core::types::DbId;
use campaign_db::models::client::ConsultedClient;
use campaign_db::models::matrix::HsmTemplate;
use campaign_db::repositories::{
    ClientQueryResultRepo, DispatchResultRepo, DispatchRunRepo, HsmTemplateRepo, MatrixConfigRepo,
    QueryRunRepo,
};
use campaign_matrix::{HsmRequest, MatrixClient};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::registry::RunKind;

fn log_line(buffer: &mut String, line: impl AsRef<str>) {
    buffer.push_str(line.as_ref());
    buffer.push('\n');
}

/// Items still unvisited. Clamped: a resumed run whose persisted counters
/// drifted past the queue size must never report negative pending work.
fn remaining(total_clients: i32, sent: i32, errors: i32) -> i32 {
    (total_clients - sent - errors).max(0)
}

/// What the loop should do after polling the persisted status.
enum PollOutcome {
    Continue,
    Cancel,
    Pause,
}

async fn poll_status(
    ctx: &PipelineContext,
    dispatch_id: DbId,
    token: &CancellationToken,
) -> Result<PollOutcome, sqlx::Error> {
    if token.is_cancelled() {
        return Ok(PollOutcome::Cancel);
    }
    match DispatchRunRepo::current_status(&ctx.pool, dispatch_id)
        .await?
        .as_deref()
    {
        Some(status::DISPATCH_STATUS_CANCELLED) => Ok(PollOutcome::Cancel),
        Some(status::DISPATCH_STATUS_PAUSED) => Ok(PollOutcome::Pause),
        _ => Ok(PollOutcome::Continue),
    }
}

/// Drive a dispatch run to a stable state. Never returns an error: any
/// failure that escapes the loop is recorded on the run row.
pub async fn execute(ctx: &PipelineContext, dispatch_id: DbId) {
    let token = ctx.registry.register(RunKind::Dispatch, dispatch_id);
    if let Err(e) = run_loop(ctx, dispatch_id, &token).await {
        tracing::error!(dispatch_id, "Dispatch run aborted: {e}");
        let line = format!("Dispatch aborted: {e}");
        if let Err(db) = DispatchRunRepo::update_status(
            &ctx.pool,
            dispatch_id,
            status::DISPATCH_STATUS_ERROR,
            Some(&line),
        )
        .await
        {
            tracing::error!(dispatch_id, "Could not record dispatch failure: {db}");
        }
    }
    ctx.registry.deregister(RunKind::Dispatch, dispatch_id);
}

async fn run_loop(
    ctx: &PipelineContext,
    dispatch_id: DbId,
    token: &CancellationToken,
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

    let query_run = QueryRunRepo::find_by_id(&ctx.pool, run.query_run_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "query_run",
            id: run.query_run_id,
        })?;
    if query_run.status != status::RUN_STATUS_COMPLETED {
        return Err(PipelineError::Ineligible(format!(
            "Source query run {} is '{}', expected completed",
            query_run.id, query_run.status
        )));
    }

    let clients = ClientQueryResultRepo::successful_clients(&ctx.pool, query_run.id).await?;
    if clients.is_empty() {
        return Err(PipelineError::Ineligible(format!(
            "Source query run {} has no successful results to dispatch",
            query_run.id
        )));
    }

    let config = MatrixConfigRepo::find_by_id(&ctx.pool, run.matrix_config_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "matrix_api_config",
            id: run.matrix_config_id,
        })?;
    let primary_template = HsmTemplateRepo::find_by_id(&ctx.pool, run.primary_template_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "hsm_template",
            id: run.primary_template_id,
        })?;
    let fallback_template = match run.fallback_template_id {
        Some(id) => Some(HsmTemplateRepo::find_by_id(&ctx.pool, id).await?.ok_or(
            PipelineError::NotFound {
                entity: "hsm_template",
                id,
            },
        )?),
        None => None,
    };

    let matrix = MatrixClient::new(config)
        .map_err(|e| PipelineError::Validation(format!("messaging client: {e}")))?;

    let primary_mapping = json_object_to_map(&run.primary_mapping);
    let fallback_mapping = json_object_to_map(&run.fallback_mapping);
    let has_fallback = fallback_template.is_some() && !fallback_mapping.is_empty();

    // First start queues the items; a paused run resuming keeps its queue
    // and its counters.
    if run.status == status::DISPATCH_STATUS_PENDING {
        let client_ids: Vec<DbId> = clients.iter().map(|c| c.id).collect();
        DispatchResultRepo::create_pending_batch(&ctx.pool, dispatch_id, &client_ids).await?;
        DispatchRunRepo::set_totals_on_start(&ctx.pool, dispatch_id, client_ids.len() as i32)
            .await?;
    }

    DispatchRunRepo::update_status(
        &ctx.pool,
        dispatch_id,
        status::DISPATCH_STATUS_SENDING,
        Some(&format!("Dispatch started: {}", run.title)),
    )
    .await?;
    tracing::info!(dispatch_id, title = %run.title, "Dispatch run started");

    let clients_by_id: HashMap<DbId, &ConsultedClient> =
        clients.iter().map(|c| (c.id, c)).collect();
    let items = DispatchResultRepo::list_pending(&ctx.pool, dispatch_id).await?;
    let total_clients = run.total_clients.max(items.len() as i32);

    let mut log = run.log.clone();
    let mut sent = run.total_sent;
    let mut errors = run.total_errors;
    let total = items.len();

    for (index, item) in items.iter().enumerate() {
        let pending = remaining(total_clients, sent, errors);
        match poll_status(ctx, dispatch_id, token).await? {
            PollOutcome::Cancel => {
                let skipped = DispatchResultRepo::cancel_pending(&ctx.pool, dispatch_id).await?;
                log_line(&mut log, format!("Cancelled with {skipped} item(s) unsent"));
                DispatchRunRepo::flush_progress(&ctx.pool, dispatch_id, sent, errors, 0, &log)
                    .await?;
                DispatchRunRepo::update_status(
                    &ctx.pool,
                    dispatch_id,
                    status::DISPATCH_STATUS_CANCELLED,
                    Some(&format!(
                        "Dispatch cancelled: {sent} sent, {errors} errors, {skipped} unsent"
                    )),
                )
                .await?;
                tracing::info!(dispatch_id, sent, errors, skipped, "Dispatch run cancelled");
                return Ok(());
            }
            PollOutcome::Pause => {
                log_line(&mut log, format!("Paused with {pending} item(s) pending"));
                DispatchRunRepo::flush_progress(
                    &ctx.pool,
                    dispatch_id,
                    sent,
                    errors,
                    pending,
                    &log,
                )
                .await?;
                tracing::info!(dispatch_id, pending, "Dispatch run paused");
                return Ok(());
            }
            PollOutcome::Continue => {}
        }

        let outcome =
            send_item(&ctx.pool, &matrix, item, &clients_by_id, &primary_mapping,
                &fallback_mapping, &primary_template, fallback_template.as_ref(), has_fallback)
                .await?;
        if outcome.sent {
            sent += 1;
        } else {
            errors += 1;
        }
        log_line(
            &mut log,
            format!("[{}/{total}] {}", index + 1, outcome.message),
        );

        if (index + 1) % ctx.dispatch_flush_every as usize == 0 {
            let pending = remaining(total_clients, sent, errors);
            DispatchRunRepo::flush_progress(&ctx.pool, dispatch_id, sent, errors, pending, &log)
                .await?;
            tracing::debug!(dispatch_id, sent, errors, "Progress checkpoint");
        }
        if index + 1 < total && !ctx.item_delay.is_zero() {
            tokio::time::sleep(ctx.item_delay).await;
        }
    }

    let pending = remaining(total_clients, sent, errors);
    DispatchRunRepo::flush_progress(&ctx.pool, dispatch_id, sent, errors, pending, &log)
        .await?;
    // Errors on individual items do not fail the run; completed means the
    // loop visited every item.
    DispatchRunRepo::update_status(
        &ctx.pool,
        dispatch_id,
        status::DISPATCH_STATUS_COMPLETED,
        Some(&format!(
            "Dispatch completed: {sent} sent, {errors} errors of {total_clients} client(s)"
        )),
    )
    .await?;
    tracing::info!(dispatch_id, sent, errors, "Dispatch run completed");
    Ok(())
}

struct SendOutcome {
    sent: bool,
    message: String,
}

/// Send one item, persisting the item's terminal state. Returns `Err` only
/// for failures writing our own database.
#[allow(clippy::too_many_arguments)]
async fn send_item(
    pool: &sqlx::PgPool,
    matrix: &MatrixClient,
    item: &campaign_db::models::dispatch_run::DispatchResult,
    clients_by_id: &HashMap<DbId, &ConsultedClient>,
    primary_mapping: &BTreeMap<String, String>,
    fallback_mapping: &BTreeMap<String, String>,
    primary_template: &HsmTemplate,
    fallback_template: Option<&HsmTemplate>,
    has_fallback: bool,
) -> Result<SendOutcome, PipelineError> {
    let client = match clients_by_id.get(&item.client_id) {
        Some(client) => *client,
        None => {
            DispatchResultRepo::mark_error(
                pool,
                item.id,
                status::TEMPLATE_PRIMARY,
                &Value::Null,
                "client missing from source run results",
                None,
            )
            .await?;
            return Ok(SendOutcome {
                sent: false,
                message: format!("client {}: missing from source run results", item.client_id),
            });
        }
    };

    let fields = client.fields().to_map();
    let choice = choose_template(primary_mapping, &fields, has_fallback);
    let (mapping, template) = if choice.variant == status::TEMPLATE_FALLBACK {
        match fallback_template {
            Some(template) => (fallback_mapping, template),
            None => (primary_mapping, primary_template),
        }
    } else {
        (primary_mapping, primary_template)
    };
    if choice.variant == status::TEMPLATE_PRIMARY && !choice.missing_fields.is_empty() {
        tracing::warn!(
            item_id = item.id,
            client_code = %client.client_code,
            missing = ?choice.missing_fields,
            "Sending primary template with blank field(s)"
        );
    }

    let variables = resolve_variables(mapping, &fields);
    let variables_sent = serde_json::to_value(&variables).unwrap_or(Value::Null);

    let phone = client.phone.clone().unwrap_or_default();
    if is_blank(&phone) {
        DispatchResultRepo::mark_error(
            pool,
            item.id,
            choice.variant,
            &variables_sent,
            "client has no phone number",
            None,
        )
        .await?;
        return Ok(SendOutcome {
            sent: false,
            message: format!("{}: no phone number", client.client_code),
        });
    }

    let request = HsmRequest {
        contact_name: client.display_name.clone(),
        contact_phone: phone,
        variables,
    };

    match matrix.send_hsm(template, &request).await {
        Ok(response) => {
            DispatchResultRepo::mark_sent(pool, item.id, choice.variant, &variables_sent, &response)
                .await?;
            Ok(SendOutcome {
                sent: true,
                message: format!("{}: sent ({})", client.client_code, choice.variant),
            })
        }
        Err(e) => {
            tracing::error!(
                item_id = item.id,
                client_code = %client.client_code,
                "HSM send failed: {e}"
            );
            DispatchResultRepo::mark_error(
                pool,
                item.id,
                choice.variant,
                &variables_sent,
                &e.to_string(),
                e.response_body().as_ref(),
            )
            .await?;
            Ok(SendOutcome {
                sent: false,
                message: format!("{}: {e}", client.client_code),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
