//! Per-record processing for the query run loop.
//!
//! Each source row goes through lookup, invoice matching, and persistence.
//! Every failure short of an authentication error is absorbed into a
//! failure result row so one bad record never stops the run.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use campaign_core::text::{br_date_to_iso, json_to_display, normalize_name};
use campaign_db::models::client::UpsertClient;
use campaign_db::models::query_run::{QueryRun, UpsertClientQueryResult};
use campaign_db::repositories::{ClientQueryResultRepo, ClientRepo};
use campaign_hubsoft::{find_invoice, HubsoftClient};
use serde_json::Value;
use sqlx::PgPool;

use crate::error::PipelineError;
use crate::source::SourceRow;

/// What the loop needs to know about one processed record.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub client_code: String,
    pub success: bool,
    pub message: String,
}

impl ItemOutcome {
    fn success(client_code: String, message: impl Into<String>) -> Self {
        Self {
            client_code,
            success: true,
            message: message.into(),
        }
    }

    fn failure(client_code: String, message: impl Into<String>) -> Self {
        Self {
            client_code,
            success: false,
            message: message.into(),
        }
    }
}

/// Read a source-row column as a display string ("" when absent).
pub fn row_field(row: &SourceRow, key: &str) -> String {
    row.get(key).map(json_to_display).unwrap_or_default()
}

/// Parse an invoice amount as delivered by the enrichment API: either a
/// JSON number or a numeric string.
pub fn parse_amount(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn invoice_field(invoice: &Value, key: &str) -> Option<String> {
    let text = invoice.get(key).map(json_to_display).unwrap_or_default();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Process one source row: enrich, upsert the client, upsert the result.
///
/// Returns `Err` only for authentication failures, which abort the run.
/// Everything else resolves to an [`ItemOutcome`] with a persisted result
/// row (where a client identity could be established).
pub async fn process_record(
    pool: &PgPool,
    hubsoft: &mut HubsoftClient,
    run: &QueryRun,
    row: &SourceRow,
) -> Result<ItemOutcome, PipelineError> {
    let client_code = row_field(row, "codigo_cliente");
    let invoice_id = row_field(row, "id_fatura");
    let display_name = normalize_name(&row_field(row, "nome_razaosocial"));
    let phone = row_field(row, "TelefoneCorrigido");
    let source_row = Value::Object(row.clone());

    if client_code.trim().is_empty() {
        // Without a code there is no client identity to attach a result to.
        tracing::warn!(run_id = run.id, "Source row has no codigo_cliente, skipping");
        return Ok(ItemOutcome::failure(
            client_code,
            "source row has no codigo_cliente",
        ));
    }

    let response = match hubsoft.lookup_client(&client_code).await? {
        Some(response) => response,
        None => {
            let message = "enrichment lookup failed";
            record_failure(pool, run, &client_code, &display_name, &source_row, None, message)
                .await;
            return Ok(ItemOutcome::failure(client_code, message));
        }
    };

    let invoice = match find_invoice(&response, &invoice_id) {
        Some(invoice) => invoice,
        None => {
            let message = format!("invoice '{invoice_id}' not found in enrichment response");
            record_failure(
                pool,
                run,
                &client_code,
                &display_name,
                &source_row,
                Some(&response),
                &message,
            )
            .await;
            return Ok(ItemOutcome::failure(client_code, message));
        }
    };

    let upsert = UpsertClient {
        client_code: client_code.clone(),
        display_name: display_name.clone(),
        phone: if phone.trim().is_empty() { None } else { Some(phone) },
        invoice_id: Some(invoice_id.clone()),
        invoice_due_date: invoice
            .get("data_vencimento")
            .map(json_to_display)
            .and_then(|raw| br_date_to_iso(&raw)),
        invoice_amount: invoice.get("valor").and_then(parse_amount),
        pix_code: invoice_field(invoice, "pix_copia_cola"),
        barcode: invoice_field(invoice, "codigo_barras"),
        invoice_link: invoice_field(invoice, "link"),
        db_credential_id: run.db_credential_id,
    };

    let client = match ClientRepo::upsert(pool, &upsert).await {
        Ok(client) => client,
        Err(e) => {
            let message = format!("client upsert failed: {e}");
            tracing::error!(run_id = run.id, client_code = %client_code, "{message}");
            record_failure(
                pool,
                run,
                &client_code,
                &display_name,
                &source_row,
                Some(&response),
                &message,
            )
            .await;
            return Ok(ItemOutcome::failure(client_code, message));
        }
    };

    let result = UpsertClientQueryResult {
        run_id: run.id,
        client_id: client.id,
        source_row: Some(source_row.clone()),
        api_response: Some(response.clone()),
        success: true,
        error: None,
    };
    if let Err(e) = ClientQueryResultRepo::upsert(pool, &result).await {
        let message = format!("result upsert failed: {e}");
        tracing::error!(run_id = run.id, client_code = %client_code, "{message}");
        record_failure(
            pool,
            run,
            &client_code,
            &display_name,
            &source_row,
            Some(&response),
            &message,
        )
        .await;
        return Ok(ItemOutcome::failure(client_code, message));
    }

    Ok(ItemOutcome::success(client_code, "enriched"))
}

/// Persist a failure result, creating a minimal client row if the client
/// was never seen before. A failure while recording the failure is logged
/// and swallowed; the in-memory counters still reflect the item.
async fn record_failure(
    pool: &PgPool,
    run: &QueryRun,
    client_code: &str,
    display_name: &str,
    source_row: &Value,
    api_response: Option<&Value>,
    error: &str,
) {
    let client =
        match ClientRepo::upsert_minimal(pool, client_code, display_name, run.db_credential_id)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(
                    run_id = run.id,
                    client_code = %client_code,
                    "Could not persist failure (client upsert): {e}"
                );
                return;
            }
        };

    let result = UpsertClientQueryResult {
        run_id: run.id,
        client_id: client.id,
        source_row: Some(source_row.clone()),
        api_response: api_response.cloned(),
        success: false,
        error: Some(error.to_string()),
    };
    if let Err(e) = ClientQueryResultRepo::upsert(pool, &result).await {
        tracing::error!(
            run_id = run.id,
            client_code = %client_code,
            "Could not persist failure (result upsert): {e}"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_parse_from_strings_and_numbers() {
        assert_eq!(
            parse_amount(&json!("149.90")),
            Some(BigDecimal::from_str("149.90").unwrap())
        );
        assert_eq!(
            parse_amount(&json!(" 80.5 ")),
            Some(BigDecimal::from_str("80.5").unwrap())
        );
        assert_eq!(parse_amount(&json!(120)), Some(BigDecimal::from(120)));
        assert_eq!(parse_amount(&json!("R$ 10,00")), None);
        assert_eq!(parse_amount(&json!(null)), None);
    }

    #[test]
    fn row_fields_read_as_display_strings() {
        let row: SourceRow = json!({
            "codigo_cliente": 1042,
            "nome_razaosocial": "João",
            "TelefoneCorrigido": null,
        })
        .as_object()
        .cloned()
        .unwrap();
        assert_eq!(row_field(&row, "codigo_cliente"), "1042");
        assert_eq!(row_field(&row, "nome_razaosocial"), "João");
        assert_eq!(row_field(&row, "TelefoneCorrigido"), "");
        assert_eq!(row_field(&row, "missing"), "");
    }

    #[test]
    fn blank_invoice_fields_become_none() {
        let invoice = json!({"codigo_barras": "  ", "link": "https://x", "valor": "1.00"});
        assert_eq!(invoice_field(&invoice, "codigo_barras"), None);
        assert_eq!(invoice_field(&invoice, "link"), Some("https://x".to_string()));
        assert_eq!(invoice_field(&invoice, "pix_copia_cola"), None);
    }
}
