//! REST client for the Matrix `sendHsm` endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use campaign_db::models::matrix::{HsmTemplate, MatrixApiConfig};

/// Per-call timeout for the messaging API.
const TIMEOUT: Duration = Duration::from_secs(30);

/// Send type used when a template does not configure one.
const DEFAULT_SEND_KIND: i32 = 1;

/// Flow code used when a template does not configure one.
const DEFAULT_FLOW_CODE: i32 = 0;

/// Errors from the messaging API layer. All of them are per-item: the
/// dispatch loop records the failure and moves on.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// The HTTP request itself failed (timeout, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Matrix API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body, kept for the item's error detail.
        body: String,
    },
}

impl MatrixError {
    /// Partial provider response, when one was received.
    pub fn response_body(&self) -> Option<serde_json::Value> {
        match self {
            Self::Api { body, .. } => serde_json::from_str(body).ok(),
            Self::Request(_) => None,
        }
    }
}

/// One resolved HSM send: the target contact plus the slot values.
#[derive(Debug, Clone)]
pub struct HsmRequest {
    pub contact_name: String,
    pub contact_phone: String,
    pub variables: BTreeMap<String, String>,
}

/// HTTP client for one messaging provider configuration.
pub struct MatrixClient {
    http: reqwest::Client,
    config: MatrixApiConfig,
}

impl MatrixClient {
    /// Create a client for the given provider configuration.
    pub fn new(config: MatrixApiConfig) -> Result<Self, MatrixError> {
        let http = reqwest::Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    /// Build the `sendHsm` payload for a template and request.
    /// Exposed separately so the wire shape can be unit tested.
    pub fn build_payload(&self, template: &HsmTemplate, request: &HsmRequest) -> serde_json::Value {
        serde_json::json!({
            "cod_conta": self.config.account_code,
            "hsm": template.hsm_id,
            "tipo_envio": if template.send_kind > 0 { template.send_kind } else { DEFAULT_SEND_KIND },
            "cod_flow": template.flow_code.unwrap_or(DEFAULT_FLOW_CODE),
            "start_flow": 1,
            "contato": {
                "nome": request.contact_name,
                "telefone": request.contact_phone,
            },
            "bol_incluir_atual": 1,
            "variaveis": request.variables,
        })
    }

    /// Dispatch one HSM. Returns the provider's JSON response on success.
    pub async fn send_hsm(
        &self,
        template: &HsmTemplate,
        request: &HsmRequest,
    ) -> Result<serde_json::Value, MatrixError> {
        let payload = self.build_payload(template, request);

        tracing::debug!(
            hsm_id = template.hsm_id,
            phone = %request.contact_phone,
            "Sending HSM"
        );

        let response = self
            .http
            .post(format!("{}/rest/v1/sendHsm", self.config.base_url))
            .header("Authorization", &self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(MatrixError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<serde_json::Value>().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
