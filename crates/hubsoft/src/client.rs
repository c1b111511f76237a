//! REST client for the Hubsoft financial enrichment endpoints.

use std::time::Duration;

use campaign_db::models::credential::HubsoftCredential;
use serde::Deserialize;

/// Per-call timeout for the enrichment API.
const TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the enrichment API layer.
///
/// Only authentication failures surface as errors: a failed token fetch
/// makes every subsequent item pointless, so the run aborts. Lookup
/// failures are per-item and reported as `None` instead.
#[derive(Debug, thiserror::Error)]
pub enum HubsoftError {
    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The token endpoint rejected the credentials or the call failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),
}

/// Token endpoint response; fields beyond the access token are ignored.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// HTTP client for one enrichment API credential.
///
/// Token state machine: no token -> authenticated -> no token (on 401).
/// [`lookup_client`](Self::lookup_client) lazily authenticates via
/// `ensure_token` and invalidates the cached token when the API answers
/// 401, so the *next* call re-authenticates; the current call is not
/// retried inline.
pub struct HubsoftClient {
    http: reqwest::Client,
    credential: HubsoftCredential,
    token: Option<String>,
}

impl HubsoftClient {
    /// Create a client for the given credential.
    pub fn new(credential: HubsoftCredential) -> Result<Self, HubsoftError> {
        let http = reqwest::Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self {
            http,
            credential,
            token: None,
        })
    }

    /// True if a token is currently cached. Exposed for tests.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Fetch a fresh access token using the password grant.
    async fn fetch_token(&mut self) -> Result<(), HubsoftError> {
        tracing::info!(url = %self.credential.token_url, "Requesting enrichment API token");
        let payload = serde_json::json!({
            "client_id": self.credential.client_id,
            "client_secret": self.credential.client_secret,
            "username": self.credential.username,
            "password": self.credential.password,
            "grant_type": "password",
        });

        let response = self
            .http
            .post(&self.credential.token_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HubsoftError::Authentication(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HubsoftError::Authentication(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| HubsoftError::Authentication(format!("invalid token response: {e}")))?;

        match body.access_token {
            Some(token) if !token.is_empty() => {
                self.token = Some(token);
                tracing::info!("Enrichment API token obtained");
                Ok(())
            }
            _ => Err(HubsoftError::Authentication(
                "access_token missing from token response".to_string(),
            )),
        }
    }

    /// Fetch a token only if none is cached.
    pub async fn ensure_token(&mut self) -> Result<(), HubsoftError> {
        if self.token.is_none() {
            self.fetch_token().await?;
        }
        Ok(())
    }

    /// Look up a client's financial data by external code.
    ///
    /// Returns `None` on any lookup failure so the caller records a
    /// per-item error instead of aborting the run. A 401 additionally
    /// drops the cached token. Only a failed *authentication* (token
    /// fetch) is returned as an error.
    pub async fn lookup_client(
        &mut self,
        client_code: &str,
    ) -> Result<Option<serde_json::Value>, HubsoftError> {
        self.ensure_token().await?;

        let url = format!(
            "{}/api/v1/integracao/cliente/financeiro?busca=codigo_cliente&termo_busca={}",
            self.credential.base_url, client_code
        );
        // ensure_token just ran; absence here would be a logic error, not
        // a recoverable condition, so fall back to an empty header value.
        let token = self.token.clone().unwrap_or_default();

        tracing::debug!(client_code = %client_code, "Looking up client financials");

        let response = match self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(client_code = %client_code, "Lookup request failed: {e}");
                return Ok(None);
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!(
                client_code = %client_code,
                "Enrichment API returned 401; token dropped, next call re-authenticates"
            );
            self.token = None;
            return Ok(None);
        }
        if !status.is_success() {
            tracing::error!(client_code = %client_code, "Lookup returned {status}");
            return Ok(None);
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => Ok(Some(body)),
            Err(e) => {
                tracing::error!(client_code = %client_code, "Lookup body unreadable: {e}");
                Ok(None)
            }
        }
    }
}

/// Find the invoice with the given ID inside an enrichment response.
/// IDs are string-compared because the API is inconsistent about numeric
/// versus string `id_fatura` values.
pub fn find_invoice<'a>(
    response: &'a serde_json::Value,
    invoice_id: &str,
) -> Option<&'a serde_json::Value> {
    response.get("faturas")?.as_array()?.iter().find(|invoice| {
        invoice
            .get("id_fatura")
            .map(|id| match id {
                serde_json::Value::String(s) => s == invoice_id,
                other => other.to_string() == invoice_id,
            })
            .unwrap_or(false)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
