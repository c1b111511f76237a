//! Messaging provider configuration and HSM template models.

use campaign_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `matrix_api_configs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MatrixApiConfig {
    pub id: DbId,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub account_code: i32,
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a messaging provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMatrixApiConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub account_code: i32,
}

/// A row from the `hsm_templates` table: a provider-side message template.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HsmTemplate {
    pub id: DbId,
    pub name: String,
    pub hsm_id: i32,
    pub flow_code: Option<i32>,
    pub send_kind: i32,
    pub description: String,
    /// Documentation of the template's variable slots, e.g.
    /// `{"1": "client name", "2": "amount"}`.
    pub slot_descriptions: serde_json::Value,
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering an HSM template.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateHsmTemplate {
    pub name: String,
    pub hsm_id: i32,
    pub flow_code: Option<i32>,
    pub send_kind: i32,
    pub description: String,
    pub slot_descriptions: serde_json::Value,
}
