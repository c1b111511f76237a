//! Consulted client models.

use bigdecimal::BigDecimal;
use campaign_core::types::{DbId, Timestamp};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `consulted_clients` table.
///
/// Keyed by (client_code, db_credential_id): the same external code can
/// exist under different source databases. The invoice snapshot fields
/// always reflect the most recent successful lookup.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConsultedClient {
    pub id: DbId,
    pub client_code: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub invoice_id: Option<String>,
    pub invoice_due_date: Option<NaiveDate>,
    pub invoice_amount: Option<BigDecimal>,
    pub pix_code: Option<String>,
    pub barcode: Option<String>,
    pub invoice_link: Option<String>,
    pub db_credential_id: DbId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ConsultedClient {
    /// View of this client as the field set dispatch mappings draw from.
    pub fn fields(&self) -> campaign_core::dispatch::ClientFields {
        campaign_core::dispatch::ClientFields {
            name: self.display_name.clone(),
            code: self.client_code.clone(),
            phone: self.phone.clone(),
            amount: self.invoice_amount.clone(),
            due_date: self.invoice_due_date,
            barcode: self.barcode.clone(),
            pix: self.pix_code.clone(),
            link: self.invoice_link.clone(),
            invoice_id: self.invoice_id.clone(),
        }
    }
}

/// DTO for upserting a client with a full invoice snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertClient {
    pub client_code: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub invoice_id: Option<String>,
    pub invoice_due_date: Option<NaiveDate>,
    pub invoice_amount: Option<BigDecimal>,
    pub pix_code: Option<String>,
    pub barcode: Option<String>,
    pub invoice_link: Option<String>,
    pub db_credential_id: DbId,
}
