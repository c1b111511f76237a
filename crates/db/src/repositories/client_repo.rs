//! Repository for the `consulted_clients` table.
//!
//! All writes are conflict-upserts keyed on (client_code, db_credential_id);
//! the orchestrators never delete clients.

use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::client::{ConsultedClient, UpsertClient};

const COLUMNS: &str = "id, client_code, display_name, phone, invoice_id, invoice_due_date, \
     invoice_amount, pix_code, barcode, invoice_link, db_credential_id, created_at, updated_at";

/// Upsert-oriented access to consulted clients.
pub struct ClientRepo;

impl ClientRepo {
    /// Upsert a client with a fresh invoice snapshot.
    ///
    /// On first sight the full row is created (display name and phone
    /// included); on conflict only the invoice snapshot fields are
    /// overwritten, so the identity fields keep their first-seen values
    /// while the snapshot always reflects the latest successful lookup.
    pub async fn upsert(pool: &PgPool, input: &UpsertClient) -> Result<ConsultedClient, sqlx::Error> {
        let query = format!(
            "INSERT INTO consulted_clients \
                (client_code, display_name, phone, invoice_id, invoice_due_date, \
                 invoice_amount, pix_code, barcode, invoice_link, db_credential_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (client_code, db_credential_id) DO UPDATE SET \
                invoice_id = EXCLUDED.invoice_id, \
                invoice_due_date = EXCLUDED.invoice_due_date, \
                invoice_amount = EXCLUDED.invoice_amount, \
                pix_code = EXCLUDED.pix_code, \
                barcode = EXCLUDED.barcode, \
                invoice_link = EXCLUDED.invoice_link, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConsultedClient>(&query)
            .bind(&input.client_code)
            .bind(&input.display_name)
            .bind(&input.phone)
            .bind(&input.invoice_id)
            .bind(input.invoice_due_date)
            .bind(&input.invoice_amount)
            .bind(&input.pix_code)
            .bind(&input.barcode)
            .bind(&input.invoice_link)
            .bind(input.db_credential_id)
            .fetch_one(pool)
            .await
    }

    /// Get-or-create with identity fields only, used when recording a
    /// failure for a client that may not exist yet. Existing rows are
    /// returned untouched apart from their updated_at.
    pub async fn upsert_minimal(
        pool: &PgPool,
        client_code: &str,
        display_name: &str,
        db_credential_id: DbId,
    ) -> Result<ConsultedClient, sqlx::Error> {
        let query = format!(
            "INSERT INTO consulted_clients (client_code, display_name, db_credential_id) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (client_code, db_credential_id) DO UPDATE SET \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConsultedClient>(&query)
            .bind(client_code)
            .bind(display_name)
            .bind(db_credential_id)
            .fetch_one(pool)
            .await
    }

    /// Find a client by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ConsultedClient>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM consulted_clients WHERE id = $1");
        sqlx::query_as::<_, ConsultedClient>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a client by its per-source key.
    pub async fn find_by_code(
        pool: &PgPool,
        client_code: &str,
        db_credential_id: DbId,
    ) -> Result<Option<ConsultedClient>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM consulted_clients \
             WHERE client_code = $1 AND db_credential_id = $2"
        );
        sqlx::query_as::<_, ConsultedClient>(&query)
            .bind(client_code)
            .bind(db_credential_id)
            .fetch_optional(pool)
            .await
    }
}
