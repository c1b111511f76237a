//! Repositories for the `matrix_api_configs` and `hsm_templates` tables.

use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::matrix::{CreateHsmTemplate, CreateMatrixApiConfig, HsmTemplate, MatrixApiConfig};

const CONFIG_COLUMNS: &str =
    "id, name, base_url, api_key, account_code, active, created_at, updated_at";

const TEMPLATE_COLUMNS: &str = "id, name, hsm_id, flow_code, send_kind, description, \
     slot_descriptions, active, created_at, updated_at";

/// CRUD for messaging provider configurations.
pub struct MatrixConfigRepo;

impl MatrixConfigRepo {
    /// Insert a new provider configuration.
    pub async fn create(
        pool: &PgPool,
        input: &CreateMatrixApiConfig,
    ) -> Result<MatrixApiConfig, sqlx::Error> {
        let query = format!(
            "INSERT INTO matrix_api_configs (name, base_url, api_key, account_code) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {CONFIG_COLUMNS}"
        );
        sqlx::query_as::<_, MatrixApiConfig>(&query)
            .bind(&input.name)
            .bind(&input.base_url)
            .bind(&input.api_key)
            .bind(input.account_code)
            .fetch_one(pool)
            .await
    }

    /// Find a configuration by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<MatrixApiConfig>, sqlx::Error> {
        let query = format!("SELECT {CONFIG_COLUMNS} FROM matrix_api_configs WHERE id = $1");
        sqlx::query_as::<_, MatrixApiConfig>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List active configurations, active-first by name.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<MatrixApiConfig>, sqlx::Error> {
        let query =
            format!("SELECT {CONFIG_COLUMNS} FROM matrix_api_configs WHERE active ORDER BY name");
        sqlx::query_as::<_, MatrixApiConfig>(&query)
            .fetch_all(pool)
            .await
    }
}

/// CRUD for HSM message templates.
pub struct HsmTemplateRepo;

impl HsmTemplateRepo {
    /// Insert a new HSM template.
    pub async fn create(pool: &PgPool, input: &CreateHsmTemplate) -> Result<HsmTemplate, sqlx::Error> {
        let query = format!(
            "INSERT INTO hsm_templates \
                (name, hsm_id, flow_code, send_kind, description, slot_descriptions) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {TEMPLATE_COLUMNS}"
        );
        sqlx::query_as::<_, HsmTemplate>(&query)
            .bind(&input.name)
            .bind(input.hsm_id)
            .bind(input.flow_code)
            .bind(input.send_kind)
            .bind(&input.description)
            .bind(&input.slot_descriptions)
            .fetch_one(pool)
            .await
    }

    /// Find a template by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<HsmTemplate>, sqlx::Error> {
        let query = format!("SELECT {TEMPLATE_COLUMNS} FROM hsm_templates WHERE id = $1");
        sqlx::query_as::<_, HsmTemplate>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List active templates by name.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<HsmTemplate>, sqlx::Error> {
        let query = format!("SELECT {TEMPLATE_COLUMNS} FROM hsm_templates WHERE active ORDER BY name");
        sqlx::query_as::<_, HsmTemplate>(&query)
            .fetch_all(pool)
            .await
    }
}
