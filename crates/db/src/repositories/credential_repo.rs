//! Repositories for the `db_credentials` and `hubsoft_credentials` tables.

use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::credential::{
    CreateDbCredential, CreateHubsoftCredential, DbCredential, HubsoftCredential,
};

const DB_COLUMNS: &str = "id, title, engine, host, port, database_name, username, password, \
     active, created_at, updated_at";

const HUBSOFT_COLUMNS: &str = "id, title, client_id, client_secret, username, password, \
     base_url, token_url, active, created_at, updated_at";

/// CRUD for source database credentials.
pub struct DbCredentialRepo;

impl DbCredentialRepo {
    /// Insert a new source database credential.
    pub async fn create(
        pool: &PgPool,
        input: &CreateDbCredential,
    ) -> Result<DbCredential, sqlx::Error> {
        let query = format!(
            "INSERT INTO db_credentials \
                (title, engine, host, port, database_name, username, password) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {DB_COLUMNS}"
        );
        sqlx::query_as::<_, DbCredential>(&query)
            .bind(&input.title)
            .bind(&input.engine)
            .bind(&input.host)
            .bind(input.port)
            .bind(&input.database_name)
            .bind(&input.username)
            .bind(&input.password)
            .fetch_one(pool)
            .await
    }

    /// Find a credential by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<DbCredential>, sqlx::Error> {
        let query = format!("SELECT {DB_COLUMNS} FROM db_credentials WHERE id = $1");
        sqlx::query_as::<_, DbCredential>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List active credentials.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<DbCredential>, sqlx::Error> {
        let query = format!("SELECT {DB_COLUMNS} FROM db_credentials WHERE active ORDER BY title");
        sqlx::query_as::<_, DbCredential>(&query)
            .fetch_all(pool)
            .await
    }
}

/// CRUD for enrichment API credentials.
pub struct HubsoftCredentialRepo;

impl HubsoftCredentialRepo {
    /// Insert a new enrichment API credential.
    pub async fn create(
        pool: &PgPool,
        input: &CreateHubsoftCredential,
    ) -> Result<HubsoftCredential, sqlx::Error> {
        let query = format!(
            "INSERT INTO hubsoft_credentials \
                (title, client_id, client_secret, username, password, base_url, token_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {HUBSOFT_COLUMNS}"
        );
        sqlx::query_as::<_, HubsoftCredential>(&query)
            .bind(&input.title)
            .bind(&input.client_id)
            .bind(&input.client_secret)
            .bind(&input.username)
            .bind(&input.password)
            .bind(&input.base_url)
            .bind(&input.token_url)
            .fetch_one(pool)
            .await
    }

    /// Find a credential by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<HubsoftCredential>, sqlx::Error> {
        let query = format!("SELECT {HUBSOFT_COLUMNS} FROM hubsoft_credentials WHERE id = $1");
        sqlx::query_as::<_, HubsoftCredential>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List active credentials.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<HubsoftCredential>, sqlx::Error> {
        let query =
            format!("SELECT {HUBSOFT_COLUMNS} FROM hubsoft_credentials WHERE active ORDER BY title");
        sqlx::query_as::<_, HubsoftCredential>(&query)
            .fetch_all(pool)
            .await
    }
}
