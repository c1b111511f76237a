//! External source query client.
//!
//! Runs a campaign's substituted SQL against the operator-registered source
//! database and flattens the rows into JSON maps the processor can consume
//! without knowing the statement's shape. A fresh connection is opened per
//! call and dropped on every path; runs are infrequent enough that pooling
//! source connections buys nothing.

use bigdecimal::BigDecimal;
use campaign_db::models::credential::DbCredential;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Connection, PgConnection, Row, TypeInfo};

use crate::error::PipelineError;

/// One source row, keyed by column name.
pub type SourceRow = serde_json::Map<String, Value>;

/// Collapse whitespace runs (newlines included) into single spaces so the
/// statement executes as one unit and logs on one line.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Execute the statement against the credential's database and return the
/// rows as JSON maps.
pub async fn fetch_rows(
    credential: &DbCredential,
    sql: &str,
) -> Result<Vec<SourceRow>, PipelineError> {
    if credential.engine != "postgresql" {
        return Err(PipelineError::Validation(format!(
            "Source engine '{}' is registered but not executable; only postgresql sources can be queried",
            credential.engine
        )));
    }

    let statement = normalize_sql(sql);
    tracing::info!(credential_id = credential.id, "Executing source query");
    tracing::debug!(sql = %statement, "Source statement");

    let mut conn = PgConnection::connect(&credential.connection_string())
        .await
        .map_err(|e| {
            PipelineError::QueryExecution(format!(
                "could not connect to source '{}': {e}",
                credential.title
            ))
        })?;

    let rows = sqlx::query(&statement)
        .fetch_all(&mut conn)
        .await
        .map_err(|e| PipelineError::QueryExecution(format!("{statement}: {e}")))?;

    conn.close().await.ok();

    Ok(rows.iter().map(row_to_json).collect())
}

/// Flatten one row into a column-name-keyed JSON map.
fn row_to_json(row: &PgRow) -> SourceRow {
    let mut map = SourceRow::new();
    for column in row.columns() {
        map.insert(
            column.name().to_string(),
            decode_column(row, column.ordinal(), column.type_info().name()),
        );
    }
    map
}

/// Decode one column into a JSON value by its Postgres type name.
/// Undecodable values become null rather than failing the whole row.
fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    fn ok<T: Into<Value>>(result: Result<Option<T>, sqlx::Error>) -> Value {
        match result {
            Ok(Some(v)) => v.into(),
            _ => Value::Null,
        }
    }
    fn ok_str<T: ToString>(result: Result<Option<T>, sqlx::Error>) -> Value {
        match result {
            Ok(Some(v)) => Value::String(v.to_string()),
            _ => Value::Null,
        }
    }

    match type_name {
        "BOOL" => ok(row.try_get::<Option<bool>, _>(idx)),
        "INT2" => ok(row.try_get::<Option<i16>, _>(idx)),
        "INT4" => ok(row.try_get::<Option<i32>, _>(idx)),
        "INT8" => ok(row.try_get::<Option<i64>, _>(idx)),
        "FLOAT4" => ok(row.try_get::<Option<f32>, _>(idx)),
        "FLOAT8" => ok(row.try_get::<Option<f64>, _>(idx)),
        // Kept as a string to avoid float rounding of money values.
        "NUMERIC" => ok_str(row.try_get::<Option<BigDecimal>, _>(idx)),
        "DATE" => ok_str(row.try_get::<Option<NaiveDate>, _>(idx)),
        "TIME" => ok_str(row.try_get::<Option<NaiveTime>, _>(idx)),
        "TIMESTAMP" => ok_str(row.try_get::<Option<NaiveDateTime>, _>(idx)),
        "TIMESTAMPTZ" => match row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            Ok(Some(v)) => Value::String(v.to_rfc3339()),
            _ => Value::Null,
        },
        "JSON" | "JSONB" => ok(row.try_get::<Option<Value>, _>(idx)),
        _ => ok(row.try_get::<Option<String>, _>(idx)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_runs_collapse() {
        let sql = "SELECT  a,\n\tb\n  FROM t\nWHERE x = 1";
        assert_eq!(normalize_sql(sql), "SELECT a, b FROM t WHERE x = 1");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_sql("SELECT\n1");
        assert_eq!(normalize_sql(&once), once);
    }

    #[tokio::test]
    async fn non_postgres_engine_rejected() {
        let credential = DbCredential {
            id: 1,
            title: "legacy erp".to_string(),
            engine: "mysql".to_string(),
            host: "db.internal".to_string(),
            port: 3306,
            database_name: "erp".to_string(),
            username: "reader".to_string(),
            password: "pw".to_string(),
            active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let err = fetch_rows(&credential, "SELECT 1").await.unwrap_err();
        assert_matches::assert_matches!(err, PipelineError::Validation(_));
    }
}
