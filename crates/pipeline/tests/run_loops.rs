//! Orchestrator loop tests against a real database.
//!
//! The source credential points back at the test database itself, so the
//! query loop exercises the real fetch path without an external fixture.
//! Dispatch loops are driven with clients that fail before any network
//! call, so every terminal decision is observable offline.

use std::collections::HashMap;
use std::time::Duration;

use campaign_core::status;
use campaign_db::models::credential::{CreateDbCredential, CreateHubsoftCredential, DbCredential};
use campaign_db::models::dispatch_run::CreateDispatchRun;
use campaign_db::models::matrix::{CreateHsmTemplate, CreateMatrixApiConfig};
use campaign_db::models::query_run::{CreateQueryRun, QueryRun, UpsertClientQueryResult};
use campaign_db::models::query_template::CreateQueryTemplate;
use campaign_db::repositories::{
    ClientQueryResultRepo, ClientRepo, DbCredentialRepo, DispatchResultRepo, DispatchRunRepo,
    HsmTemplateRepo, HubsoftCredentialRepo, MatrixConfigRepo, QueryRunRepo, QueryTemplateRepo,
};
use campaign_pipeline::{dispatch_run, query_run, PipelineContext};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Source credential pointing at the test database itself, parsed out of
/// the same DATABASE_URL the test harness connects with.
async fn loopback_credential(pool: &PgPool) -> DbCredential {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL is set for sqlx tests");
    let rest = url.split("://").nth(1).expect("URL has a scheme");
    let (userinfo, hostpart) = rest.split_once('@').expect("URL has credentials");
    let (username, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));
    let hostport = hostpart.split('/').next().expect("URL has a host");
    let (host, port) = hostport.split_once(':').unwrap_or((hostport, "5432"));
    let (database_name,): (String,) = sqlx::query_as("SELECT current_database()")
        .fetch_one(pool)
        .await
        .unwrap();

    DbCredentialRepo::create(
        pool,
        &CreateDbCredential {
            title: "loopback".to_string(),
            engine: "postgresql".to_string(),
            host: host.to_string(),
            port: port.parse().unwrap(),
            database_name,
            username: username.to_string(),
            password: password.to_string(),
        },
    )
    .await
    .unwrap()
}

async fn unreachable_credential(pool: &PgPool, engine: &str) -> DbCredential {
    DbCredentialRepo::create(
        pool,
        &CreateDbCredential {
            title: "legacy erp".to_string(),
            engine: engine.to_string(),
            host: "db.internal".to_string(),
            port: 3306,
            database_name: "erp".to_string(),
            username: "reader".to_string(),
            password: "pw".to_string(),
        },
    )
    .await
    .unwrap()
}

async fn new_query_run(pool: &PgPool, sql: &str, db_credential_id: i64) -> QueryRun {
    let template = QueryTemplateRepo::create(
        pool,
        &CreateQueryTemplate {
            title: "overdue clients".to_string(),
            description: None,
            sql_text: sql.to_string(),
        },
    )
    .await
    .unwrap();
    let hubsoft = HubsoftCredentialRepo::create(
        pool,
        &CreateHubsoftCredential {
            title: "hubsoft".to_string(),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            username: "api".to_string(),
            password: "pw".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            token_url: "http://127.0.0.1:1/oauth/token".to_string(),
        },
    )
    .await
    .unwrap();
    QueryRunRepo::create(
        pool,
        &CreateQueryRun {
            title: "wave".to_string(),
            template_id: template.id,
            hubsoft_credential_id: hubsoft.id,
            db_credential_id,
            variable_values: serde_json::json!({}),
        },
    )
    .await
    .unwrap()
}

/// A completed query run with `count` successful phone-less clients, plus
/// the provider config and template a dispatch over it needs.
async fn dispatchable_fixture(pool: &PgPool, count: usize) -> CreateDispatchRun {
    let credential = unreachable_credential(pool, "postgresql").await;
    let run = new_query_run(pool, "SELECT 1", credential.id).await;
    QueryRunRepo::update_status(pool, run.id, status::RUN_STATUS_COMPLETED, None)
        .await
        .unwrap();

    for index in 0..count {
        let client = ClientRepo::upsert_minimal(pool, &format!("C{index}"), "MARIA SILVA", credential.id)
            .await
            .unwrap();
        ClientQueryResultRepo::upsert(
            pool,
            &UpsertClientQueryResult {
                run_id: run.id,
                client_id: client.id,
                source_row: None,
                api_response: None,
                success: true,
                error: None,
            },
        )
        .await
        .unwrap();
    }

    let config = MatrixConfigRepo::create(
        pool,
        &CreateMatrixApiConfig {
            name: "main".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "key".to_string(),
            account_code: 77,
        },
    )
    .await
    .unwrap();
    let hsm = HsmTemplateRepo::create(
        pool,
        &CreateHsmTemplate {
            name: "reminder".to_string(),
            hsm_id: 123,
            flow_code: None,
            send_kind: 1,
            description: String::new(),
            slot_descriptions: serde_json::json!({"1": "client name"}),
        },
    )
    .await
    .unwrap();

    CreateDispatchRun {
        title: "send wave".to_string(),
        primary_template_id: hsm.id,
        fallback_template_id: None,
        primary_mapping: serde_json::json!({"1": "nome_cliente"}),
        fallback_mapping: serde_json::json!({}),
        matrix_config_id: config.id,
        query_run_id: run.id,
    }
}

// ---------------------------------------------------------------------------
// Test: query loop terminal states
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn test_query_run_with_zero_rows_ends_in_error(pool: PgPool) {
    let credential = loopback_credential(&pool).await;
    let run = new_query_run(
        &pool,
        "SELECT 'X' AS codigo_cliente WHERE FALSE",
        credential.id,
    )
    .await;

    let ctx = PipelineContext::without_delay(pool.clone());
    query_run::execute(&ctx, run.id).await;

    let run = QueryRunRepo::find_by_id(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, status::RUN_STATUS_ERROR);
    assert_eq!(run.total_rows, 0);
    assert_eq!(run.total_enriched, 0);
    assert_eq!(run.total_errors, 0);
    assert!(run.log.contains("no rows"), "log was: {}", run.log);
    assert!(run.finished_at.is_some());
    assert!(ctx.registry.is_empty());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn test_query_run_with_unqueryable_engine_aborts(pool: PgPool) {
    let credential = unreachable_credential(&pool, "mysql").await;
    let run = new_query_run(&pool, "SELECT 1", credential.id).await;

    let ctx = PipelineContext::without_delay(pool.clone());
    query_run::execute(&ctx, run.id).await;

    let run = QueryRunRepo::find_by_id(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, status::RUN_STATUS_ERROR);
    assert!(run.log.contains("Run aborted"), "log was: {}", run.log);
    assert!(run.log.contains("postgresql"), "log was: {}", run.log);
}

// ---------------------------------------------------------------------------
// Test: dispatch loop terminal states
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn test_dispatch_run_completes_with_item_errors(pool: PgPool) {
    let input = dispatchable_fixture(&pool, 3).await;
    let run = DispatchRunRepo::create(&pool, &input).await.unwrap();

    let ctx = PipelineContext::without_delay(pool.clone());
    dispatch_run::execute(&ctx, run.id).await;

    // No client has a phone, so every item errors; the run itself still
    // completes because the loop visited every item.
    let run = DispatchRunRepo::find_by_id(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, status::DISPATCH_STATUS_COMPLETED);
    assert_eq!(run.total_clients, 3);
    assert_eq!(run.total_sent, 0);
    assert_eq!(run.total_errors, 3);
    assert_eq!(run.total_pending, 0);
    assert!(run.finished_at.is_some());
    assert!(run.log.contains("[3/3]"), "log was: {}", run.log);

    let items = DispatchResultRepo::list_by_run(&pool, run.id).await.unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|item| item.status == status::ITEM_STATUS_ERROR));
    assert!(items
        .iter()
        .all(|item| item.error_detail.as_deref() == Some("client has no phone number")));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn test_dispatch_cancel_mid_loop_retains_processed_items(pool: PgPool) {
    let input = dispatchable_fixture(&pool, 10).await;
    let run = DispatchRunRepo::create(&pool, &input).await.unwrap();

    let mut ctx = PipelineContext::without_delay(pool.clone());
    ctx.item_delay = Duration::from_millis(150);

    let handle = {
        let ctx = ctx.clone();
        let dispatch_id = run.id;
        tokio::spawn(async move { dispatch_run::execute(&ctx, dispatch_id).await })
    };

    // Persist the cancellation while the loop is pacing between items; the
    // next status poll picks it up.
    tokio::time::sleep(Duration::from_millis(300)).await;
    DispatchRunRepo::update_status(
        &pool,
        run.id,
        status::DISPATCH_STATUS_CANCELLED,
        Some("Cancellation requested"),
    )
    .await
    .unwrap();
    handle.await.unwrap();

    let run = DispatchRunRepo::find_by_id(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, status::DISPATCH_STATUS_CANCELLED);
    assert_eq!(run.total_sent, 0);
    assert_eq!(run.total_pending, 0);
    assert!(run.total_errors >= 1);
    assert!(run.log.contains("unsent"), "log was: {}", run.log);

    // Items visited before the cancellation keep their recorded outcome;
    // only the unvisited tail is swept to cancelled.
    let counts: HashMap<String, i64> = DispatchResultRepo::count_by_status(&pool, run.id)
        .await
        .unwrap()
        .into_iter()
        .collect();
    let errored = counts.get(status::ITEM_STATUS_ERROR).copied().unwrap_or(0);
    let cancelled = counts.get(status::ITEM_STATUS_CANCELLED).copied().unwrap_or(0);
    assert!(errored >= 1, "counts were: {counts:?}");
    assert!(cancelled >= 1, "counts were: {counts:?}");
    assert_eq!(errored + cancelled, 10);
    assert_eq!(errored, i64::from(run.total_errors));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn test_dispatch_aborts_when_source_run_not_completed(pool: PgPool) {
    let credential = unreachable_credential(&pool, "postgresql").await;
    let source = new_query_run(&pool, "SELECT 1", credential.id).await;
    let config = MatrixConfigRepo::create(
        &pool,
        &CreateMatrixApiConfig {
            name: "main".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "key".to_string(),
            account_code: 77,
        },
    )
    .await
    .unwrap();
    let hsm = HsmTemplateRepo::create(
        &pool,
        &CreateHsmTemplate {
            name: "reminder".to_string(),
            hsm_id: 123,
            flow_code: None,
            send_kind: 1,
            description: String::new(),
            slot_descriptions: serde_json::json!({}),
        },
    )
    .await
    .unwrap();
    let run = DispatchRunRepo::create(
        &pool,
        &CreateDispatchRun {
            title: "too early".to_string(),
            primary_template_id: hsm.id,
            fallback_template_id: None,
            primary_mapping: serde_json::json!({"1": "nome_cliente"}),
            fallback_mapping: serde_json::json!({}),
            matrix_config_id: config.id,
            query_run_id: source.id,
        },
    )
    .await
    .unwrap();

    let ctx = PipelineContext::without_delay(pool.clone());
    dispatch_run::execute(&ctx, run.id).await;

    let run = DispatchRunRepo::find_by_id(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, status::DISPATCH_STATUS_ERROR);
    assert!(run.log.contains("expected completed"), "log was: {}", run.log);
    assert!(ctx.registry.is_empty());
}
