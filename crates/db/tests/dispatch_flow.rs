//! Integration tests for the messaging-dispatch side of the repository
//! layer: provider configs, HSM templates, dispatch runs, and per-client
//! dispatch items.

use campaign_core::status;
use campaign_db::models::credential::{CreateDbCredential, CreateHubsoftCredential};
use campaign_db::models::dispatch_run::CreateDispatchRun;
use campaign_db::models::matrix::{CreateHsmTemplate, CreateMatrixApiConfig};
use campaign_db::models::query_run::CreateQueryRun;
use campaign_db::models::query_template::CreateQueryTemplate;
use campaign_db::repositories::{
    ClientRepo, DbCredentialRepo, DispatchResultRepo, DispatchRunRepo, HsmTemplateRepo,
    HubsoftCredentialRepo, MatrixConfigRepo, QueryRunRepo, QueryTemplateRepo,
};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    query_run_id: i64,
    db_credential_id: i64,
    matrix_config_id: i64,
    primary_template_id: i64,
}

async fn fixture(pool: &PgPool) -> Fixture {
    let template = QueryTemplateRepo::create(
        pool,
        &CreateQueryTemplate {
            title: "base".to_string(),
            description: None,
            sql_text: "SELECT 1".to_string(),
        },
    )
    .await
    .unwrap();
    let db_credential = DbCredentialRepo::create(
        pool,
        &CreateDbCredential {
            title: "source".to_string(),
            engine: "postgresql".to_string(),
            host: "db.internal".to_string(),
            port: 5432,
            database_name: "erp".to_string(),
            username: "reader".to_string(),
            password: "pw".to_string(),
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
            base_url: "https://api.hubsoft.example".to_string(),
            token_url: "https://api.hubsoft.example/oauth/token".to_string(),
        },
    )
    .await
    .unwrap();
    let query_run = QueryRunRepo::create(
        pool,
        &CreateQueryRun {
            title: "wave".to_string(),
            template_id: template.id,
            hubsoft_credential_id: hubsoft.id,
            db_credential_id: db_credential.id,
            variable_values: serde_json::json!({}),
        },
    )
    .await
    .unwrap();
    let config = MatrixConfigRepo::create(
        pool,
        &CreateMatrixApiConfig {
            name: "main".to_string(),
            base_url: "https://api.matrix.example".to_string(),
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

    Fixture {
        query_run_id: query_run.id,
        db_credential_id: db_credential.id,
        matrix_config_id: config.id,
        primary_template_id: hsm.id,
    }
}

fn new_dispatch(f: &Fixture, title: &str) -> CreateDispatchRun {
    CreateDispatchRun {
        title: title.to_string(),
        primary_template_id: f.primary_template_id,
        fallback_template_id: None,
        primary_mapping: serde_json::json!({"1": "nome_cliente"}),
        fallback_mapping: serde_json::json!({}),
        matrix_config_id: f.matrix_config_id,
        query_run_id: f.query_run_id,
    }
}

async fn new_client_ids(pool: &PgPool, db_credential_id: i64, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for index in 0..count {
        let client = ClientRepo::upsert_minimal(
            pool,
            &format!("C{index}"),
            "MARIA SILVA",
            db_credential_id,
        )
        .await
        .unwrap();
        ids.push(client.id);
    }
    ids
}

// ---------------------------------------------------------------------------
// Test: dispatch run lifecycle
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_started_at_set_once(pool: PgPool) {
    let f = fixture(&pool).await;
    let run = DispatchRunRepo::create(&pool, &new_dispatch(&f, "send wave")).await.unwrap();
    assert_eq!(run.status, status::DISPATCH_STATUS_PENDING);
    assert!(run.started_at.is_none());

    let started = DispatchRunRepo::update_status(
        &pool,
        run.id,
        status::DISPATCH_STATUS_SENDING,
        Some("Dispatch started"),
    )
    .await
    .unwrap()
    .unwrap();
    let first_start = started.started_at.unwrap();

    // Pause and resume: the original start timestamp is preserved.
    DispatchRunRepo::update_status(&pool, run.id, status::DISPATCH_STATUS_PAUSED, None)
        .await
        .unwrap();
    let resumed = DispatchRunRepo::update_status(
        &pool,
        run.id,
        status::DISPATCH_STATUS_SENDING,
        None,
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(resumed.started_at.unwrap(), first_start);
    assert!(resumed.finished_at.is_none());

    let done = DispatchRunRepo::update_status(
        &pool,
        run.id,
        status::DISPATCH_STATUS_COMPLETED,
        Some("Dispatch completed"),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(done.finished_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_latest_for_query_run(pool: PgPool) {
    let f = fixture(&pool).await;
    assert!(DispatchRunRepo::latest_for_query_run(&pool, f.query_run_id)
        .await
        .unwrap()
        .is_none());

    DispatchRunRepo::create(&pool, &new_dispatch(&f, "first")).await.unwrap();
    let second = DispatchRunRepo::create(&pool, &new_dispatch(&f, "second")).await.unwrap();

    let latest = DispatchRunRepo::latest_for_query_run(&pool, f.query_run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, second.id);
}

// ---------------------------------------------------------------------------
// Test: item queue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_pending_batch_is_reentrant(pool: PgPool) {
    let f = fixture(&pool).await;
    let run = DispatchRunRepo::create(&pool, &new_dispatch(&f, "wave")).await.unwrap();
    let client_ids = new_client_ids(&pool, f.db_credential_id, 3).await;

    let inserted = DispatchResultRepo::create_pending_batch(&pool, run.id, &client_ids)
        .await
        .unwrap();
    assert_eq!(inserted, 3);

    // A second start after a crash re-inserts nothing and touches nothing.
    let again = DispatchResultRepo::create_pending_batch(&pool, run.id, &client_ids)
        .await
        .unwrap();
    assert_eq!(again, 0);
    assert_eq!(DispatchResultRepo::list_pending(&pool, run.id).await.unwrap().len(), 3);

    DispatchRunRepo::set_totals_on_start(&pool, run.id, 3).await.unwrap();
    let run = DispatchRunRepo::find_by_id(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.total_clients, 3);
    assert_eq!(run.total_pending, 3);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_item_transitions(pool: PgPool) {
    let f = fixture(&pool).await;
    let run = DispatchRunRepo::create(&pool, &new_dispatch(&f, "wave")).await.unwrap();
    let client_ids = new_client_ids(&pool, f.db_credential_id, 2).await;
    DispatchResultRepo::create_pending_batch(&pool, run.id, &client_ids)
        .await
        .unwrap();
    let items = DispatchResultRepo::list_pending(&pool, run.id).await.unwrap();

    let variables = serde_json::json!({"1": "MARIA SILVA"});
    let sent = DispatchResultRepo::mark_sent(
        &pool,
        items[0].id,
        status::TEMPLATE_PRIMARY,
        &variables,
        &serde_json::json!({"status": "queued"}),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(sent.status, status::ITEM_STATUS_SENT);
    assert_eq!(sent.template_used, status::TEMPLATE_PRIMARY);
    assert!(sent.sent_at.is_some());

    let failed = DispatchResultRepo::mark_error(
        &pool,
        items[1].id,
        status::TEMPLATE_FALLBACK,
        &variables,
        "Matrix API error (500): upstream",
        Some(&serde_json::json!({"error": "upstream"})),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(failed.status, status::ITEM_STATUS_ERROR);
    assert_eq!(failed.template_used, status::TEMPLATE_FALLBACK);
    assert_eq!(failed.attempts, 1);
    assert!(failed.error_detail.unwrap().contains("500"));

    let counts = DispatchResultRepo::count_by_status(&pool, run.id).await.unwrap();
    assert_eq!(
        counts,
        vec![
            (status::ITEM_STATUS_ERROR.to_string(), 1),
            (status::ITEM_STATUS_SENT.to_string(), 1),
        ]
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn test_cancel_pending_skips_finished_items(pool: PgPool) {
    let f = fixture(&pool).await;
    let run = DispatchRunRepo::create(&pool, &new_dispatch(&f, "wave")).await.unwrap();
    let client_ids = new_client_ids(&pool, f.db_credential_id, 3).await;
    DispatchResultRepo::create_pending_batch(&pool, run.id, &client_ids)
        .await
        .unwrap();
    let items = DispatchResultRepo::list_pending(&pool, run.id).await.unwrap();

    DispatchResultRepo::mark_sent(
        &pool,
        items[0].id,
        status::TEMPLATE_PRIMARY,
        &serde_json::json!({}),
        &serde_json::json!({}),
    )
    .await
    .unwrap();

    let cancelled = DispatchResultRepo::cancel_pending(&pool, run.id).await.unwrap();
    assert_eq!(cancelled, 2);

    let all = DispatchResultRepo::list_by_run(&pool, run.id).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].status, status::ITEM_STATUS_SENT);
    assert!(all[1..]
        .iter()
        .all(|item| item.status == status::ITEM_STATUS_CANCELLED));
}
