use std::time::Duration;

use campaign_pipeline::PipelineContext;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Seconds between polls when `WORKER_POLL_SECS` is not set.
const DEFAULT_POLL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL")?;
    let poll_secs = std::env::var("WORKER_POLL_SECS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_POLL_SECS);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    campaign_db::MIGRATOR.run(&pool).await?;

    let ctx = PipelineContext::new(pool);
    tracing::info!(poll_secs, "Worker started");

    loop {
        match campaign_worker::poll_once(&ctx).await {
            Ok(launched) if launched > 0 => {
                tracing::info!(launched, "Poll launched runs");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Poll failed: {e}");
            }
        }
        tokio::time::sleep(Duration::from_secs(poll_secs)).await;
    }
}
