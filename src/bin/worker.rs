use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use orchestrator::{
    auth::jwt::JwtService, config::AppConfig, db, default_handlers, state::AppState,
    storage::S3Storage, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        reminder_interval_minutes = config.reminder_interval_minutes,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = Arc::new(S3Storage::connect(&config).await?);
    let jwt = JwtService::from_config(&config)?;

    let state = Arc::new(AppState::new(pool, config, storage, jwt));
    let worker = Worker::new(state, default_handlers(), Duration::from_secs(5));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
