use statement_scan::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::worker::RunOutcome,
};
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting statement extraction worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let state = AppState::build(db_pool, &config).expect("Failed to initialize services");

    tracing::info!(
        max_concurrent_jobs = state.worker.settings().max_concurrent_jobs,
        poll_interval_ms = config.poll_interval_ms,
        "Worker ready, starting polling loop"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, stopping worker");
                break;
            }
            _ = async {
                if invoke(&state, &config).await {
                    sleep(config.poll_interval()).await;
                }
            } => {}
        }
    }
}

/// One bounded invocation. Returns `true` when the loop should back off.
async fn invoke(state: &AppState, config: &AppConfig) -> bool {
    match timeout(config.invocation_timeout(), state.worker.run_once()).await {
        Ok(Ok(summary)) => match summary.outcome {
            RunOutcome::Idle => {
                tracing::trace!("No pending jobs, sleeping");
                true
            }
            RunOutcome::AtCapacity { processing } => {
                tracing::debug!(processing, "All slots busy, sleeping");
                true
            }
            RunOutcome::Processed { completed, failed, .. } => {
                tracing::debug!(completed, failed, "Invocation finished, polling again");
                false
            }
        },
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Worker invocation failed, will retry");
            true
        }
        Err(_) => {
            // Jobs left in processing are picked up by the staleness sweep.
            tracing::warn!(
                timeout_secs = config.invocation_timeout_secs,
                "Worker invocation timed out"
            );
            true
        }
    }
}
