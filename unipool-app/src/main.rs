use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unipool_app::{audit_ledger, AppState};
use unipool_store::app_config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unipool_app=debug,unipool_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(backend = ?config.store.backend, "Starting UniPool seat engine");

    let (state, worker) = AppState::build(&config).await?;

    let report = audit_ledger(state.rides.as_ref(), state.bookings.as_ref()).await?;
    if report.is_clean() {
        tracing::info!(rides = report.rides_checked, "Seat ledger is consistent");
    } else {
        tracing::warn!("Seat ledger audit report: {}", serde_json::to_string(&report)?);
    }

    // Dropping the state closes the event channel so the worker can drain.
    drop(state);
    if let Some(worker) = worker {
        worker.await?;
    }

    Ok(())
}
