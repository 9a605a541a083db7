// main.rs
mod auth;
mod config;
mod docs;
mod error;
mod handlers;
mod history;
mod http;
mod hub;
mod messages;
mod metrics;
mod models;
mod registry;
mod robots;

use std::sync::Arc;

use auth::AuthGate;
use history::{HistorySink, JsonlHistory, MemoryHistory};
use hub::Hub;
use models::AppState;
use robots::RobotSubsystem;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "casa_relay=info,tower_http=info".into()),
        )
        .init();

    // Availability over fail-fast: a panicking background task is logged,
    // the relay keeps serving.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("panic: {info}");
    }));

    let settings = config::Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if settings.metrics.enabled {
        metrics::setup_metrics(settings.metrics.port)?;
    }

    let history: Arc<dyn HistorySink> = match &settings.history.path {
        Some(path) => Arc::new(JsonlHistory::new(path)),
        None => Arc::new(MemoryHistory::new()),
    };

    let (robot_events_tx, mut robot_events_rx) = tokio::sync::mpsc::unbounded_channel();
    let robot_subsystem = Arc::new(RobotSubsystem::new(&settings.robots, robot_events_tx));
    for unit in robot_subsystem.units() {
        tracing::info!(id = %unit.id, name = %unit.name, "robot unit enabled");
    }
    let hub = Arc::new(Hub::new(
        AuthGate::new(&settings.auth),
        Arc::clone(&history),
    ));
    hub.set_robot_subsystem(Arc::clone(&robot_subsystem));

    // Subsystem events feed the same state/broadcast path as device pushes.
    let event_hub = Arc::clone(&hub);
    let _ = tokio::spawn(async move {
        while let Some(event) = robot_events_rx.recv().await {
            event_hub.apply_robot_event(event);
        }
    });
    let _ = tokio::spawn(Arc::clone(&robot_subsystem).run_poll_loop());

    let state = AppState {
        hub,
        robots: robot_subsystem,
        history,
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind address: {}", e))?;

    tracing::info!("Server started on {}", settings.server.address);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
