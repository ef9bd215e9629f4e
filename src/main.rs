use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod error;
mod llm;
mod routes;
mod services;
mod settings;
mod store;
mod utils;

/// How often idle rate windows are dropped.
const RATE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("forma=info".parse()?))
        .init();

    info!("starting forma");

    let settings = settings::Settings::from_env()?;
    let provider = Arc::new(llm::OpenAiProvider::new(&settings)?);
    let store = Arc::new(store::MemoryStore::new());
    let port = settings.port;

    let state = routes::AppState::new(settings, provider, store);
    tokio::spawn(Arc::clone(&state.limiter).run_sweeper(RATE_SWEEP_INTERVAL));

    let app = routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "server_listening", addr = %addr, "Forma listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
