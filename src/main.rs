use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use issue_search::api;
use issue_search::config::Config;
use issue_search::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Malformed or unsupported ranking weights abort startup here
    let config = Config::from_env()?;
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Prediction service: {}",
        config.collaborators.prediction_url
    );

    let state = AppState::new(config.clone())?;
    tracing::info!("{} index(es) registered", state.registry.list().len());

    let app = Router::new()
        .route("/index-status", get(api::index::index_status))
        .route("/create-index", post(api::index::create_index))
        .route("/indexes", get(api::index::list_indexes))
        .route("/search", post(api::search::search))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
