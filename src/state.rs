use std::sync::Arc;

use crate::config::Config;
use crate::gate::ExclusivityGate;
use crate::index::builder::IndexBuilder;
use crate::index::registry::IndexRegistry;
use crate::search::engine::SearchEngine;
use crate::sources::{http, Collaborators};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<IndexRegistry>,
    pub gate: ExclusivityGate,
    pub builder: IndexBuilder,
    pub engine: SearchEngine,
}

impl AppState {
    /// State backed by the HTTP collaborators described in `config`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(config.collaborator_timeout())
            .danger_accept_invalid_certs(config.collaborators.allow_unsafe_ssl)
            .build()?;
        let collaborators = http::collaborators(http_client, &config.collaborators);
        Self::with_collaborators(config, collaborators)
    }

    /// State backed by arbitrary collaborators.
    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> anyhow::Result<Self> {
        // Ensure data directories exist
        std::fs::create_dir_all(config.index_dir())?;

        let registry = Arc::new(IndexRegistry::open_or_create(&config.registry_path())?);

        let builder = IndexBuilder::new(
            registry.clone(),
            collaborators.clone(),
            config.index_dir(),
            config.missing_prediction,
            config.writer_heap_bytes,
        );
        let engine = SearchEngine::new(registry.clone(), collaborators, config.ranking.clone());

        Ok(Self {
            config,
            registry,
            gate: ExclusivityGate::new(),
            builder,
            engine,
        })
    }
}
