use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::OperationResponse;
use crate::error::ServiceError;
use crate::models::{CreateIndexRequest, IndexStatus, ProjectSelection};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: IndexStatus,
}

/// GET /index-status - Non-blocking read of the exclusivity gate
pub async fn index_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.gate.status(),
    })
}

/// POST /create-index - Build or rebuild the index for the requested parameters
pub async fn create_index(
    State(state): State<AppState>,
    Json(req): Json<CreateIndexRequest>,
) -> OperationResponse {
    let Some(guard) = state.gate.try_acquire() else {
        tracing::warn!("Refusing create-index: another operation holds the gate");
        return ServiceError::Busy.into();
    };

    let data_source = req.data_source.clone();
    // The build task owns the guard, so a dropped request does not free the gate early
    let result = state
        .builder
        .spawn(guard, req)
        .await
        .unwrap_or_else(|e| Err(e.into()));

    match result {
        Ok(stats) => OperationResponse::done(stats),
        Err(e) => {
            tracing::error!("Index build for {data_source} failed: {e:#}");
            e.into()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub identity: String,
    pub data_source: String,
    pub selection: ProjectSelection,
    pub model_id: Option<String>,
    pub model_version: Option<String>,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

/// GET /indexes - Registered indexes in registry order
pub async fn list_indexes(State(state): State<AppState>) -> Json<Vec<IndexSummary>> {
    let summaries = state
        .registry
        .records()
        .into_iter()
        .map(|r| IndexSummary {
            identity: r.identity,
            data_source: r.data_source,
            selection: r.selection,
            model_id: r.model_id,
            model_version: r.model_version,
            document_count: r.document_count,
            built_at: r.built_at,
        })
        .collect();
    Json(summaries)
}
