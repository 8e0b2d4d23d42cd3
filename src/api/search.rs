use axum::extract::State;
use axum::Json;

use crate::api::OperationResponse;
use crate::error::ServiceError;
use crate::models::SearchRequest;
use crate::state::AppState;

/// POST /search - Lexical search over a covering index, reranked by composite score
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> OperationResponse {
    let Some(guard) = state.gate.try_acquire() else {
        tracing::warn!("Refusing search: another operation holds the gate");
        return ServiceError::Busy.into();
    };

    let query = req.query.clone();
    let result = state
        .engine
        .spawn(guard, req)
        .await
        .unwrap_or_else(|e| Err(e.into()));

    match result {
        Ok(results) => OperationResponse::done(results),
        Err(ServiceError::NoSuitableIndex) => {
            tracing::info!("No index covers the requested selection");
            ServiceError::NoSuitableIndex.into()
        }
        Err(e) => {
            tracing::error!("Search for {query:?} failed: {e:#}");
            e.into()
        }
    }
}
