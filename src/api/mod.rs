//! axum handlers for the front-end protocol.
//!
//! Every operation answers with an [`OperationResponse`] envelope, so the
//! front end only has to branch on `result`.

pub mod index;
pub mod search;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::error::ServiceError;

/// `{ "result": <kind>, "payload": ... }`
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub result: &'static str,
    pub payload: Value,
    #[serde(skip)]
    status: StatusCode,
}

impl OperationResponse {
    pub fn done<T: Serialize>(payload: T) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self {
                result: "done",
                payload,
                status: StatusCode::OK,
            },
            Err(e) => Self::from(ServiceError::Internal(e.into())),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ServiceError> for OperationResponse {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::NoSuitableIndex => StatusCode::NOT_FOUND,
            ServiceError::MissingPrediction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::CollaboratorUnavailable { .. }
            | ServiceError::UnsupportedWeightConfiguration(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = match &err {
            ServiceError::MissingPrediction {
                issue_id,
                issue_key,
            } => serde_json::json!({
                "message": err.to_string(),
                "issueId": issue_id,
                "issueKey": issue_key,
            }),
            _ => serde_json::json!({ "message": format!("{err:#}") }),
        };

        Self {
            result: err.kind(),
            payload,
            status,
        }
    }
}

impl IntoResponse for OperationResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelopes() {
        let busy = OperationResponse::from(ServiceError::Busy);
        assert_eq!(busy.result, "busy");
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

        let missing = OperationResponse::from(ServiceError::NoSuitableIndex);
        assert_eq!(missing.result, "missing-indexes");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let prediction = OperationResponse::from(ServiceError::MissingPrediction {
            issue_id: "7".to_string(),
            issue_key: "P1-7".to_string(),
        });
        assert_eq!(prediction.result, "missing-prediction");
        assert_eq!(prediction.payload["issueKey"], "P1-7");

        let timeout = OperationResponse::from(ServiceError::collaborator("comment store", "timed out"));
        assert_eq!(timeout.result, "unexpected-error");
        assert_eq!(timeout.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_done_envelope_serializes_payload() {
        let resp = OperationResponse::done(vec![1, 2, 3]);
        assert_eq!(resp.status(), StatusCode::OK);
        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body, serde_json::json!({"result": "done", "payload": [1, 2, 3]}));
    }
}
