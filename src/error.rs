/// Result type for build and search operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failures surfaced by the index builder and the retrieval engine.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Another build or search holds the exclusivity gate. Retryable.
    #[error("another index operation is in progress")]
    Busy,

    /// No registered index covers the requested selection and model.
    #[error("no suitable index was found")]
    NoSuitableIndex,

    /// A model was requested but the prediction service returned nothing for this issue.
    #[error("missing prediction for issue {issue_id} ({issue_key})")]
    MissingPrediction { issue_id: String, issue_key: String },

    /// Timeout or transport error from an external collaborator.
    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        reason: String,
    },

    /// Issue-level weights with no row in the comment-weight table.
    #[error("unsupported weight configuration: {0}")]
    UnsupportedWeightConfiguration(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn collaborator(collaborator: &'static str, reason: impl ToString) -> Self {
        ServiceError::CollaboratorUnavailable {
            collaborator,
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable kind used in API envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Busy => "busy",
            ServiceError::NoSuitableIndex => "missing-indexes",
            ServiceError::MissingPrediction { .. } => "missing-prediction",
            ServiceError::CollaboratorUnavailable { .. }
            | ServiceError::UnsupportedWeightConfiguration(_)
            | ServiceError::Internal(_) => "unexpected-error",
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Internal(anyhow::anyhow!("blocking task failed: {err}"))
    }
}
