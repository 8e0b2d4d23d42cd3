//! External collaborators: issue source, prediction service, comment store
//! and attachment store.
//!
//! Each is a trait so the builder and the retrieval engine can run against
//! the HTTP clients in [`http`] or the in-memory fixtures in [`memory`].

pub mod http;
pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{AttachmentsByIssue, CommentRecord, Issue, LabelPredictions, ProjectSelection};

#[async_trait]
pub trait IssueSource: Send + Sync {
    /// All issues of the selected projects, with key, summary, description
    /// and comment text.
    async fn fetch_issues(
        &self,
        data_source: &str,
        selection: &ProjectSelection,
    ) -> anyhow::Result<Vec<Issue>>;
}

#[async_trait]
pub trait PredictionSource: Send + Sync {
    /// Predictions keyed by issue id. Issues the model has nothing for are absent.
    async fn fetch_predictions(
        &self,
        model_id: &str,
        model_version: &str,
        issue_ids: &[String],
    ) -> anyhow::Result<HashMap<String, LabelPredictions>>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Comments of the given issues whose body is longer than `min_body_len`.
    async fn fetch_comments(
        &self,
        issue_keys: &[String],
        min_body_len: usize,
    ) -> anyhow::Result<Vec<CommentRecord>>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn fetch_attachments(&self, issue_ids: &[String]) -> anyhow::Result<AttachmentsByIssue>;
}

/// The collaborators an operation may call, plus the timeout applied to each call.
#[derive(Clone)]
pub struct Collaborators {
    pub issues: Arc<dyn IssueSource>,
    pub predictions: Arc<dyn PredictionSource>,
    pub comments: Arc<dyn CommentStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub timeout: Duration,
}

/// Run one collaborator call under the timeout, mapping failures to
/// [`ServiceError::CollaboratorUnavailable`].
pub(crate) async fn call<T, F>(
    collaborator: &'static str,
    timeout: Duration,
    fut: F,
) -> ServiceResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!("{collaborator} call failed: {e:#}");
            Err(ServiceError::collaborator(collaborator, format!("{e:#}")))
        }
        Err(_) => {
            tracing::warn!("{collaborator} call timed out after {timeout:?}");
            Err(ServiceError::collaborator(
                collaborator,
                format!("timed out after {timeout:?}"),
            ))
        }
    }
}
