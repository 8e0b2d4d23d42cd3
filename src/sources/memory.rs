//! In-memory collaborators for tests and local experiments.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    AttachmentMeta, AttachmentsByIssue, CommentRecord, Issue, LabelPredictions, ProjectSelection,
};
use crate::sources::{AttachmentStore, Collaborators, CommentStore, IssueSource, PredictionSource};

/// Issues tagged with a namespace. An issue's project is its key prefix.
#[derive(Clone, Default)]
pub struct InMemoryIssueSource {
    issues: Arc<RwLock<Vec<(String, Issue)>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryIssueSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issue(self, namespace: &str, issue: Issue) -> Self {
        self.issues.write().push((namespace.to_string(), issue));
        self
    }

    /// Sleep before answering, to exercise collaborator timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the whole corpus.
    pub fn set_issues(&self, issues: Vec<(String, Issue)>) {
        *self.issues.write() = issues;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueSource for InMemoryIssueSource {
    async fn fetch_issues(
        &self,
        _data_source: &str,
        selection: &ProjectSelection,
    ) -> Result<Vec<Issue>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .issues
            .read()
            .iter()
            .filter(|(namespace, issue)| {
                let project = issue.key.split('-').next().unwrap_or_default();
                selection.contains(namespace, project)
            })
            .map(|(_, issue)| issue.clone())
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPredictionSource {
    predictions: Arc<RwLock<HashMap<String, LabelPredictions>>>,
    fail: bool,
}

impl InMemoryPredictionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prediction(self, issue_id: &str, predictions: LabelPredictions) -> Self {
        self.predictions
            .write()
            .insert(issue_id.to_string(), predictions);
        self
    }

    /// Answer every request with an error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl PredictionSource for InMemoryPredictionSource {
    async fn fetch_predictions(
        &self,
        _model_id: &str,
        _model_version: &str,
        issue_ids: &[String],
    ) -> Result<HashMap<String, LabelPredictions>> {
        if self.fail {
            anyhow::bail!("prediction service returned 503");
        }
        let predictions = self.predictions.read();
        Ok(issue_ids
            .iter()
            .filter_map(|id| predictions.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCommentStore {
    comments: Arc<RwLock<Vec<CommentRecord>>>,
    delay: Option<Duration>,
    fail: bool,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comment(self, comment: CommentRecord) -> Self {
        self.comments.write().push(comment);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer every request with an error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn fetch_comments(
        &self,
        issue_keys: &[String],
        min_body_len: usize,
    ) -> Result<Vec<CommentRecord>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("comment store connection refused");
        }

        Ok(self
            .comments
            .read()
            .iter()
            .filter(|c| issue_keys.contains(&c.issue_key))
            .filter(|c| c.body.chars().count() > min_body_len)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAttachmentStore {
    attachments: Arc<RwLock<AttachmentsByIssue>>,
    delay: Option<Duration>,
    fail: bool,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attachment(self, issue_id: &str, attachment: AttachmentMeta) -> Self {
        self.attachments
            .write()
            .entry(issue_id.to_string())
            .or_default()
            .push(attachment);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer every request with an error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn fetch_attachments(&self, issue_ids: &[String]) -> Result<AttachmentsByIssue> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("attachment store returned 500");
        }

        let attachments = self.attachments.read();
        Ok(issue_ids
            .iter()
            .filter_map(|id| attachments.get(id).map(|a| (id.clone(), a.clone())))
            .collect())
    }
}

impl Collaborators {
    /// Collaborator set backed by the given in-memory fixtures.
    pub fn in_memory(
        issues: InMemoryIssueSource,
        predictions: InMemoryPredictionSource,
        comments: InMemoryCommentStore,
        attachments: InMemoryAttachmentStore,
        timeout: Duration,
    ) -> Self {
        Self {
            issues: Arc::new(issues),
            predictions: Arc::new(predictions),
            comments: Arc::new(comments),
            attachments: Arc::new(attachments),
            timeout,
        }
    }
}
