//! reqwest clients for the collaborator HTTP APIs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CollaboratorConfig;
use crate::models::{
    AttachmentMeta, AttachmentsByIssue, CommentRecord, Issue, Label, LabelPrediction,
    LabelPredictions, ProjectSelection,
};
use crate::sources::{
    AttachmentStore, Collaborators, CommentStore, IssueSource, PredictionSource,
};

const ISSUE_ATTRIBUTES: [&str; 4] = ["key", "summary", "description", "comments"];

/// Send a GET with a JSON body and decode the JSON response.
async fn get_json<B, R>(client: &reqwest::Client, url: &str, body: &B, what: &str) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let resp = client
        .get(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Failed to call {what} API"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{what} API returned {status}: {body}");
    }

    resp.json()
        .await
        .with_context(|| format!("Failed to parse {what} response"))
}

// ─── Issue source ────────────────────────────────────────

/// Client for the issues database. The base URL is the build's data source.
#[derive(Clone)]
pub struct HttpIssueSource {
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TagEq<'a> {
    #[serde(rename = "$eq")]
    eq: &'a str,
}

#[derive(Serialize)]
struct TagClause<'a> {
    tags: TagEq<'a>,
}

#[derive(Serialize)]
struct IssueIdsRequest<'a> {
    filter: IssueFilter<'a>,
}

#[derive(Serialize)]
struct IssueFilter<'a> {
    #[serde(rename = "$or")]
    or: Vec<TagClause<'a>>,
}

#[derive(Deserialize)]
struct IssueIdsResponse {
    issue_ids: Vec<String>,
}

#[derive(Serialize)]
struct IssueDataRequest<'a> {
    issue_ids: &'a [String],
    attributes: &'a [&'a str],
}

#[derive(Deserialize)]
struct IssueDataResponse {
    data: HashMap<String, IssueAttributes>,
}

#[derive(Deserialize)]
struct IssueAttributes {
    key: String,
    summary: Option<String>,
    description: Option<String>,
    comments: Option<String>,
}

impl HttpIssueSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IssueSource for HttpIssueSource {
    async fn fetch_issues(
        &self,
        data_source: &str,
        selection: &ProjectSelection,
    ) -> Result<Vec<Issue>> {
        let tags = selection.tags();
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let base = data_source.trim_end_matches('/');

        let ids_req = IssueIdsRequest {
            filter: IssueFilter {
                or: tags
                    .iter()
                    .map(|tag| TagClause {
                        tags: TagEq { eq: tag },
                    })
                    .collect(),
            },
        };
        let ids: IssueIdsResponse =
            get_json(&self.client, &format!("{base}/issue-ids"), &ids_req, "issue-ids").await?;

        if ids.issue_ids.is_empty() {
            return Ok(Vec::new());
        }

        let data_req = IssueDataRequest {
            issue_ids: &ids.issue_ids,
            attributes: &ISSUE_ATTRIBUTES,
        };
        let mut data: IssueDataResponse =
            get_json(&self.client, &format!("{base}/issue-data"), &data_req, "issue-data").await?;

        let mut issues = Vec::with_capacity(ids.issue_ids.len());
        for id in ids.issue_ids {
            let Some(attrs) = data.data.remove(&id) else {
                tracing::warn!("Issue {id} listed but no data returned");
                continue;
            };
            issues.push(Issue {
                id,
                key: attrs.key,
                summary: attrs.summary.unwrap_or_default(),
                description: attrs.description.unwrap_or_default(),
                comments: attrs.comments.filter(|c| !c.is_empty()),
            });
        }

        Ok(issues)
    }
}

// ─── Prediction service ──────────────────────────────────

#[derive(Clone)]
pub struct HttpPredictionSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    issue_ids: &'a [String],
}

#[derive(Deserialize)]
struct PredictionResponse {
    predictions: HashMap<String, Option<BTreeMap<String, LabelPrediction>>>,
}

impl HttpPredictionSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PredictionSource for HttpPredictionSource {
    async fn fetch_predictions(
        &self,
        model_id: &str,
        model_version: &str,
        issue_ids: &[String],
    ) -> Result<HashMap<String, LabelPredictions>> {
        let url = format!(
            "{}/models/{model_id}/versions/{model_version}/predictions",
            self.base_url
        );
        let body: PredictionResponse = get_json(
            &self.client,
            &url,
            &PredictionRequest { issue_ids },
            "prediction",
        )
        .await?;

        Ok(body
            .predictions
            .into_iter()
            .filter_map(|(id, classes)| {
                let classes = classes?;
                let labels: LabelPredictions = Label::ALL
                    .iter()
                    .filter_map(|label| classes.get(label.as_str()).map(|p| (*label, *p)))
                    .collect();
                Some((id, labels))
            })
            .collect())
    }
}

// ─── Comment store ───────────────────────────────────────

/// Comment store client. Without a base URL it returns no comments.
#[derive(Clone)]
pub struct HttpCommentStore {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    issue_keys: &'a [String],
    min_length: usize,
}

#[derive(Deserialize)]
struct CommentResponse {
    comments: Vec<CommentRecord>,
}

impl HttpCommentStore {
    pub fn new(client: reqwest::Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl CommentStore for HttpCommentStore {
    async fn fetch_comments(
        &self,
        issue_keys: &[String],
        min_body_len: usize,
    ) -> Result<Vec<CommentRecord>> {
        let Some(base) = self.base_url.as_deref() else {
            return Ok(Vec::new());
        };
        if issue_keys.is_empty() {
            return Ok(Vec::new());
        }

        let req = CommentRequest {
            issue_keys,
            min_length: min_body_len,
        };
        let body: CommentResponse =
            get_json(&self.client, &format!("{base}/comments"), &req, "comment store").await?;
        Ok(body.comments)
    }
}

// ─── Attachment store ────────────────────────────────────

/// Attachment store client. Without a base URL it returns no attachments.
#[derive(Clone)]
pub struct HttpAttachmentStore {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Serialize)]
struct AttachmentRequest<'a> {
    issue_ids: &'a [String],
}

#[derive(Deserialize)]
struct AttachmentResponse {
    attachments: HashMap<String, Vec<AttachmentMeta>>,
}

impl HttpAttachmentStore {
    pub fn new(client: reqwest::Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl AttachmentStore for HttpAttachmentStore {
    async fn fetch_attachments(&self, issue_ids: &[String]) -> Result<AttachmentsByIssue> {
        let Some(base) = self.base_url.as_deref() else {
            return Ok(AttachmentsByIssue::new());
        };
        if issue_ids.is_empty() {
            return Ok(AttachmentsByIssue::new());
        }

        let body: AttachmentResponse = get_json(
            &self.client,
            &format!("{base}/attachments"),
            &AttachmentRequest { issue_ids },
            "attachment store",
        )
        .await?;
        Ok(body.attachments)
    }
}

/// Build the HTTP collaborator set from configuration.
pub fn collaborators(client: reqwest::Client, config: &CollaboratorConfig) -> Collaborators {
    Collaborators {
        issues: Arc::new(HttpIssueSource::new(client.clone())),
        predictions: Arc::new(HttpPredictionSource::new(
            client.clone(),
            &config.prediction_url,
        )),
        comments: Arc::new(HttpCommentStore::new(
            client.clone(),
            config.comment_store_url.as_deref(),
        )),
        attachments: Arc::new(HttpAttachmentStore::new(
            client,
            config.attachment_store_url.as_deref(),
        )),
        timeout: Duration::from_secs(config.timeout_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_filter_wire_format() {
        let tags = vec!["Apache-HADOOP".to_string()];
        let req = IssueIdsRequest {
            filter: IssueFilter {
                or: tags.iter().map(|t| TagClause { tags: TagEq { eq: t } }).collect(),
            },
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"filter": {"$or": [{"tags": {"$eq": "Apache-HADOOP"}}]}})
        );
    }

    #[test]
    fn test_prediction_response_tolerates_nulls() {
        let body: PredictionResponse = serde_json::from_value(serde_json::json!({
            "predictions": {
                "1": {
                    "existence": {"prediction": true, "confidence": 0.9},
                    "property": {"prediction": false, "confidence": 0.2},
                    "executive": {"prediction": false, "confidence": 0.7}
                },
                "2": null
            }
        }))
        .unwrap();
        assert!(body.predictions["2"].is_none());
        assert_eq!(body.predictions["1"].as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unconfigured_stores_return_nothing() {
        let client = reqwest::Client::new();
        let comments = HttpCommentStore::new(client.clone(), None);
        let attachments = HttpAttachmentStore::new(client, None);

        let keys = vec!["P1-1".to_string()];
        assert!(comments.fetch_comments(&keys, 20).await.unwrap().is_empty());
        assert!(attachments.fetch_attachments(&keys).await.unwrap().is_empty());
    }
}
