use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

/// Which projects qualify for an index, grouped by repository namespace.
///
/// Backed by ordered collections so iteration and serialization are canonical
/// regardless of the order the caller listed namespaces or projects in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectSelection(BTreeMap<String, BTreeSet<String>>);

impl ProjectSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add projects under a namespace (builder style).
    pub fn with<I, S>(mut self, namespace: &str, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(namespace.to_string())
            .or_default()
            .extend(projects.into_iter().map(Into::into));
        self
    }

    pub fn contains(&self, namespace: &str, project: &str) -> bool {
        self.0
            .get(namespace)
            .is_some_and(|projects| projects.contains(project))
    }

    /// All `(namespace, project)` pairs in canonical order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(namespace, projects)| {
            projects
                .iter()
                .map(move |project| (namespace.as_str(), project.as_str()))
        })
    }

    /// Issue-database tags (`<namespace>-<project>`) selecting the issues of this selection.
    pub fn tags(&self) -> Vec<String> {
        self.pairs()
            .map(|(namespace, project)| format!("{namespace}-{project}"))
            .collect()
    }
}

/// Machine-predicted issue labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Existence,
    Property,
    Executive,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::Existence, Label::Property, Label::Executive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Existence => "existence",
            Label::Property => "property",
            Label::Executive => "executive",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One label prediction from the prediction service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelPrediction {
    pub prediction: bool,
    pub confidence: f64,
}

/// Per-label predictions for one issue.
pub type LabelPredictions = BTreeMap<Label, LabelPrediction>;

/// Per-label label filter of a search request. `None` means "don't care".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFilters {
    #[serde(default)]
    pub existence: Option<bool>,
    #[serde(default)]
    pub property: Option<bool>,
    #[serde(default)]
    pub executive: Option<bool>,
}

impl LabelFilters {
    pub fn get(&self, label: Label) -> Option<bool> {
        match label {
            Label::Existence => self.existence,
            Label::Property => self.property,
            Label::Executive => self.executive,
        }
    }

    /// Labels that constrain the query, with the required prediction.
    pub fn clauses(&self) -> Vec<(Label, bool)> {
        Label::ALL
            .iter()
            .filter_map(|&label| self.get(label).map(|value| (label, value)))
            .collect()
    }
}

/// An issue as returned by the issue source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// Concatenated discussion text, when the source has any.
    #[serde(default)]
    pub comments: Option<String>,
}

/// A document written into an issue index. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueDocument {
    pub id: String,
    pub project: String,
    pub key: String,
    pub summary: String,
    pub description: String,
    /// Lexically searchable text: summary, description and comments.
    pub text: String,
    pub comments: String,
    pub predictions: LabelPredictions,
}

impl IssueDocument {
    pub fn from_issue(issue: Issue, predictions: LabelPredictions) -> Self {
        let comments = issue.comments.unwrap_or_default();
        let project = issue
            .key
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string();
        let text = format!("{}. {}.{}", issue.summary, issue.description, comments);

        Self {
            id: issue.id,
            project,
            key: issue.key,
            summary: issue.summary,
            description: issue.description,
            text,
            comments,
            predictions,
        }
    }
}

/// A registered, fully written index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub identity: String,
    pub data_source: String,
    pub selection: ProjectSelection,
    pub model_id: Option<String>,
    pub model_version: Option<String>,
    /// Directory holding the tantivy index for this identity.
    pub location: PathBuf,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

/// Per-label confidences attached to a comment. Any of them may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelConfidences {
    #[serde(default)]
    pub existence: Option<f64>,
    #[serde(default)]
    pub property: Option<f64>,
    #[serde(default)]
    pub executive: Option<f64>,
}

impl LabelConfidences {
    pub fn get(&self, label: Label) -> Option<f64> {
        match label {
            Label::Existence => self.existence,
            Label::Property => self.property,
            Label::Executive => self.executive,
        }
    }
}

/// A discussion comment joined in at query time.
///
/// Read in the comment store's snake_case, written to the front end in camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct CommentRecord {
    pub id: String,
    pub issue_key: String,
    #[serde(default)]
    pub issue_id: Option<String>,
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub confidences: Option<LabelConfidences>,
}

/// Attachment metadata joined in at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct AttachmentMeta {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Attachments keyed by issue id.
pub type AttachmentsByIssue = HashMap<String, Vec<AttachmentMeta>>;

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResult {
    pub issue_id: String,
    pub issue_key: String,
    pub summary: String,
    pub description: String,
    /// Comment blob stored in the index at build time.
    pub comments: String,
    pub predictions: LabelPredictions,
    /// Comments joined from the comment store.
    pub comment_records: Vec<CommentRecord>,
    pub attachments: Vec<AttachmentMeta>,
    pub hit_score: f32,
    pub composite_score: f64,
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    pub identity: String,
    pub indexed: usize,
    /// Issues left out because the requested model had no prediction for them.
    pub skipped_missing_prediction: usize,
    pub with_comments: usize,
}

/// POST /create-index body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndexRequest {
    pub data_source: String,
    pub selection: ProjectSelection,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub model_version: Option<String>,
}

/// POST /search body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub selection: ProjectSelection,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub label_filters: LabelFilters,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Idle,
    Busy,
}
