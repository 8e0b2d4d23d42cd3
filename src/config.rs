use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::search::rerank::{LabelVector, RankingConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the index registry and the tantivy indexes are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// External collaborator endpoints and timeouts
    pub collaborators: CollaboratorConfig,
    /// What to do with issues the requested model has no prediction for
    pub missing_prediction: MissingPredictionPolicy,
    /// Tantivy writer heap size in bytes
    pub writer_heap_bytes: usize,
    /// Composite score configuration
    pub ranking: RankingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Base URL of the prediction service
    pub prediction_url: String,
    /// Base URL of the comment store. If None, no comments are joined.
    pub comment_store_url: Option<String>,
    /// Base URL of the attachment store. If None, no attachments are joined.
    pub attachment_store_url: Option<String>,
    /// Accept self-signed certificates from collaborators
    pub allow_unsafe_ssl: bool,
    /// Timeout applied to every collaborator call, in seconds
    pub timeout_secs: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            prediction_url: "http://localhost:8000".to_string(),
            comment_store_url: None,
            attachment_store_url: None,
            allow_unsafe_ssl: false,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPredictionPolicy {
    /// Leave the issue out of the index and count it.
    #[default]
    Skip,
    /// Abort the build, reporting the offending issue.
    Strict,
}

impl std::str::FromStr for MissingPredictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown missing-prediction policy: {other}")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:8042".to_string(),
            collaborators: CollaboratorConfig::default(),
            missing_prediction: MissingPredictionPolicy::default(),
            writer_heap_bytes: 50_000_000,
            ranking: RankingConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    ///
    /// Fails when the ranking weights are malformed or unsupported, so a bad
    /// weight setting stops startup instead of falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = var("ISSUE_SEARCH_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = var("ISSUE_SEARCH_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(url) = var("ISSUE_SEARCH_PREDICTION_URL") {
            config.collaborators.prediction_url = url;
        }
        if let Some(url) = var("ISSUE_SEARCH_COMMENT_STORE_URL") {
            config.collaborators.comment_store_url = Some(url);
        }
        if let Some(url) = var("ISSUE_SEARCH_ATTACHMENT_STORE_URL") {
            config.collaborators.attachment_store_url = Some(url);
        }
        if let Some(val) = var("SE_ALLOW_UNSAFE_SSL") {
            config.collaborators.allow_unsafe_ssl = val.eq_ignore_ascii_case("true");
        }
        if let Some(val) = var("ISSUE_SEARCH_COLLABORATOR_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.collaborators.timeout_secs = v;
            }
        }
        if let Some(val) = var("ISSUE_SEARCH_MISSING_PREDICTION") {
            match val.parse() {
                Ok(policy) => config.missing_prediction = policy,
                Err(e) => tracing::warn!("Ignoring ISSUE_SEARCH_MISSING_PREDICTION: {e}"),
            }
        }
        if let Some(val) = var("ISSUE_SEARCH_WRITER_HEAP_BYTES") {
            if let Ok(v) = val.parse() {
                config.writer_heap_bytes = v;
            }
        }

        // Ranking config. Weights are never defaulted on bad input.
        if let Some(val) = var("ISSUE_SEARCH_HIT_SCORE_WEIGHT") {
            config.ranking.hit_score_weight = val
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid ISSUE_SEARCH_HIT_SCORE_WEIGHT: {val:?}"))?;
        }
        if let Some(val) = var("ISSUE_SEARCH_ISSUE_WEIGHTS") {
            config.ranking.issue_weights = parse_weights(&val).with_context(|| {
                format!("Invalid ISSUE_SEARCH_ISSUE_WEIGHTS: {val:?}, expected \"w_exe,w_ext,w_prop\"")
            })?;
        }
        if let Some(val) = var("ISSUE_SEARCH_CANDIDATE_OVERSHOOT") {
            if let Ok(v) = val.parse() {
                config.ranking.candidate_overshoot = v;
            }
        }
        if let Some(val) = var("ISSUE_SEARCH_MIN_COMMENT_LENGTH") {
            if let Ok(v) = val.parse() {
                config.ranking.min_comment_length = v;
            }
        }

        config.ranking.scorer()?;
        Ok(config)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("index_data.json")
    }

    pub fn collaborator_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.collaborators.timeout_secs)
    }
}

/// Parse `"w_exe,w_ext,w_prop"`.
fn parse_weights(raw: &str) -> Option<LabelVector> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [executive, existence, property] => Some(LabelVector {
            executive: *executive,
            existence: *existence,
            property: *property,
        }),
        _ => None,
    }
}
