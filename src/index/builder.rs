//! Full index (re)builds.
//!
//! A build always replaces the whole index for its identity. The previous
//! record is dropped and its storage wiped before any collaborator is called,
//! and the new record is only registered after tantivy has committed. A failed
//! rebuild therefore leaves no index for that identity rather than a partial one.

use anyhow::Context;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::MissingPredictionPolicy;
use crate::error::{ServiceError, ServiceResult};
use crate::gate::GateGuard;
use crate::index::identity::derive_identity;
use crate::index::registry::IndexRegistry;
use crate::models::{BuildStats, CreateIndexRequest, IndexRecord, IssueDocument};
use crate::search::bm25::IssueIndex;
use crate::sources::{call, Collaborators};

#[derive(Clone)]
pub struct IndexBuilder {
    registry: Arc<IndexRegistry>,
    collaborators: Collaborators,
    index_dir: PathBuf,
    policy: MissingPredictionPolicy,
    writer_heap_bytes: usize,
}

impl IndexBuilder {
    pub fn new(
        registry: Arc<IndexRegistry>,
        collaborators: Collaborators,
        index_dir: PathBuf,
        policy: MissingPredictionPolicy,
        writer_heap_bytes: usize,
    ) -> Self {
        Self {
            registry,
            collaborators,
            index_dir,
            policy,
            writer_heap_bytes,
        }
    }

    /// Run a build on its own task, which owns the gate guard.
    ///
    /// The gate stays held until the build has finished, even when the caller
    /// stops waiting on the handle (a dropped HTTP request, for instance).
    pub fn spawn(
        &self,
        guard: GateGuard,
        req: CreateIndexRequest,
    ) -> JoinHandle<ServiceResult<BuildStats>> {
        let builder = self.clone();
        tokio::spawn(async move { builder.build(&guard, &req).await })
    }

    /// Build (or rebuild) the index described by `req`. The caller must hold the gate.
    pub async fn build(
        &self,
        _gate: &GateGuard,
        req: &CreateIndexRequest,
    ) -> ServiceResult<BuildStats> {
        let model = match (req.model_id.as_deref(), req.model_version.as_deref()) {
            (Some(id), Some(version)) => Some((id, version)),
            (None, None) => None,
            _ => {
                return Err(ServiceError::Internal(anyhow::anyhow!(
                    "modelId and modelVersion must be given together"
                )))
            }
        };

        let identity = derive_identity(
            &req.data_source,
            &req.selection,
            req.model_id.as_deref(),
            req.model_version.as_deref(),
        );
        let location = self.index_dir.join(&identity);

        self.invalidate(&identity, &location)?;

        tracing::info!(
            "Building index {identity} from {} ({} project(s))",
            req.data_source,
            req.selection.pairs().count()
        );

        let issues = call(
            "issue source",
            self.collaborators.timeout,
            self.collaborators
                .issues
                .fetch_issues(&req.data_source, &req.selection),
        )
        .await?;
        tracing::info!("Fetched {} issue(s) for {identity}", issues.len());

        let mut predictions = match model {
            Some((model_id, model_version)) => {
                let ids: Vec<String> = issues.iter().map(|i| i.id.clone()).collect();
                Some(
                    call(
                        "prediction service",
                        self.collaborators.timeout,
                        self.collaborators
                            .predictions
                            .fetch_predictions(model_id, model_version, &ids),
                    )
                    .await?,
                )
            }
            None => None,
        };

        let mut stats = BuildStats {
            identity: identity.clone(),
            ..BuildStats::default()
        };
        let mut docs = Vec::with_capacity(issues.len());

        for issue in issues {
            let labels = match predictions.as_mut() {
                Some(by_id) => match by_id.remove(&issue.id) {
                    Some(labels) => labels,
                    None => match self.policy {
                        MissingPredictionPolicy::Skip => {
                            tracing::warn!("No prediction for {} ({}), skipping", issue.id, issue.key);
                            stats.skipped_missing_prediction += 1;
                            continue;
                        }
                        MissingPredictionPolicy::Strict => {
                            return Err(ServiceError::MissingPrediction {
                                issue_id: issue.id,
                                issue_key: issue.key,
                            });
                        }
                    },
                },
                None => Default::default(),
            };

            if issue.comments.is_some() {
                stats.with_comments += 1;
            }
            docs.push(IssueDocument::from_issue(issue, labels));
        }

        let heap_bytes = self.writer_heap_bytes;
        let index_location = location.clone();
        let indexed = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let index = IssueIndex::create(&index_location)?;
            index.write_documents(&docs, heap_bytes)
        })
        .await??;
        stats.indexed = indexed;

        self.registry.upsert(IndexRecord {
            identity: identity.clone(),
            data_source: req.data_source.clone(),
            selection: req.selection.clone(),
            model_id: req.model_id.clone(),
            model_version: req.model_version.clone(),
            location,
            document_count: indexed,
            built_at: Utc::now(),
        })?;

        tracing::info!(
            "Index {identity} built: {} indexed, {} skipped for missing predictions, {} with comments",
            stats.indexed,
            stats.skipped_missing_prediction,
            stats.with_comments
        );

        Ok(stats)
    }

    /// Drop any record for `identity` and wipe its storage.
    fn invalidate(&self, identity: &str, location: &std::path::Path) -> ServiceResult<()> {
        if let Some(previous) = self.registry.remove(identity)? {
            tracing::info!("Replacing existing index {identity}");
            if previous.location != location && previous.location.exists() {
                std::fs::remove_dir_all(&previous.location).with_context(|| {
                    format!("Failed to remove {}", previous.location.display())
                })?;
            }
        }
        if location.exists() {
            std::fs::remove_dir_all(location)
                .with_context(|| format!("Failed to remove {}", location.display()))?;
        }
        Ok(())
    }
}
