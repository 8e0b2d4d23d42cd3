//! Retrieval: pick a covering index, run the lexical query, join comments and
//! attachments, then rerank by composite score.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{ServiceError, ServiceResult};
use crate::gate::GateGuard;
use crate::index::registry::IndexRegistry;
use crate::models::{CommentRecord, ScoredResult, SearchRequest};
use crate::search::bm25::{IssueHit, IssueIndex};
use crate::search::rerank::{normalize_hit_score, CompositeScorer, LabelVector, RankingConfig};
use crate::sources::{call, Collaborators};

#[derive(Clone)]
pub struct SearchEngine {
    registry: Arc<IndexRegistry>,
    collaborators: Collaborators,
    ranking: RankingConfig,
}

impl SearchEngine {
    pub fn new(
        registry: Arc<IndexRegistry>,
        collaborators: Collaborators,
        ranking: RankingConfig,
    ) -> Self {
        Self {
            registry,
            collaborators,
            ranking,
        }
    }

    /// Run a search on its own task, which owns the gate guard until it finishes.
    pub fn spawn(
        &self,
        guard: GateGuard,
        req: SearchRequest,
    ) -> JoinHandle<ServiceResult<Vec<ScoredResult>>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.search(&guard, &req).await })
    }

    /// Run one search. The caller must hold the gate.
    pub async fn search(
        &self,
        _gate: &GateGuard,
        req: &SearchRequest,
    ) -> ServiceResult<Vec<ScoredResult>> {
        let record = self
            .registry
            .find_covering(
                &req.selection,
                req.model_id.as_deref(),
                req.model_version.as_deref(),
            )
            .ok_or(ServiceError::NoSuitableIndex)?;
        let scorer = self.ranking.scorer()?;

        tracing::debug!("Searching index {} for {:?}", record.identity, req.query);

        let query = req.query.clone();
        let clauses = req.label_filters.clauses();
        let candidates = req.limit.saturating_add(self.ranking.candidate_overshoot);
        let location = record.location.clone();
        let hits = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<IssueHit>> {
            IssueIndex::open(&location)?.search(&query, &clauses, candidates)
        })
        .await??;

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = hits.iter().map(|h| h.issue_key.clone()).collect();
        let ids: Vec<String> = hits.iter().map(|h| h.issue_id.clone()).collect();
        let timeout = self.collaborators.timeout;

        let (comments, mut attachments) = tokio::try_join!(
            call(
                "comment store",
                timeout,
                self.collaborators
                    .comments
                    .fetch_comments(&keys, self.ranking.min_comment_length),
            ),
            call(
                "attachment store",
                timeout,
                self.collaborators.attachments.fetch_attachments(&ids),
            ),
        )?;

        let mut comments_by_key: HashMap<String, Vec<CommentRecord>> = HashMap::new();
        for comment in comments {
            comments_by_key
                .entry(comment.issue_key.clone())
                .or_default()
                .push(comment);
        }

        let mut results: Vec<ScoredResult> = hits
            .into_iter()
            .map(|hit| ScoredResult {
                comment_records: comments_by_key.remove(&hit.issue_key).unwrap_or_default(),
                attachments: attachments.remove(&hit.issue_id).unwrap_or_default(),
                issue_id: hit.issue_id,
                issue_key: hit.issue_key,
                summary: hit.summary,
                description: hit.description,
                comments: hit.comments,
                predictions: hit.predictions,
                hit_score: hit.score,
                composite_score: 0.0,
            })
            .collect();

        rank(&mut results, &scorer);
        results.truncate(req.limit);

        tracing::info!(
            "Search over {} returned {} result(s)",
            record.identity,
            results.len()
        );
        Ok(results)
    }
}

/// Fill in composite scores and sort descending. Ties keep lexical order.
fn rank(results: &mut [ScoredResult], scorer: &CompositeScorer) {
    let max_score = results
        .iter()
        .map(|r| r.hit_score)
        .fold(0.0f32, f32::max);

    for result in results.iter_mut() {
        let issue = LabelVector::from_predictions(&result.predictions);
        let comments = LabelVector::comment_means(&result.comment_records);
        result.composite_score = scorer.score(
            normalize_hit_score(result.hit_score, max_score),
            &issue,
            &comments,
            result.comment_records.len(),
        );
    }

    results.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissingPredictionPolicy;
    use crate::gate::ExclusivityGate;
    use crate::index::builder::IndexBuilder;
    use crate::models::{
        AttachmentMeta, CreateIndexRequest, Issue, Label, LabelConfidences, LabelFilters,
        LabelPrediction, LabelPredictions, ProjectSelection,
    };
    use crate::sources::memory::{
        InMemoryAttachmentStore, InMemoryCommentStore, InMemoryIssueSource,
        InMemoryPredictionSource,
    };
    use std::time::Duration;

    fn issue(id: &str, key: &str, summary: &str) -> Issue {
        Issue {
            id: id.to_string(),
            key: key.to_string(),
            summary: summary.to_string(),
            description: String::new(),
            comments: None,
        }
    }

    fn property(prediction: bool, confidence: f64) -> LabelPredictions {
        let mut p = LabelPredictions::new();
        p.insert(
            Label::Property,
            LabelPrediction {
                prediction,
                confidence,
            },
        );
        p
    }

    fn comment(id: &str, key: &str, property: f64) -> CommentRecord {
        CommentRecord {
            id: id.to_string(),
            issue_key: key.to_string(),
            issue_id: None,
            author: "dev".to_string(),
            body: "this comment is comfortably longer than the threshold".to_string(),
            confidences: Some(LabelConfidences {
                existence: None,
                property: Some(property),
                executive: None,
            }),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        builder: IndexBuilder,
        engine: SearchEngine,
        gate: ExclusivityGate,
    }

    fn fixture(
        issues: InMemoryIssueSource,
        predictions: InMemoryPredictionSource,
        comments: InMemoryCommentStore,
        attachments: InMemoryAttachmentStore,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            Arc::new(IndexRegistry::open_or_create(&dir.path().join("index_data.json")).unwrap());
        let collaborators = Collaborators::in_memory(
            issues,
            predictions,
            comments,
            attachments,
            Duration::from_secs(2),
        );
        let builder = IndexBuilder::new(
            registry.clone(),
            collaborators.clone(),
            dir.path().join("index"),
            MissingPredictionPolicy::Skip,
            15_000_000,
        );
        let engine = SearchEngine::new(registry, collaborators, RankingConfig::default());
        Fixture {
            _dir: dir,
            builder,
            engine,
            gate: ExclusivityGate::new(),
        }
    }

    fn selection() -> ProjectSelection {
        ProjectSelection::new().with("ProjA", ["P1"])
    }

    fn search_request(query: &str, model: bool) -> SearchRequest {
        SearchRequest {
            selection: selection(),
            query: query.to_string(),
            model_id: model.then(|| "m".to_string()),
            model_version: model.then(|| "1".to_string()),
            label_filters: LabelFilters::default(),
            limit: 10,
        }
    }

    async fn build(f: &Fixture, model: bool) {
        let guard = f.gate.try_acquire().unwrap();
        f.builder
            .build(
                &guard,
                &CreateIndexRequest {
                    data_source: "db".to_string(),
                    selection: selection(),
                    model_id: model.then(|| "m".to_string()),
                    model_version: model.then(|| "1".to_string()),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_index_reports_missing() {
        let f = fixture(
            InMemoryIssueSource::new(),
            InMemoryPredictionSource::new(),
            InMemoryCommentStore::new(),
            InMemoryAttachmentStore::new(),
        );
        let guard = f.gate.try_acquire().unwrap();
        let err = f
            .engine
            .search(&guard, &search_request("anything", false))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoSuitableIndex));
    }

    #[tokio::test]
    async fn test_confidence_reorders_equal_lexical_matches() {
        let issues = InMemoryIssueSource::new()
            .with_issue("ProjA", issue("1", "P1-1", "slow query planner"))
            .with_issue("ProjA", issue("2", "P1-2", "slow query planner"));
        let predictions = InMemoryPredictionSource::new()
            .with_prediction("1", property(false, 0.1))
            .with_prediction("2", property(true, 0.9));
        let f = fixture(
            issues,
            predictions,
            InMemoryCommentStore::new(),
            InMemoryAttachmentStore::new(),
        );
        build(&f, true).await;

        let guard = f.gate.try_acquire().unwrap();
        let results = f
            .engine
            .search(&guard, &search_request("planner", true))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].issue_key, "P1-2");
        assert!(results[0].composite_score > results[1].composite_score);
    }

    #[tokio::test]
    async fn test_joins_comments_and_attachments() {
        let issues = InMemoryIssueSource::new()
            .with_issue("ProjA", issue("1", "P1-1", "disk quota exceeded"));
        let predictions =
            InMemoryPredictionSource::new().with_prediction("1", property(true, 0.5));
        let comments = InMemoryCommentStore::new()
            .with_comment(comment("c1", "P1-1", 1.0))
            .with_comment(comment("c2", "P1-1", 0.8))
            .with_comment(comment("c3", "P1-9", 0.0));
        let attachments = InMemoryAttachmentStore::new().with_attachment(
            "1",
            AttachmentMeta {
                id: "a1".to_string(),
                filename: "trace.log".to_string(),
                mime_type: Some("text/plain".to_string()),
                size: Some(120),
                url: None,
            },
        );
        let f = fixture(issues, predictions, comments, attachments);
        build(&f, true).await;

        let guard = f.gate.try_acquire().unwrap();
        let results = f
            .engine
            .search(&guard, &search_request("quota", true))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.comment_records.len(), 2);
        assert_eq!(r.attachments.len(), 1);

        // s = 1, n = 2, property-only weights, comment property mean = 0.9
        let alpha = crate::search::rerank::issue_share(2);
        let expected = 0.5 + 0.5 * (alpha * 0.5 + (1.0 - alpha) * (0.22 * 0.9));
        assert!((r.composite_score - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unbounded_limit_is_served() {
        let issues = InMemoryIssueSource::new()
            .with_issue("ProjA", issue("1", "P1-1", "heap exhaustion"))
            .with_issue("ProjA", issue("2", "P1-2", "heap fragmentation"));
        let f = fixture(
            issues,
            InMemoryPredictionSource::new(),
            InMemoryCommentStore::new(),
            InMemoryAttachmentStore::new(),
        );
        build(&f, false).await;

        let guard = f.gate.try_acquire().unwrap();
        for limit in [usize::MAX, 1 << 40] {
            let mut req = search_request("heap", false);
            req.limit = limit;
            let results = f.engine.search(&guard, &req).await.unwrap();
            assert_eq!(results.len(), 2);
        }
    }

    async fn search_with_stores(
        comments: InMemoryCommentStore,
        attachments: InMemoryAttachmentStore,
    ) -> ServiceResult<Vec<ScoredResult>> {
        let issues =
            InMemoryIssueSource::new().with_issue("ProjA", issue("1", "P1-1", "lost update"));
        let f = fixture(issues, InMemoryPredictionSource::new(), comments, attachments);
        build(&f, false).await;

        let guard = f.gate.try_acquire().unwrap();
        let result = f.engine.search(&guard, &search_request("update", false)).await;
        assert_eq!(f.gate.status(), crate::models::IndexStatus::Busy);
        drop(guard);
        assert_eq!(f.gate.status(), crate::models::IndexStatus::Idle);
        result
    }

    #[tokio::test]
    async fn test_comment_store_failure_aborts_search() {
        let err = search_with_stores(
            InMemoryCommentStore::failing(),
            InMemoryAttachmentStore::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::CollaboratorUnavailable {
                collaborator: "comment store",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_attachment_store_timeout_aborts_search() {
        let err = search_with_stores(
            InMemoryCommentStore::new(),
            InMemoryAttachmentStore::new().with_delay(Duration::from_secs(10)),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::CollaboratorUnavailable {
                collaborator: "attachment store",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_label_filter_and_limit() {
        let mut issues = InMemoryIssueSource::new();
        let mut predictions = InMemoryPredictionSource::new();
        for i in 0..6 {
            let id = i.to_string();
            issues = issues.with_issue("ProjA", issue(&id, &format!("P1-{i}"), "memory leak"));
            predictions = predictions.with_prediction(&id, property(i % 2 == 0, 0.5));
        }
        let f = fixture(
            issues,
            predictions,
            InMemoryCommentStore::new(),
            InMemoryAttachmentStore::new(),
        );
        build(&f, true).await;

        let guard = f.gate.try_acquire().unwrap();
        let mut req = search_request("leak", true);
        req.label_filters.property = Some(true);
        req.limit = 2;
        let results = f.engine.search(&guard, &req).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.predictions[&Label::Property].prediction));
    }

    #[test]
    fn test_rank_zero_max_score() {
        let scorer = RankingConfig::default().scorer().unwrap();
        let mut results = vec![ScoredResult {
            issue_id: "1".to_string(),
            issue_key: "P1-1".to_string(),
            summary: String::new(),
            description: String::new(),
            comments: String::new(),
            predictions: property(true, 0.4),
            comment_records: Vec::new(),
            attachments: Vec::new(),
            hit_score: 0.0,
            composite_score: 0.0,
        }];
        rank(&mut results, &scorer);
        assert!((results[0].composite_score - 0.5 * 0.4).abs() < 1e-12);
    }
}
