//! Composite scoring: blends normalized lexical relevance with issue-level and
//! comment-level label confidence.
//!
//! ```text
//! composite = w_s · s + (1 - w_s) · [α · issue + (1 - α) · comments]
//! α         = ln 4 / (ln 4 + ln(n + 1))      n = joined comment count
//! ```
//!
//! The issue-level weight vector picks a comment-level weight vector from a
//! [`CommentWeightTable`]. Vectors without a row are rejected rather than
//! guessed at.

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{CommentRecord, Label, LabelPredictions};

const WEIGHT_EPSILON: f64 = 1e-6;

/// One value per label. Used both for weights and for confidences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelVector {
    pub executive: f64,
    pub existence: f64,
    pub property: f64,
}

impl LabelVector {
    pub const fn new(executive: f64, existence: f64, property: f64) -> Self {
        Self {
            executive,
            existence,
            property,
        }
    }

    fn set(&mut self, label: Label, value: f64) {
        match label {
            Label::Executive => self.executive = value,
            Label::Existence => self.existence = value,
            Label::Property => self.property = value,
        }
    }

    fn sum(&self) -> f64 {
        self.executive + self.existence + self.property
    }

    /// Scale to sum 1. None for negative, non-finite or all-zero weights.
    pub fn normalized(&self) -> Option<Self> {
        let values = [self.executive, self.existence, self.property];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return None;
        }
        let sum = self.sum();
        if sum <= 0.0 {
            return None;
        }
        Some(Self::new(
            self.executive / sum,
            self.existence / sum,
            self.property / sum,
        ))
    }

    pub fn dot(&self, other: &LabelVector) -> f64 {
        self.executive * other.executive
            + self.existence * other.existence
            + self.property * other.property
    }

    fn approx_eq(&self, other: &LabelVector) -> bool {
        (self.executive - other.executive).abs() < WEIGHT_EPSILON
            && (self.existence - other.existence).abs() < WEIGHT_EPSILON
            && (self.property - other.property).abs() < WEIGHT_EPSILON
    }

    /// Issue-level confidences. Labels without a prediction count as 0.
    pub fn from_predictions(predictions: &LabelPredictions) -> Self {
        let mut v = Self::default();
        for (label, prediction) in predictions {
            v.set(*label, prediction.confidence);
        }
        v
    }

    /// Per-label mean of the comment confidences that are present, 0 when none are.
    pub fn comment_means(comments: &[CommentRecord]) -> Self {
        let mut v = Self::default();
        for label in Label::ALL {
            let values: Vec<f64> = comments
                .iter()
                .filter_map(|c| c.confidences.and_then(|conf| conf.get(label)))
                .collect();
            if !values.is_empty() {
                v.set(label, values.iter().sum::<f64>() / values.len() as f64);
            }
        }
        v
    }
}

/// Maps an issue-level weight vector to the comment-level weights used with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub issue: LabelVector,
    pub comment: LabelVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentWeightTable {
    rows: Vec<WeightRow>,
}

impl Default for CommentWeightTable {
    fn default() -> Self {
        Self {
            rows: vec![
                WeightRow {
                    issue: LabelVector::new(1.0, 0.0, 0.0),
                    comment: LabelVector::new(0.67, 0.33, 0.00),
                },
                WeightRow {
                    issue: LabelVector::new(0.0, 1.0, 0.0),
                    comment: LabelVector::new(0.10, 0.85, 0.14),
                },
                WeightRow {
                    issue: LabelVector::new(0.0, 0.0, 1.0),
                    comment: LabelVector::new(0.00, 0.78, 0.22),
                },
            ],
        }
    }
}

impl CommentWeightTable {
    pub fn new(rows: Vec<WeightRow>) -> Self {
        Self { rows }
    }

    /// Comment weights for `issue_weights`, compared after normalization.
    pub fn lookup(&self, issue_weights: &LabelVector) -> ServiceResult<LabelVector> {
        let wanted = issue_weights.normalized().ok_or_else(|| {
            ServiceError::UnsupportedWeightConfiguration(format!(
                "issue weights {issue_weights:?} cannot be normalized"
            ))
        })?;

        self.rows
            .iter()
            .find(|row| {
                row.issue
                    .normalized()
                    .is_some_and(|issue| issue.approx_eq(&wanted))
            })
            .map(|row| row.comment)
            .ok_or_else(|| {
                ServiceError::UnsupportedWeightConfiguration(format!(
                    "no comment weights configured for issue weights {wanted:?}"
                ))
            })
    }
}

/// Ranking knobs. Fixed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// `w_s`: share of the composite score given to the normalized hit score
    pub hit_score_weight: f64,
    /// Issue-level label weights (normalized before use)
    pub issue_weights: LabelVector,
    pub comment_weights: CommentWeightTable,
    /// Extra candidates fetched beyond `limit` before reranking
    pub candidate_overshoot: usize,
    /// Comments shorter than this are not joined
    pub min_comment_length: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            hit_score_weight: 0.5,
            issue_weights: LabelVector::new(0.0, 0.0, 1.0),
            comment_weights: CommentWeightTable::default(),
            candidate_overshoot: 100,
            min_comment_length: 20,
        }
    }
}

impl RankingConfig {
    /// Resolve the weights into a scorer, failing on unsupported configurations.
    pub fn scorer(&self) -> ServiceResult<CompositeScorer> {
        if !(0.0..=1.0).contains(&self.hit_score_weight) {
            return Err(ServiceError::UnsupportedWeightConfiguration(format!(
                "hit score weight {} is outside [0, 1]",
                self.hit_score_weight
            )));
        }
        let comment_weights = self.comment_weights.lookup(&self.issue_weights)?;
        let issue_weights = self
            .issue_weights
            .normalized()
            .unwrap_or(self.issue_weights);

        Ok(CompositeScorer {
            hit_score_weight: self.hit_score_weight,
            issue_weights,
            comment_weights,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompositeScorer {
    hit_score_weight: f64,
    issue_weights: LabelVector,
    comment_weights: LabelVector,
}

impl CompositeScorer {
    /// Score one result.
    ///
    /// * `normalized_hit` - lexical score divided by the best score of the batch
    /// * `issue` - issue-level label confidences
    /// * `comments` - per-label comment confidence means
    /// * `comment_count` - number of comments joined for the issue
    pub fn score(
        &self,
        normalized_hit: f64,
        issue: &LabelVector,
        comments: &LabelVector,
        comment_count: usize,
    ) -> f64 {
        let alpha = issue_share(comment_count);
        let confidence = alpha * self.issue_weights.dot(issue)
            + (1.0 - alpha) * self.comment_weights.dot(comments);
        self.hit_score_weight * normalized_hit + (1.0 - self.hit_score_weight) * confidence
    }
}

/// `α` for `n` comments: 1 with no comments, decreasing as discussion grows.
pub fn issue_share(comment_count: usize) -> f64 {
    let ln4 = 4f64.ln();
    ln4 / (ln4 + ((comment_count + 1) as f64).ln())
}

/// Hit score divided by the batch maximum, or 0 when the maximum is not positive.
pub fn normalize_hit_score(score: f32, max_score: f32) -> f64 {
    if max_score > 0.0 {
        f64::from(score) / f64::from(max_score)
    } else {
        0.0
    }
}
