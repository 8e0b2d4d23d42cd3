use anyhow::{Context, Result};
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{Index, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::models::{IssueDocument, Label, LabelPrediction, LabelPredictions};

/// Field handles of the issue schema.
#[derive(Clone, Copy)]
struct IssueFields {
    id: Field,
    project: Field,
    key: Field,
    summary: Field,
    description: Field,
    text: Field,
    comments: Field,
    /// `"true"` / `"false"` keyword per label, in `Label::ALL` order
    predictions: [Field; 3],
    /// Stored confidence per label, in `Label::ALL` order
    confidences: [Field; 3],
}

impl IssueFields {
    fn from_schema(schema: &Schema) -> Result<Self> {
        let get = |name: &str| {
            schema
                .get_field(name)
                .with_context(|| format!("Index schema has no `{name}` field"))
        };
        Ok(Self {
            id: get("id")?,
            project: get("project")?,
            key: get("key")?,
            summary: get("summary")?,
            description: get("description")?,
            text: get("text")?,
            comments: get("comments")?,
            predictions: [get("existence")?, get("property")?, get("executive")?],
            confidences: [
                get("existence_confidence")?,
                get("property_confidence")?,
                get("executive_confidence")?,
            ],
        })
    }

    fn label(&self, label: Label) -> (Field, Field) {
        let i = label_slot(label);
        (self.predictions[i], self.confidences[i])
    }
}

fn label_slot(label: Label) -> usize {
    match label {
        Label::Existence => 0,
        Label::Property => 1,
        Label::Executive => 2,
    }
}

fn issue_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    schema_builder.add_text_field("project", STRING | STORED);
    schema_builder.add_text_field("key", STRING | STORED);
    schema_builder.add_text_field("summary", STORED);
    schema_builder.add_text_field("description", STORED);
    schema_builder.add_text_field("text", TEXT | STORED);
    schema_builder.add_text_field("comments", TEXT | STORED);
    for label in Label::ALL {
        schema_builder.add_text_field(label.as_str(), STRING | STORED);
        schema_builder.add_f64_field(
            &format!("{label}_confidence"),
            NumericOptions::default() | STORED,
        );
    }
    schema_builder.build()
}

/// Full-text index over the issues of one index identity, built on tantivy.
pub struct IssueIndex {
    index: Index,
    fields: IssueFields,
}

#[derive(Debug, Clone)]
pub struct IssueHit {
    pub issue_id: String,
    pub issue_key: String,
    pub summary: String,
    pub description: String,
    pub comments: String,
    pub predictions: LabelPredictions,
    pub score: f32,
}

impl IssueIndex {
    /// Create a new, empty index in `index_dir`. The directory must not hold an index.
    pub fn create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let index = Index::create_in_dir(index_dir, issue_schema())
            .context("Failed to create tantivy index")?;
        let fields = IssueFields::from_schema(&index.schema())?;
        Ok(Self { index, fields })
    }

    /// Open an existing index read-only.
    pub fn open(index_dir: &Path) -> Result<Self> {
        let index = Index::open_in_dir(index_dir)
            .with_context(|| format!("Failed to open index at {}", index_dir.display()))?;
        let fields = IssueFields::from_schema(&index.schema())?;
        Ok(Self { index, fields })
    }

    /// Write all documents and commit. Returns the number written.
    pub fn write_documents(&self, docs: &[IssueDocument], heap_bytes: usize) -> Result<usize> {
        let mut writer: IndexWriter = self
            .index
            .writer(heap_bytes)
            .context("Failed to create index writer")?;

        for issue in docs {
            writer.add_document(self.to_tantivy(issue))?;
        }

        writer.commit().context("Failed to commit index")?;
        Ok(docs.len())
    }

    fn to_tantivy(&self, issue: &IssueDocument) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, &issue.id);
        doc.add_text(f.project, &issue.project);
        doc.add_text(f.key, &issue.key);
        doc.add_text(f.summary, &issue.summary);
        doc.add_text(f.description, &issue.description);
        doc.add_text(f.text, &issue.text);
        doc.add_text(f.comments, &issue.comments);
        for (label, prediction) in &issue.predictions {
            let (f_prediction, f_confidence) = f.label(*label);
            doc.add_text(f_prediction, prediction_term(prediction.prediction));
            doc.add_f64(f_confidence, prediction.confidence);
        }
        doc
    }

    /// Number of committed documents.
    pub fn num_docs(&self) -> Result<u64> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;
        Ok(reader.searcher().num_docs())
    }

    /// Lexical query over `text`, AND'ed with one equality clause per label filter.
    ///
    /// A blank `query_text` matches every document, leaving only the label
    /// filters to constrain the result.
    pub fn search(
        &self,
        query_text: &str,
        label_filters: &[(Label, bool)],
        limit: usize,
    ) -> Result<Vec<IssueHit>> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        let searcher = reader.searcher();

        let text_query: Box<dyn Query> = if query_text.trim().is_empty() {
            Box::new(AllQuery)
        } else {
            let query_parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
            let (query, errors) = query_parser.parse_query_lenient(query_text);
            if !errors.is_empty() {
                tracing::debug!("Lenient query parse of {query_text:?}: {errors:?}");
            }
            query
        };

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
        for (label, value) in label_filters {
            let (f_prediction, _) = self.fields.label(*label);
            let term = Term::from_field_text(f_prediction, prediction_term(*value));
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
            ));
        }
        let query = BooleanQuery::new(clauses);

        // TopDocs reserves its whole limit up front
        let limit = limit.min(searcher.num_docs() as usize).max(1);
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .context("Search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;
            hits.push(self.to_hit(&doc, score));
        }

        Ok(hits)
    }

    fn to_hit(&self, doc: &TantivyDocument, score: f32) -> IssueHit {
        let f = &self.fields;
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let mut predictions = LabelPredictions::new();
        for label in Label::ALL {
            let (f_prediction, f_confidence) = f.label(label);
            let Some(prediction) = doc.get_first(f_prediction).and_then(|v| v.as_str()) else {
                continue;
            };
            let confidence = doc
                .get_first(f_confidence)
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            predictions.insert(
                label,
                LabelPrediction {
                    prediction: prediction == prediction_term(true),
                    confidence,
                },
            );
        }

        IssueHit {
            issue_id: text(f.id),
            issue_key: text(f.key),
            summary: text(f.summary),
            description: text(f.description),
            comments: text(f.comments),
            predictions,
            score,
        }
    }
}

fn prediction_term(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Issue;

    fn doc(id: &str, key: &str, summary: &str, existence: Option<bool>) -> IssueDocument {
        let mut predictions = LabelPredictions::new();
        if let Some(prediction) = existence {
            predictions.insert(
                Label::Existence,
                LabelPrediction {
                    prediction,
                    confidence: 0.8,
                },
            );
        }
        IssueDocument::from_issue(
            Issue {
                id: id.to_string(),
                key: key.to_string(),
                summary: summary.to_string(),
                description: String::new(),
                comments: None,
            },
            predictions,
        )
    }

    #[test]
    fn test_write_then_count() {
        let dir = tempfile::tempdir().unwrap();
        let index = IssueIndex::create(dir.path()).unwrap();
        let written = index
            .write_documents(
                &[doc("1", "P1-1", "a", None), doc("2", "P1-2", "b", None)],
                15_000_000,
            )
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(IssueIndex::open(dir.path()).unwrap().num_docs().unwrap(), 2);
    }

    #[test]
    fn test_lexical_match_required() {
        let dir = tempfile::tempdir().unwrap();
        let index = IssueIndex::create(dir.path()).unwrap();
        index
            .write_documents(
                &[
                    doc("1", "P1-1", "connection timeout error", None),
                    doc("2", "P1-2", "button colour", None),
                ],
                15_000_000,
            )
            .unwrap();

        let hits = index.search("timeout", &[], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].issue_key, "P1-1");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_label_filter_clause() {
        let dir = tempfile::tempdir().unwrap();
        let index = IssueIndex::create(dir.path()).unwrap();
        index
            .write_documents(
                &[
                    doc("1", "P1-1", "cache eviction", Some(true)),
                    doc("2", "P1-2", "cache warmup", Some(false)),
                    doc("3", "P1-3", "cache sizing", None),
                ],
                15_000_000,
            )
            .unwrap();

        let hits = index.search("cache", &[(Label::Existence, true)], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].issue_id, "1");
        let prediction = hits[0].predictions[&Label::Existence];
        assert!(prediction.prediction);
        assert!((prediction.confidence - 0.8).abs() < 1e-9);

        let hits = index.search("cache", &[(Label::Existence, false)], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].issue_id, "2");
    }

    #[test]
    fn test_huge_limit_is_capped_at_doc_count() {
        let dir = tempfile::tempdir().unwrap();
        let index = IssueIndex::create(dir.path()).unwrap();
        index
            .write_documents(
                &[
                    doc("1", "P1-1", "socket timeout", None),
                    doc("2", "P1-2", "socket reset", None),
                ],
                15_000_000,
            )
            .unwrap();

        assert_eq!(index.search("socket", &[], usize::MAX).unwrap().len(), 2);
        assert_eq!(index.search("socket", &[], 1 << 40).unwrap().len(), 2);
    }

    #[test]
    fn test_blank_query_uses_filters_only() {
        let dir = tempfile::tempdir().unwrap();
        let index = IssueIndex::create(dir.path()).unwrap();
        index
            .write_documents(
                &[
                    doc("1", "P1-1", "one", Some(true)),
                    doc("2", "P1-2", "two", Some(true)),
                    doc("3", "P1-3", "three", Some(false)),
                ],
                15_000_000,
            )
            .unwrap();

        assert_eq!(index.search("  ", &[], 10).unwrap().len(), 3);
        assert_eq!(
            index.search("", &[(Label::Existence, true)], 10).unwrap().len(),
            2
        );
    }
}
