//! Index identity derivation and coverage checks.
//!
//! Identities are persisted in the registry and looked up after restarts, so
//! they are a SHA-256 digest of a canonical JSON serialization rather than an
//! in-memory hash.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::{IndexRecord, ProjectSelection};

#[derive(Serialize)]
struct CanonicalKey<'a> {
    data_source: &'a str,
    selection: &'a ProjectSelection,
    model_id: Option<&'a str>,
    model_version: Option<&'a str>,
}

/// Derive the stable index key for a set of build parameters.
///
/// `ProjectSelection` keeps namespaces and projects sorted, so semantically
/// equal selections serialize to the same bytes.
pub fn derive_identity(
    data_source: &str,
    selection: &ProjectSelection,
    model_id: Option<&str>,
    model_version: Option<&str>,
) -> String {
    let key = CanonicalKey {
        data_source,
        selection,
        model_id,
        model_version,
    };
    // Serializing borrowed strings and ordered maps cannot fail.
    let canonical = serde_json::to_vec(&key).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// True if every requested `(namespace, project)` pair is in the record.
pub fn record_covers_selection(record: &IndexRecord, requested: &ProjectSelection) -> bool {
    requested
        .pairs()
        .all(|(namespace, project)| record.selection.contains(namespace, project))
}

/// True if the record's model satisfies the request. A request without a
/// model id and version accepts any index.
fn model_matches(
    record: &IndexRecord,
    model_id: Option<&str>,
    model_version: Option<&str>,
) -> bool {
    if model_id.is_none() && model_version.is_none() {
        return true;
    }
    record.model_id.as_deref() == model_id && record.model_version.as_deref() == model_version
}

/// First record, in registry order, that covers the request.
pub fn find_covering_record<'a, I>(
    records: I,
    selection: &ProjectSelection,
    model_id: Option<&str>,
    model_version: Option<&str>,
) -> Option<&'a IndexRecord>
where
    I: IntoIterator<Item = &'a IndexRecord>,
{
    records.into_iter().find(|record| {
        model_matches(record, model_id, model_version)
            && record_covers_selection(record, selection)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn record(
        selection: ProjectSelection,
        model_id: Option<&str>,
        model_version: Option<&str>,
    ) -> IndexRecord {
        let identity = derive_identity("https://issues.example", &selection, model_id, model_version);
        IndexRecord {
            location: PathBuf::from("/tmp").join(&identity),
            identity,
            data_source: "https://issues.example".to_string(),
            selection,
            model_id: model_id.map(str::to_string),
            model_version: model_version.map(str::to_string),
            document_count: 0,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_identity_ignores_selection_order() {
        let a = ProjectSelection::new()
            .with("Apache", ["HADOOP", "YARN"])
            .with("Jira", ["JRA"]);
        let b = ProjectSelection::new()
            .with("Jira", ["JRA"])
            .with("Apache", ["YARN", "HADOOP"]);

        let id_a = derive_identity("db", &a, Some("m"), Some("v"));
        let id_b = derive_identity("db", &b, Some("m"), Some("v"));
        assert_eq!(id_a, id_b);
        assert_eq!(id_a, derive_identity("db", &a, Some("m"), Some("v")));
        assert_eq!(id_a.len(), 64);
    }

    #[test]
    fn test_identity_distinguishes_every_input() {
        let sel = ProjectSelection::new().with("Apache", ["HADOOP"]);
        let base = derive_identity("db", &sel, Some("m"), Some("v"));

        assert_ne!(base, derive_identity("db2", &sel, Some("m"), Some("v")));
        assert_ne!(base, derive_identity("db", &sel, Some("m2"), Some("v")));
        assert_ne!(base, derive_identity("db", &sel, Some("m"), Some("v2")));
        assert_ne!(base, derive_identity("db", &sel, None, None));
        let other = ProjectSelection::new().with("Apache", ["HADOOP", "YARN"]);
        assert_ne!(base, derive_identity("db", &other, Some("m"), Some("v")));
    }

    #[test]
    fn test_identity_is_a_fixed_digest() {
        // Pinned so a change in canonical serialization is caught.
        let sel = ProjectSelection::new().with("A", ["x"]);
        let expected = hex::encode(Sha256::digest(
            br#"{"data_source":"db","selection":{"A":["x"]},"model_id":null,"model_version":null}"#,
        ));
        assert_eq!(derive_identity("db", &sel, None, None), expected);
    }

    #[test]
    fn test_superset_covers_subset_only() {
        let rec = record(ProjectSelection::new().with("A", ["x", "y"]), None, None);

        let subset = ProjectSelection::new().with("A", ["x"]);
        let disjoint = ProjectSelection::new().with("A", ["x", "z"]);
        let other_namespace = ProjectSelection::new().with("B", ["x"]);

        assert!(record_covers_selection(&rec, &subset));
        assert!(!record_covers_selection(&rec, &disjoint));
        assert!(!record_covers_selection(&rec, &other_namespace));
    }

    #[test]
    fn test_model_wildcard_when_request_has_no_model() {
        let sel = ProjectSelection::new().with("A", ["x"]);
        let records = vec![record(sel.clone(), Some("m"), Some("v"))];

        assert!(find_covering_record(&records, &sel, None, None).is_some());
        assert!(find_covering_record(&records, &sel, Some("m"), Some("v")).is_some());
        assert!(find_covering_record(&records, &sel, Some("m"), Some("v2")).is_none());
    }

    #[test]
    fn test_model_request_rejects_unlabeled_index() {
        let sel = ProjectSelection::new().with("A", ["x"]);
        let records = vec![record(sel.clone(), None, None)];
        assert!(find_covering_record(&records, &sel, Some("m"), Some("v")).is_none());
    }

    #[test]
    fn test_first_covering_record_wins() {
        let sel = ProjectSelection::new().with("A", ["x"]);
        let records = vec![
            record(ProjectSelection::new().with("B", ["q"]), None, None),
            record(ProjectSelection::new().with("A", ["x", "y"]), None, None),
            record(ProjectSelection::new().with("A", ["x"]), None, None),
        ];

        let found = find_covering_record(&records, &sel, None, None).unwrap();
        assert_eq!(found.identity, records[1].identity);
    }
}
