use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::index::identity::find_covering_record;
use crate::models::{IndexRecord, ProjectSelection};

/// On-disk layout of the registry file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    indexes: Vec<IndexRecord>,
}

/// Durable mapping of index identities to their build parameters.
///
/// Records keep insertion order; coverage lookups return the first match in
/// that order. Mutations are only issued by the builder while it holds the
/// exclusivity gate.
pub struct IndexRegistry {
    path: PathBuf,
    records: RwLock<Vec<IndexRecord>>,
}

impl IndexRegistry {
    /// Load the registry file, creating an empty one if it does not exist.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let records = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read registry {}", path.display()))?;
            let file: RegistryFile = serde_json::from_str(&data)
                .with_context(|| format!("Corrupt registry file {}", path.display()))?;
            file.indexes
        } else {
            write_atomic(path, &[])?;
            Vec::new()
        };

        tracing::info!("Index registry loaded: {} index(es)", records.len());

        Ok(Self {
            path: path.to_path_buf(),
            records: RwLock::new(records),
        })
    }

    /// Identities of all registered indexes.
    pub fn list(&self) -> Vec<String> {
        self.records
            .read()
            .iter()
            .map(|r| r.identity.clone())
            .collect()
    }

    /// Snapshot of all records in registry order.
    pub fn records(&self) -> Vec<IndexRecord> {
        self.records.read().clone()
    }

    pub fn get(&self, identity: &str) -> Option<IndexRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.identity == identity)
            .cloned()
    }

    /// First record covering the requested selection and model.
    pub fn find_covering(
        &self,
        selection: &ProjectSelection,
        model_id: Option<&str>,
        model_version: Option<&str>,
    ) -> Option<IndexRecord> {
        let records = self.records.read();
        find_covering_record(records.iter(), selection, model_id, model_version).cloned()
    }

    /// Insert a record, replacing any record with the same identity in place.
    ///
    /// The file is written before the in-memory state changes, so a failed
    /// write leaves both untouched.
    pub fn upsert(&self, record: IndexRecord) -> Result<()> {
        let mut records = self.records.write();
        let mut updated = records.clone();

        match updated.iter_mut().find(|r| r.identity == record.identity) {
            Some(existing) => *existing = record,
            None => updated.push(record),
        }

        write_atomic(&self.path, &updated)?;
        *records = updated;
        Ok(())
    }

    /// Remove a record. Returns it if it was present.
    pub fn remove(&self, identity: &str) -> Result<Option<IndexRecord>> {
        let mut records = self.records.write();
        let Some(pos) = records.iter().position(|r| r.identity == identity) else {
            return Ok(None);
        };

        let mut updated = records.clone();
        let removed = updated.remove(pos);
        write_atomic(&self.path, &updated)?;
        *records = updated;
        Ok(Some(removed))
    }
}

/// Write the registry file atomically (temp file + rename).
fn write_atomic(path: &Path, records: &[IndexRecord]) -> Result<()> {
    let file = RegistryFile {
        indexes: records.to_vec(),
    };
    let data = serde_json::to_string_pretty(&file).context("Failed to serialize registry")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
