//! Embedded document store and the position→id side mapping.
//!
//! Two redb tables: `documents` (id → bincode record) and `positions`
//! (index position → id). The side mapping is what turns a nearest-neighbor
//! hit back into a document; a position with no mapping is a dangling entry
//! left behind by a delete or an overwriting re-ingest.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const POSITIONS: TableDefinition<u64, &str> = TableDefinition::new("positions");

/// One stored document. Content and summary are immutable after creation;
/// `position` is bound after the embedding lands in the index and is `None`
/// for the window between the document write and the index append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub content: String,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub position: Option<u64>,
    pub ingested_at: DateTime<Utc>,
}

pub struct DocumentStore {
    db: Database,
}

fn tx_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Transaction(e.to_string())
}

fn decode(id: &str, bytes: &[u8]) -> std::result::Result<DocumentRecord, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Decode {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

impl DocumentStore {
    /// Open (or create) the store at `path` and make sure both tables
    /// exist, so later reads never hit a missing-table error.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let db = Database::create(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let txn = db.begin_write().map_err(tx_err)?;
        {
            txn.open_table(DOCUMENTS).map_err(tx_err)?;
            txn.open_table(POSITIONS).map_err(tx_err)?;
        }
        txn.commit().map_err(tx_err)?;

        tracing::info!(path = %path.display(), "opened document store");
        Ok(Self { db })
    }

    /// Insert or replace a record by id. When a previous record claimed an
    /// index position, that mapping is removed in the same transaction and
    /// the old position is returned — it is now dangling in the index.
    pub fn upsert(&self, record: &DocumentRecord) -> Result<Option<u64>> {
        let encoded = bincode::serialize(record).map_err(|e| StoreError::Decode {
            id: record.id.clone(),
            reason: e.to_string(),
        })?;

        let txn = self.db.begin_write().map_err(tx_err)?;
        let prior_position;
        {
            let mut docs = txn.open_table(DOCUMENTS).map_err(tx_err)?;
            let mut positions = txn.open_table(POSITIONS).map_err(tx_err)?;

            prior_position = match docs.get(record.id.as_str()).map_err(tx_err)? {
                Some(existing) => decode(&record.id, existing.value())?.position,
                None => None,
            };
            if let Some(old) = prior_position {
                positions.remove(old).map_err(tx_err)?;
            }

            docs.insert(record.id.as_str(), encoded.as_slice())
                .map_err(tx_err)?;
            if let Some(position) = record.position {
                positions
                    .insert(position, record.id.as_str())
                    .map_err(tx_err)?;
            }
        }
        txn.commit().map_err(tx_err)?;

        Ok(prior_position)
    }

    pub fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let txn = self.db.begin_read().map_err(tx_err)?;
        let docs = txn.open_table(DOCUMENTS).map_err(tx_err)?;
        match docs.get(id).map_err(tx_err)? {
            Some(guard) => Ok(Some(decode(id, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Remove a record and its position mapping. Returns whether the
    /// record existed. The vector itself stays in the index as a dangling
    /// entry until a rebuild.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(tx_err)?;
        let existed;
        {
            let mut docs = txn.open_table(DOCUMENTS).map_err(tx_err)?;
            let mut positions = txn.open_table(POSITIONS).map_err(tx_err)?;

            let removed = docs.remove(id).map_err(tx_err)?;
            existed = match removed {
                Some(guard) => {
                    let record = decode(id, guard.value())?;
                    if let Some(position) = record.position {
                        positions.remove(position).map_err(tx_err)?;
                    }
                    true
                }
                None => false,
            };
        }
        txn.commit().map_err(tx_err)?;

        Ok(existed)
    }

    /// Bind an index position to a stored document: unmaps the document's
    /// previous position (if any), records the new one in the record and
    /// the side table, all in one transaction.
    pub fn bind_position(&self, id: &str, position: u64) -> Result<()> {
        let txn = self.db.begin_write().map_err(tx_err)?;
        {
            let mut docs = txn.open_table(DOCUMENTS).map_err(tx_err)?;
            let mut positions = txn.open_table(POSITIONS).map_err(tx_err)?;

            let mut record = match docs.get(id).map_err(tx_err)? {
                Some(guard) => decode(id, guard.value())?,
                None => {
                    return Err(StoreError::Transaction(format!(
                        "cannot bind position {position}: document '{id}' missing"
                    ))
                    .into());
                }
            };

            if let Some(old) = record.position {
                positions.remove(old).map_err(tx_err)?;
            }
            record.position = Some(position);

            let encoded = bincode::serialize(&record).map_err(|e| StoreError::Decode {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
            docs.insert(id, encoded.as_slice()).map_err(tx_err)?;
            positions.insert(position, id).map_err(tx_err)?;
        }
        txn.commit().map_err(tx_err)?;

        Ok(())
    }

    /// Resolve an index position to a document id. `None` means the
    /// position is dangling.
    pub fn resolve_position(&self, position: u64) -> Result<Option<String>> {
        let txn = self.db.begin_read().map_err(tx_err)?;
        let positions = txn.open_table(POSITIONS).map_err(tx_err)?;
        Ok(positions
            .get(position)
            .map_err(tx_err)?
            .map(|guard| guard.value().to_string()))
    }

    /// Snapshot of every stored record, for rebuilds.
    pub fn iter_records(&self) -> Result<Vec<DocumentRecord>> {
        let txn = self.db.begin_read().map_err(tx_err)?;
        let docs = txn.open_table(DOCUMENTS).map_err(tx_err)?;

        let mut records = Vec::new();
        for entry in docs.iter().map_err(tx_err)? {
            let (key, value) = entry.map_err(tx_err)?;
            records.push(decode(key.value(), value.value())?);
        }
        Ok(records)
    }

    /// Atomically replace the whole position mapping: drops every existing
    /// entry, then rewrites each listed record's position and its side
    /// table entry. Used by rebuild, where the position space is renumbered
    /// from scratch.
    pub fn rebind_all(&self, bindings: &[(String, u64)]) -> Result<()> {
        let txn = self.db.begin_write().map_err(tx_err)?;
        {
            txn.delete_table(POSITIONS).map_err(tx_err)?;
            let mut docs = txn.open_table(DOCUMENTS).map_err(tx_err)?;
            let mut positions = txn.open_table(POSITIONS).map_err(tx_err)?;

            for (id, position) in bindings {
                let mut record = match docs.get(id.as_str()).map_err(tx_err)? {
                    Some(guard) => decode(id, guard.value())?,
                    None => {
                        return Err(StoreError::Transaction(format!(
                            "cannot rebind: document '{id}' missing"
                        ))
                        .into());
                    }
                };
                record.position = Some(*position);
                let encoded = bincode::serialize(&record).map_err(|e| StoreError::Decode {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
                docs.insert(id.as_str(), encoded.as_slice())
                    .map_err(tx_err)?;
                positions.insert(*position, id.as_str()).map_err(tx_err)?;
            }
        }
        txn.commit().map_err(tx_err)?;

        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read().map_err(tx_err)?;
        let docs = txn.open_table(DOCUMENTS).map_err(tx_err)?;
        docs.len().map_err(|e| tx_err(e).into())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, position: Option<u64>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            content: format!("content of {id}"),
            summary: format!("summary of {id}"),
            embedding: vec![0.5, 0.5, 0.5],
            position,
            ingested_at: Utc::now(),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> DocumentStore {
        DocumentStore::open(&dir.path().join("docs.redb")).expect("open store")
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        store.upsert(&record("a", Some(0))).expect("upsert");
        let fetched = store.get("a").expect("get").expect("record present");
        assert_eq!(fetched.content, "content of a");
        assert_eq!(fetched.position, Some(0));
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn upsert_unmaps_prior_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        store.upsert(&record("a", Some(0))).expect("first upsert");
        let prior = store.upsert(&record("a", None)).expect("second upsert");
        assert_eq!(prior, Some(0));

        // Position 0 is now dangling.
        assert_eq!(store.resolve_position(0).expect("resolve"), None);
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn delete_removes_record_and_mapping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        store.upsert(&record("a", Some(3))).expect("upsert");
        assert!(store.delete("a").expect("delete"));
        assert!(store.get("a").expect("get").is_none());
        assert_eq!(store.resolve_position(3).expect("resolve"), None);

        // Deleting again reports absence.
        assert!(!store.delete("a").expect("second delete"));
    }

    #[test]
    fn bind_position_updates_record_and_side_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        store.upsert(&record("a", None)).expect("upsert");
        store.bind_position("a", 7).expect("bind");

        let fetched = store.get("a").expect("get").expect("present");
        assert_eq!(fetched.position, Some(7));
        assert_eq!(
            store.resolve_position(7).expect("resolve"),
            Some("a".to_string())
        );

        // Rebinding moves the mapping.
        store.bind_position("a", 9).expect("rebind");
        assert_eq!(store.resolve_position(7).expect("resolve old"), None);
        assert_eq!(
            store.resolve_position(9).expect("resolve new"),
            Some("a".to_string())
        );
    }

    #[test]
    fn bind_position_on_missing_document_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        assert!(store.bind_position("ghost", 0).is_err());
    }

    #[test]
    fn rebind_all_renumbers_from_scratch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        store.upsert(&record("a", Some(4))).expect("upsert a");
        store.upsert(&record("b", Some(9))).expect("upsert b");

        store
            .rebind_all(&[("b".to_string(), 0), ("a".to_string(), 1)])
            .expect("rebind all");

        assert_eq!(
            store.resolve_position(0).expect("resolve"),
            Some("b".to_string())
        );
        assert_eq!(
            store.resolve_position(1).expect("resolve"),
            Some("a".to_string())
        );
        // Old mappings are gone wholesale.
        assert_eq!(store.resolve_position(4).expect("resolve"), None);
        assert_eq!(store.resolve_position(9).expect("resolve"), None);
    }

    #[test]
    fn iter_records_returns_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        store.upsert(&record("a", Some(0))).expect("upsert a");
        store.upsert(&record("b", Some(1))).expect("upsert b");

        let mut ids: Vec<String> = store
            .iter_records()
            .expect("iter")
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docs.redb");

        {
            let store = DocumentStore::open(&path).expect("open");
            store.upsert(&record("a", Some(0))).expect("upsert");
        }

        let store = DocumentStore::open(&path).expect("reopen");
        assert_eq!(store.len().expect("len"), 1);
        assert_eq!(
            store.resolve_position(0).expect("resolve"),
            Some("a".to_string())
        );
    }
}
