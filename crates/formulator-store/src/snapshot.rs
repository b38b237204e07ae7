//! Snapshot persistence.
//!
//! A snapshot is one JSON document `{ tables, concepts }`. Saves go through a
//! temporary file in the destination directory that is renamed over the
//! target, so readers never observe a half-written snapshot.

use crate::store::{ConceptStore, Snapshot};
use crate::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Load a store from a snapshot file.
pub fn load(path: &Path) -> Result<ConceptStore> {
    let contents = std::fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&contents)?;
    let store = ConceptStore::from_snapshot(snapshot)?;
    info!(
        path = %path.display(),
        tables = store.tables().len(),
        concepts = store.len(),
        "snapshot loaded"
    );
    Ok(store)
}

/// Atomically write `store` to `path`.
pub fn save(store: &ConceptStore, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, &store.to_snapshot())?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    info!(
        path = %path.display(),
        tables = store.tables().len(),
        concepts = store.len(),
        "snapshot saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Concept, DictTable, ScalarType, TableId, Transform};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let table_id = TableId::new("orders");
        let mut store = ConceptStore::new();
        store.upsert_table(
            DictTable::new("orders", vec!["price".into()])
                .with_rows(vec![json!({"price": 2}).as_object().cloned().unwrap()]),
        );
        let price = Concept::original(&table_id, "price", ScalarType::Number);
        let price_id = price.id.clone();
        store.commit(price).unwrap();
        store
            .commit(Concept::derived(
                "double",
                table_id,
                Transform::new(vec![price_id], "p => p * 2"),
            ))
            .unwrap();

        save(&store, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.to_snapshot(), store.to_snapshot());
    }

    #[test]
    fn save_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        save(&ConceptStore::new(), &path).unwrap();
        assert!(load(&path).unwrap().is_empty());
    }

    #[test]
    fn load_reports_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"concepts\": [").unwrap();
        assert!(matches!(load(&path), Err(crate::StoreError::Json(_))));
    }
}
