//! Fingerprint-keyed preview cache.
//!
//! Previews are recomputed on demand. A cached preview is reused while the
//! fingerprint of its inputs is unchanged, so repeated pulls during rapid edits
//! cost one materialization per distinct input state.

use crate::executor::{materialize, Limits, Preview};
use crate::graph::ancestors_of;
use crate::Result;
use formulator_dsl::Fingerprint;
use formulator_store::{Concept, ConceptId, ConceptStore, TableId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Digest of one concept's definition and every definition it depends on.
pub fn concept_fingerprint(store: &ConceptStore, id: &ConceptId) -> String {
    let mut lineage = ancestors_of(store, id);
    lineage.sort();
    let mut fp = definition(Fingerprint::new(), store.get(id), id);
    for ancestor in &lineage {
        fp = definition(fp, store.get(ancestor), ancestor);
    }
    fp.finish()
}

fn definition(fp: Fingerprint, concept: Option<&Concept>, id: &ConceptId) -> Fingerprint {
    let fp = fp.str(id.as_str());
    match concept {
        Some(c) => fp.str(&serde_json::to_string(c).unwrap_or_default()),
        None => fp.str("<missing>"),
    }
}

/// Digest of everything a preview of `code` over `parent_ids` depends on.
pub fn preview_fingerprint(
    store: &ConceptStore,
    code: &str,
    parent_ids: &[ConceptId],
    affiliated: Option<&TableId>,
    limits: &Limits,
) -> String {
    let mut fp = Fingerprint::new()
        .str(code.trim())
        .u64(parent_ids.len() as u64);
    for id in parent_ids {
        fp = fp.str(id.as_str()).str(&concept_fingerprint(store, id));
    }
    fp.str(affiliated.map_or("", TableId::as_str))
        .u64(store.tables_revision())
        .u64(limits.sample_limit as u64)
        .u64(limits.max_scan_rows as u64)
        .u64(limits.step_budget)
        .finish()
}

#[derive(Debug, Default)]
pub struct PreviewCache {
    entries: HashMap<String, (String, Arc<Preview>)>,
    hits: u64,
    misses: u64,
}

impl PreviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The preview stored under `key`, recomputed if its inputs changed.
    pub fn get_or_compute(
        &mut self,
        key: &str,
        store: &ConceptStore,
        code: &str,
        parent_ids: &[ConceptId],
        affiliated: Option<&TableId>,
        limits: &Limits,
    ) -> Result<Arc<Preview>> {
        let fingerprint = preview_fingerprint(store, code, parent_ids, affiliated, limits);
        if let Some((cached, preview)) = self.entries.get(key) {
            if *cached == fingerprint {
                self.hits += 1;
                debug!(key, %fingerprint, "preview cache hit");
                return Ok(Arc::clone(preview));
            }
        }

        self.misses += 1;
        debug!(key, %fingerprint, "recomputing preview");
        let preview = Arc::new(materialize(store, code, parent_ids, affiliated, limits)?);
        self.entries
            .insert(key.to_string(), (fingerprint, Arc::clone(&preview)));
        Ok(preview)
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formulator_store::{DictTable, ScalarType, Transform};
    use serde_json::json;

    fn store() -> (ConceptStore, ConceptId, ConceptId) {
        let table = TableId::new("t");
        let mut store = ConceptStore::new();
        store.upsert_table(
            DictTable::new("t", vec!["a".into()])
                .with_rows(vec![json!({"a": 1}).as_object().cloned().unwrap()]),
        );
        let a = Concept::original(&table, "a", ScalarType::Number);
        let double = Concept::derived("double", table, Transform::new(vec![a.id.clone()], "x => x * 2"));
        let ids = (a.id.clone(), double.id.clone());
        store.commit(a).unwrap();
        store.commit(double).unwrap();
        (store, ids.0, ids.1)
    }

    #[test]
    fn unchanged_inputs_hit_the_cache() {
        let (store, _, double) = store();
        let mut cache = PreviewCache::new();
        let limits = Limits::default();
        let first = cache
            .get_or_compute("s", &store, "x => x + 1", &[double.clone()], None, &limits)
            .unwrap();
        let second = cache
            .get_or_compute("s", &store, " x => x + 1 ", &[double.clone()], None, &limits)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(first.rows[0].output, Some(json!(3)));
    }

    #[test]
    fn editing_an_ancestor_changes_the_fingerprint() {
        let (mut store, a, double) = store();
        let limits = Limits::default();
        let before = preview_fingerprint(&store, "x => x", &[double.clone()], None, &limits);

        let mut edited = store.get(&double).unwrap().clone();
        edited.transform = Some(Transform::new(vec![a], "x => x * 3"));
        store.commit(edited).unwrap();
        let after = preview_fingerprint(&store, "x => x", &[double.clone()], None, &limits);
        assert_ne!(before, after);

        store.upsert_table(DictTable::new("t", vec!["a".into()]));
        assert_ne!(
            after,
            preview_fingerprint(&store, "x => x", &[double], None, &limits)
        );
    }

    #[test]
    fn new_table_revision_recomputes() {
        let (mut store, a, _) = store();
        let mut cache = PreviewCache::new();
        let limits = Limits::default();
        cache
            .get_or_compute("s", &store, "x => x", &[a.clone()], None, &limits)
            .unwrap();
        store.upsert_table(
            DictTable::new("t", vec!["a".into()])
                .with_rows(vec![json!({"a": 9}).as_object().cloned().unwrap()]),
        );
        let preview = cache
            .get_or_compute("s", &store, "x => x", &[a], None, &limits)
            .unwrap();
        assert_eq!(preview.rows[0].output, Some(json!(9)));
        assert_eq!(cache.stats(), (0, 2));
    }
}
