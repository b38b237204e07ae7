//! The committed concept set and its tables.

use crate::model::{Concept, ConceptId, ConceptSource, DictTable, TableId};
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Serialized form of a [`ConceptStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tables: Vec<DictTable>,
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

/// Committed concepts plus the raw tables they are computed from.
///
/// Mutations check the structural invariants that do not need the graph
/// resolver: ids are unique, derived concepts have a non-empty parent list of
/// existing concepts, the parent relation stays acyclic, and a concept with
/// dependents is never removed. Name rules and table eligibility are checked
/// before commit by the engine.
#[derive(Debug, Clone, Default)]
pub struct ConceptStore {
    concepts: Vec<Concept>,
    index: HashMap<ConceptId, usize>,
    tables: Vec<DictTable>,
    tables_revision: u64,
}

impl ConceptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot.
    ///
    /// Only id uniqueness is enforced here; the remaining graph problems of a
    /// hand-edited snapshot are reported by an audit rather than refused.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut store = Self::new();
        for table in snapshot.tables {
            if store.table(&table.id).is_some() {
                return Err(StoreError::DuplicateTable(table.id));
            }
            store.tables.push(table);
        }
        for concept in snapshot.concepts {
            if store.index.contains_key(&concept.id) {
                return Err(StoreError::DuplicateId(concept.id));
            }
            store.index.insert(concept.id.clone(), store.concepts.len());
            store.concepts.push(concept);
        }
        store.tables_revision = store.tables.len() as u64;
        debug!(
            tables = store.tables.len(),
            concepts = store.concepts.len(),
            "store loaded"
        );
        Ok(store)
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            tables: self.tables.clone(),
            concepts: self.concepts.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Concepts in insertion order.
    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn get(&self, id: &ConceptId) -> Option<&Concept> {
        self.index.get(id).map(|&i| &self.concepts[i])
    }

    pub fn contains(&self, id: &ConceptId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Resolve a concept by id, or else by name.
    ///
    /// Names are only unique per table; the first match in insertion order
    /// wins.
    pub fn resolve(&self, key: &str) -> Option<&Concept> {
        self.get(&ConceptId::new(key))
            .or_else(|| self.concepts.iter().find(|c| c.name == key))
    }

    /// Tables in load order.
    pub fn tables(&self) -> &[DictTable] {
        &self.tables
    }

    pub fn table(&self, id: &TableId) -> Option<&DictTable> {
        self.tables.iter().find(|t| &t.id == id)
    }

    /// Bumped whenever a table is added or replaced.
    pub fn tables_revision(&self) -> u64 {
        self.tables_revision
    }

    /// Concepts that list `id` as a direct parent.
    pub fn children_of(&self, id: &ConceptId) -> Vec<&Concept> {
        self.concepts
            .iter()
            .filter(|c| c.parent_ids().contains(id))
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add a table, or replace the one with the same id in place.
    pub fn upsert_table(&mut self, table: DictTable) {
        self.tables_revision += 1;
        match self.tables.iter_mut().find(|t| t.id == table.id) {
            Some(existing) => {
                debug!(table = %table.id, rows = table.len(), "table replaced");
                *existing = table;
            }
            None => {
                debug!(table = %table.id, rows = table.len(), "table added");
                self.tables.push(table);
            }
        }
    }

    /// Insert a new concept, or replace the committed concept with its id.
    pub fn commit(&mut self, concept: Concept) -> Result<()> {
        self.check_structure(&concept)?;
        match self.index.get(&concept.id) {
            Some(&i) => {
                debug!(concept = %concept.id, name = %concept.name, "concept replaced");
                self.concepts[i] = concept;
            }
            None => {
                debug!(concept = %concept.id, name = %concept.name, "concept inserted");
                self.index.insert(concept.id.clone(), self.concepts.len());
                self.concepts.push(concept);
            }
        }
        Ok(())
    }

    /// Change only the declared type of a committed concept.
    pub fn set_scalar_type(
        &mut self,
        id: &ConceptId,
        scalar_type: crate::model::ScalarType,
    ) -> Result<()> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        self.concepts[i].scalar_type = scalar_type;
        Ok(())
    }

    /// Remove a concept nothing depends on.
    pub fn remove(&mut self, id: &ConceptId) -> Result<Concept> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if self.concepts[i].source == ConceptSource::Original {
            return Err(StoreError::OriginalNotDeletable(id.clone()));
        }
        let dependents: Vec<ConceptId> =
            self.children_of(id).into_iter().map(|c| c.id.clone()).collect();
        if !dependents.is_empty() {
            return Err(StoreError::HasDependents {
                id: id.clone(),
                dependents,
            });
        }

        let removed = self.concepts.remove(i);
        self.reindex();
        debug!(concept = %removed.id, name = %removed.name, "concept removed");
        Ok(removed)
    }

    fn reindex(&mut self) {
        self.index = self
            .concepts
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
    }

    fn check_structure(&self, concept: &Concept) -> Result<()> {
        if concept.is_draft() {
            return Err(StoreError::Unnamed(concept.id.clone()));
        }
        if concept.source != ConceptSource::Derived {
            return Ok(());
        }
        let transform = concept
            .transform
            .as_ref()
            .ok_or_else(|| StoreError::MissingTransform(concept.id.clone()))?;
        if transform.parent_ids.is_empty() {
            return Err(StoreError::EmptyParents(concept.id.clone()));
        }
        for parent in &transform.parent_ids {
            if parent == &concept.id {
                return Err(StoreError::SelfReference(concept.id.clone()));
            }
            if !self.contains(parent) {
                return Err(StoreError::UnknownParent {
                    concept: concept.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
        if self.reaches(&transform.parent_ids, &concept.id) {
            return Err(StoreError::Cycle(concept.id.clone()));
        }
        Ok(())
    }

    /// Whether `target` is an ancestor of (or one of) `from`.
    fn reaches(&self, from: &[ConceptId], target: &ConceptId) -> bool {
        let mut stack: Vec<&ConceptId> = from.iter().collect();
        let mut seen: HashSet<&ConceptId> = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(concept) = self.get(id) {
                stack.extend(concept.parent_ids());
            }
        }
        false
    }
}
