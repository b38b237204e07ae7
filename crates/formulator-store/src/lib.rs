//! Formulator Concept Store
//!
//! Holds the committed state the engine works over:
//!
//! - [`Concept`]: a named field, either an `original` table column, a `custom`
//!   value list, or `derived` through a [`Transform`],
//! - [`DictTable`]: raw tables in load order,
//! - [`ConceptStore`]: both of the above plus the structural invariant checks
//!   every commit passes through,
//! - [`snapshot`]: atomic JSON persistence of the whole store.
//!
//! The store is plain data. Graph questions (closures, eligibility, audits)
//! live in `formulator-engine`.

pub mod model;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod tests;

pub use model::{
    Concept, ConceptId, ConceptSource, DictTable, Provenance, ScalarType, TableId, Transform,
};
pub use store::{ConceptStore, Snapshot};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("concept {0} already exists")]
    DuplicateId(ConceptId),

    #[error("table {0} is loaded twice")]
    DuplicateTable(TableId),

    #[error("concept {0} not found")]
    NotFound(ConceptId),

    #[error("concept {0} has no name")]
    Unnamed(ConceptId),

    #[error("derived concept {0} has no transform")]
    MissingTransform(ConceptId),

    #[error("derived concept {0} has no parents")]
    EmptyParents(ConceptId),

    #[error("concept {concept} lists unknown parent {parent}")]
    UnknownParent {
        concept: ConceptId,
        parent: ConceptId,
    },

    #[error("concept {0} lists itself as a parent")]
    SelfReference(ConceptId),

    #[error("committing concept {0} would create a dependency cycle")]
    Cycle(ConceptId),

    #[error("concept {id} is used by {} other concept(s)", dependents.len())]
    HasDependents {
        id: ConceptId,
        dependents: Vec<ConceptId>,
    },

    #[error("original concept {0} mirrors a table column and cannot be deleted")]
    OriginalNotDeletable(ConceptId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
