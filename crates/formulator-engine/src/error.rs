//! Engine error type.

use crate::graph::ValidationIssue;
use crate::session::SessionId;
use formulator_dsl::ParseError;
use formulator_service::ServiceError;
use formulator_store::{ConceptId, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("concept {0} not found")]
    UnknownConcept(ConceptId),

    #[error("no open session {0}")]
    UnknownSession(SessionId),

    #[error("procedure does not parse: {0}")]
    Procedure(#[from] ParseError),

    #[error("dependency cycle through concept {0}")]
    Cycle(ConceptId),

    #[error("no loaded table has all of the columns [{}]", columns.join(", "))]
    NoAlignmentTable { columns: Vec<String> },

    #[error("save blocked: {}", render_issues(.0))]
    Blocked(Vec<ValidationIssue>),

    #[error("an unnamed draft derived from {parent} is already open")]
    DuplicateDraft { parent: ConceptId },

    #[error("concept {0} is not a derived concept")]
    NotDerived(ConceptId),

    #[error("concept {0} is not a custom concept")]
    NotCustom(ConceptId),

    #[error("concept {0} is an unsaved draft")]
    Draft(ConceptId),

    #[error("candidate index {index} out of range ({len} candidates)")]
    CandidateIndex { index: usize, len: usize },

    #[error("session has no candidates to choose from")]
    NoCandidates,

    #[error("cannot request generation: {0}")]
    GenerationNotReady(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("configuration error: {0}")]
    Config(String),
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, EngineError>;
