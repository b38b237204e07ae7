//! Formulator engine
//!
//! Everything between the committed [`ConceptStore`](formulator_store::ConceptStore)
//! and the user:
//!
//! - [`graph`]: closures over the derivation graph, eligible parents, save
//!   validation and whole-store audits,
//! - [`infer`]: scalar type inference from materialized values,
//! - [`executor`]: aligns parent values on one table and runs a procedure per
//!   row, materializing derived ancestors first,
//! - [`preview`]: fingerprint-keyed preview cache,
//! - [`candidates`]: filtering and test runs of generated procedures,
//! - [`session`] / [`disambiguation`]: private scratch copies, the generation
//!   state machine and candidate selection,
//! - [`state`]: [`AppState`], the single owner of all of the above.
//!
//! Materialization is synchronous and side-effect free. The only async entry
//! point is [`AppState::generate`], which awaits the generation service.

pub mod candidates;
pub mod config;
pub mod disambiguation;
pub mod error;
pub mod executor;
pub mod graph;
pub mod infer;
pub mod notify;
pub mod preview;
pub mod session;
pub mod state;

pub use candidates::{process_candidates, Candidate, CandidateBatch, CandidateSet, RejectReason};
pub use config::EngineConfig;
pub use disambiguation::{Close, Disambiguation};
pub use error::{EngineError, Result};
pub use executor::{align_inputs, concept_values, materialize, Limits, Preview, PreviewRow};
pub use graph::{
    ancestors_of, check_store, descendants_of, eligible_parents, validate, AuditIssue,
    ValidationIssue,
};
pub use infer::infer_type;
pub use notify::{Level, Notification, Notifications};
pub use preview::PreviewCache;
pub use session::{EditSession, GenerationOutcome, GenerationPhase, SessionId};
pub use state::AppState;
