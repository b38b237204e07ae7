//! Edit sessions.
//!
//! A session owns a private scratch copy of one concept. Nothing reaches the
//! store until the session is saved through [`crate::AppState`]; cancelling
//! just drops the copy. Derived sessions also carry the generation state
//! machine:
//!
//! ```text
//! Idle -> Requesting{token} -> CandidatesReady | GenerationFailed | TimedOut
//! ```
//!
//! A new request supersedes the in-flight one; only a response carrying the
//! in-flight token is applied.

use crate::candidates::{process_candidates, CandidateSet, Rejected};
use crate::config::EngineConfig;
use crate::executor::{align_inputs, concept_values, Limits};
use crate::graph::{validate, ValidationIssue};
use crate::infer::infer_type;
use crate::{EngineError, Result};
use formulator_service::{
    DeriveConceptRequest, InputData, InputFieldInfo, ModelRef, RequestToken, ServiceError,
};
use formulator_store::{
    Concept, ConceptId, ConceptSource, ConceptStore, Provenance, ScalarType, TableId, Transform,
};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationPhase {
    Idle,
    Requesting { token: RequestToken },
    CandidatesReady,
    GenerationFailed { reason: String },
    TimedOut,
}

/// What applying a generation response did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Candidates survived; the best one is now the draft's procedure.
    Applied {
        accepted: usize,
        rejected: Vec<Rejected>,
    },
    /// The service answered but every candidate was discarded.
    NoCandidates { rejected: Vec<Rejected> },
    Failed(ServiceError),
    TimedOut,
    /// The response does not belong to the in-flight request; ignored.
    Stale,
}

/// Transform and candidates to restore when generation fails or the
/// candidates are discarded.
#[derive(Debug, Clone, PartialEq)]
struct Checkpoint {
    transform: Option<Transform>,
    candidates: Option<CandidateSet>,
}

#[derive(Debug, Clone)]
pub struct EditSession {
    id: SessionId,
    scratch: Concept,
    /// Committed version when editing an existing concept.
    original: Option<Concept>,
    /// Parent a new derived draft was started from.
    seed: Option<ConceptId>,
    candidates: Option<CandidateSet>,
    phase: GenerationPhase,
    checkpoint: Option<Checkpoint>,
    type_overridden: bool,
    last_token: RequestToken,
}

impl EditSession {
    fn with_scratch(id: SessionId, scratch: Concept, original: Option<Concept>) -> Self {
        Self {
            id,
            scratch,
            original,
            seed: None,
            candidates: None,
            phase: GenerationPhase::Idle,
            checkpoint: None,
            type_overridden: false,
            last_token: RequestToken::new(0),
        }
    }

    /// Unnamed derived draft affiliated with the seed's table.
    pub fn new_derived(id: SessionId, seed: &Concept) -> Self {
        let draft = Concept::derived(
            "",
            seed.table_ref.clone(),
            Transform::new(vec![seed.id.clone()], ""),
        );
        let mut session = Self::with_scratch(id, draft, None);
        session.seed = Some(seed.id.clone());
        session
    }

    /// Unnamed custom concept with an empty value list.
    pub fn new_custom(id: SessionId, table_ref: TableId) -> Self {
        Self::with_scratch(id, Concept::custom("", table_ref, Vec::new()), None)
    }

    /// Edit a committed concept.
    pub fn edit(id: SessionId, committed: Concept) -> Self {
        Self::with_scratch(id, committed.clone(), Some(committed))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn scratch(&self) -> &Concept {
        &self.scratch
    }

    pub fn original(&self) -> Option<&Concept> {
        self.original.as_ref()
    }

    pub fn seed(&self) -> Option<&ConceptId> {
        self.seed.as_ref()
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    pub fn phase(&self) -> &GenerationPhase {
        &self.phase
    }

    pub fn candidates(&self) -> Option<&CandidateSet> {
        self.candidates.as_ref()
    }

    pub fn type_overridden(&self) -> bool {
        self.type_overridden
    }

    pub fn is_unchanged(&self) -> bool {
        self.original.as_ref() == Some(&self.scratch)
    }

    /// Every reason the scratch copy cannot be saved right now.
    pub fn blockers(&self, store: &ConceptStore) -> Vec<ValidationIssue> {
        let mut issues = validate(store, &self.scratch);
        if self.is_unchanged() {
            issues.push(ValidationIssue::Unchanged);
        }
        issues
    }

    // ------------------------------------------------------------------
    // Scratch edits
    // ------------------------------------------------------------------

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.scratch.name = name.into();
    }

    /// Replace the parent list. The affiliated table stays fixed.
    pub fn set_parents(&mut self, parent_ids: Vec<ConceptId>) -> Result<()> {
        self.transform_mut()?.parent_ids = parent_ids;
        Ok(())
    }

    /// Replace the procedure by hand.
    pub fn set_code(&mut self, code: impl Into<String>) -> Result<()> {
        let transform = self.transform_mut()?;
        transform.code = code.into();
        transform.provenance = Provenance::Manual;
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
        self.transform_mut()?.description = description.into();
        Ok(())
    }

    /// Explicit type choice; turns off inference for this save.
    pub fn set_declared_type(&mut self, scalar_type: ScalarType) {
        self.scratch.scalar_type = scalar_type;
        self.type_overridden = true;
    }

    pub fn set_semantic_type(&mut self, semantic_type: Option<String>) {
        self.scratch.semantic_type = semantic_type;
    }

    /// Value list of a custom concept.
    pub fn set_domain(&mut self, values: Vec<Value>) -> Result<()> {
        if self.scratch.source != ConceptSource::Custom {
            return Err(EngineError::NotCustom(self.scratch.id.clone()));
        }
        self.scratch.domain = Some(values);
        Ok(())
    }

    fn transform_mut(&mut self) -> Result<&mut Transform> {
        if self.scratch.source != ConceptSource::Derived {
            return Err(EngineError::NotDerived(self.scratch.id.clone()));
        }
        Ok(self.scratch.transform.get_or_insert_with(|| Transform::new(Vec::new(), "")))
    }

    /// The concept to commit, with the type inferred unless overridden.
    pub(crate) fn prepare_commit(&self, store: &ConceptStore, config: &EngineConfig) -> Concept {
        let mut concept = self.scratch.clone();
        if self.type_overridden || concept.source != ConceptSource::Derived {
            return concept;
        }
        let Some(transform) = concept.transform.as_ref() else {
            return concept;
        };
        let limits = config.limits(config.inference_sample);
        match crate::executor::materialize(
            store,
            &transform.code,
            &transform.parent_ids,
            Some(&concept.table_ref),
            &limits,
        ) {
            Ok(preview) => {
                concept.scalar_type = infer_type(preview.outputs(), config.inference_sample);
            }
            Err(e) => {
                warn!(concept = %concept.id, error = %e, "type inference skipped");
            }
        }
        concept
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    /// Default instruction when the description is empty.
    pub fn default_instruction(&self, store: &ConceptStore) -> String {
        let parents: Vec<&str> = self
            .scratch
            .parent_ids()
            .iter()
            .map(|id| store.get(id).map_or(id.as_str(), |c| c.name.as_str()))
            .collect();
        format!("Derive {} from {}", self.scratch.name.trim(), parents.join(", "))
    }

    /// Build the next generation request and mark it in flight.
    ///
    /// A request already in flight is superseded: its response will be
    /// ignored.
    pub fn begin_generation(
        &mut self,
        store: &ConceptStore,
        config: &EngineConfig,
        model: Option<ModelRef>,
    ) -> Result<DeriveConceptRequest> {
        if self.scratch.source != ConceptSource::Derived {
            return Err(EngineError::NotDerived(self.scratch.id.clone()));
        }
        if self.scratch.is_draft() {
            return Err(EngineError::GenerationNotReady(
                "name the concept first".to_string(),
            ));
        }
        let parent_ids = self.scratch.parent_ids().to_vec();
        if parent_ids.is_empty() {
            return Err(EngineError::GenerationNotReady(
                "choose at least one parent".to_string(),
            ));
        }

        let inputs = align_inputs(
            store,
            &parent_ids,
            Some(&self.scratch.table_ref),
            &config.limits(config.request_row_sample),
        )?;
        let field_limits = config.limits(config.inference_sample);
        let mut input_fields = Vec::with_capacity(parent_ids.len());
        for (id, name) in parent_ids.iter().zip(&inputs.names) {
            let values = concept_values(store, id, &field_limits)?;
            let declared = store.get(id).map_or(ScalarType::Auto, |c| c.scalar_type);
            let scalar_type = match declared {
                ScalarType::Auto => infer_type(values.iter().map(Option::as_ref), values.len()),
                other => other,
            };
            input_fields.push(InputFieldInfo {
                name: name.clone(),
                scalar_type: scalar_type.to_string(),
                values: values
                    .into_iter()
                    .flatten()
                    .filter(|v| !v.is_null())
                    .take(config.field_sample_values)
                    .collect(),
            });
        }
        let rows = (0..inputs.row_count).map(|i| inputs.record(i)).collect();

        let description = match self.scratch.transform.as_ref() {
            Some(t) if !t.description.trim().is_empty() => t.description.clone(),
            _ => self.default_instruction(store),
        };

        let token = self.last_token.next();
        self.last_token = token;
        if !matches!(self.phase, GenerationPhase::Requesting { .. }) {
            self.checkpoint = Some(Checkpoint {
                transform: self.scratch.transform.clone(),
                candidates: self.candidates.clone(),
            });
        }
        self.phase = GenerationPhase::Requesting { token };
        debug!(session = %self.id, %token, "generation requested");

        Ok(DeriveConceptRequest {
            token,
            description,
            output_name: self.scratch.name.trim().to_string(),
            input_fields,
            input_data: InputData {
                name: inputs
                    .table
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| TableId::CUSTOM.to_string()),
                rows,
            },
            model,
        })
    }

    /// Apply the result of the request carrying `token`.
    ///
    /// Stale responses and token mismatches leave the session untouched.
    /// Failures and timeouts restore the draft as it was before the request.
    pub fn complete_generation(
        &mut self,
        token: RequestToken,
        result: std::result::Result<Vec<String>, ServiceError>,
        store: &ConceptStore,
        limits: &Limits,
    ) -> GenerationOutcome {
        if self.phase != (GenerationPhase::Requesting { token }) {
            warn!(session = %self.id, %token, "response for a superseded request ignored");
            return GenerationOutcome::Stale;
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(ServiceError::TokenMismatch { expected, found }) => {
                warn!(session = %self.id, %expected, %found, "mismatched response ignored");
                return GenerationOutcome::Stale;
            }
            Err(ServiceError::Timeout(after)) => {
                warn!(session = %self.id, ?after, "generation timed out");
                self.restore_checkpoint();
                self.phase = GenerationPhase::TimedOut;
                return GenerationOutcome::TimedOut;
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "generation failed");
                self.restore_checkpoint();
                self.phase = GenerationPhase::GenerationFailed {
                    reason: e.to_string(),
                };
                return GenerationOutcome::Failed(e);
            }
        };

        let parent_ids = self.scratch.parent_ids().to_vec();
        let batch = process_candidates(
            &raw,
            &parent_ids,
            Some(&self.scratch.table_ref),
            store,
            limits,
        );
        let Some(set) = CandidateSet::new(batch.accepted) else {
            info!(session = %self.id, rejected = batch.rejected.len(), "no usable candidates");
            self.restore_checkpoint();
            self.phase = GenerationPhase::GenerationFailed {
                reason: "no candidate survived testing".to_string(),
            };
            return GenerationOutcome::NoCandidates {
                rejected: batch.rejected,
            };
        };

        let accepted = set.len();
        let code = set.active().code.clone();
        let default_description = self.default_instruction(store);
        if let Some(transform) = self.scratch.transform.as_mut() {
            transform.code = code;
            transform.provenance = Provenance::Generated;
            if transform.description.trim().is_empty() {
                transform.description = default_description;
            }
        }
        self.candidates = Some(set);
        self.phase = GenerationPhase::CandidatesReady;
        info!(session = %self.id, accepted, rejected = batch.rejected.len(), "candidates ready");
        GenerationOutcome::Applied {
            accepted,
            rejected: batch.rejected,
        }
    }

    fn restore_checkpoint(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            self.scratch.transform = checkpoint.transform;
            self.candidates = checkpoint.candidates;
        }
    }

    // Used by the disambiguation view.

    pub(crate) fn candidates_mut(&mut self) -> Option<&mut CandidateSet> {
        self.candidates.as_mut()
    }

    pub(crate) fn apply_code(&mut self, code: String, provenance: Provenance) {
        if let Some(transform) = self.scratch.transform.as_mut() {
            transform.code = code;
            transform.provenance = provenance;
        }
    }

    pub(crate) fn close_candidates(&mut self, keep_edits: bool) {
        if keep_edits {
            self.checkpoint = None;
        } else {
            self.restore_checkpoint();
        }
        self.candidates = None;
        self.phase = GenerationPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formulator_store::DictTable;
    use serde_json::json;

    struct Fixture {
        store: ConceptStore,
        price: Concept,
        qty: Concept,
    }

    fn fixture() -> Fixture {
        let table = TableId::new("orders");
        let mut store = ConceptStore::new();
        let rows = json!([{"price": 2, "qty": 3}, {"price": 5, "qty": 0}, {"price": 1, "qty": 10}]);
        store.upsert_table(
            DictTable::new("orders", vec!["price".into(), "qty".into()]).with_rows(
                rows.as_array()
                    .unwrap()
                    .iter()
                    .map(|r| r.as_object().cloned().unwrap())
                    .collect(),
            ),
        );
        let price = Concept::original(&table, "price", ScalarType::Number);
        let qty = Concept::original(&table, "qty", ScalarType::Auto);
        store.commit(price.clone()).unwrap();
        store.commit(qty.clone()).unwrap();
        Fixture { store, price, qty }
    }

    fn ready_session(f: &Fixture) -> EditSession {
        let mut session = EditSession::new_derived(SessionId::new(1), &f.price);
        session.set_name("total");
        session
            .set_parents(vec![f.price.id.clone(), f.qty.id.clone()])
            .unwrap();
        session
    }

    #[test]
    fn request_carries_samples_and_default_instruction() {
        let f = fixture();
        let mut session = ready_session(&f);
        let request = session
            .begin_generation(&f.store, &EngineConfig::default(), None)
            .unwrap();
        assert_eq!(request.description, "Derive total from price, qty");
        assert_eq!(request.output_name, "total");
        assert_eq!(request.input_fields[0].values, vec![json!(2), json!(5), json!(1)]);
        assert_eq!(request.input_fields[1].scalar_type, "number");
        assert_eq!(request.input_data.name, "orders");
        assert_eq!(request.input_data.rows[1], *json!({"price": 5, "qty": 0}).as_object().unwrap());
        assert_eq!(session.phase(), &GenerationPhase::Requesting { token: request.token });
    }

    #[test]
    fn drafts_need_a_name_before_generation() {
        let f = fixture();
        let mut session = EditSession::new_derived(SessionId::new(1), &f.price);
        assert!(matches!(
            session.begin_generation(&f.store, &EngineConfig::default(), None),
            Err(EngineError::GenerationNotReady(_))
        ));
        assert_eq!(session.phase(), &GenerationPhase::Idle);
    }

    #[test]
    fn superseded_token_is_stale() {
        let f = fixture();
        let mut session = ready_session(&f);
        let config = EngineConfig::default();
        let first = session.begin_generation(&f.store, &config, None).unwrap();
        let second = session.begin_generation(&f.store, &config, None).unwrap();
        assert_ne!(first.token, second.token);

        let outcome = session.complete_generation(
            first.token,
            Ok(vec!["row => row.price".into()]),
            &f.store,
            &Limits::rows(10),
        );
        assert_eq!(outcome, GenerationOutcome::Stale);
        assert!(session.candidates().is_none());
        assert_eq!(session.scratch().transform.as_ref().unwrap().code, "");
    }

    #[test]
    fn success_installs_first_survivor() {
        let f = fixture();
        let mut session = ready_session(&f);
        let request = session
            .begin_generation(&f.store, &EngineConfig::default(), None)
            .unwrap();
        let outcome = session.complete_generation(
            request.token,
            Ok(vec!["row => row.bogus.x".into(), "row => row.price * row.qty".into()]),
            &f.store,
            &Limits::rows(10),
        );
        assert!(matches!(outcome, GenerationOutcome::Applied { accepted: 1, .. }));
        let transform = session.scratch().transform.as_ref().unwrap();
        assert_eq!(transform.code, "row => row.price * row.qty");
        assert_eq!(transform.provenance, Provenance::Generated);
        assert_eq!(transform.description, "Derive total from price, qty");
        assert_eq!(session.phase(), &GenerationPhase::CandidatesReady);
    }

    #[test]
    fn failure_and_timeout_restore_the_draft() {
        let f = fixture();
        let mut session = ready_session(&f);
        session.set_code("row => row.price").unwrap();
        let config = EngineConfig::default();

        let request = session.begin_generation(&f.store, &config, None).unwrap();
        let outcome = session.complete_generation(
            request.token,
            Err(ServiceError::Status("error".into())),
            &f.store,
            &Limits::rows(10),
        );
        assert!(matches!(outcome, GenerationOutcome::Failed(_)));
        assert!(matches!(session.phase(), GenerationPhase::GenerationFailed { .. }));
        assert_eq!(session.scratch().transform.as_ref().unwrap().code, "row => row.price");

        let request = session.begin_generation(&f.store, &config, None).unwrap();
        let outcome = session.complete_generation(
            request.token,
            Err(ServiceError::Timeout(std::time::Duration::from_secs(20))),
            &f.store,
            &Limits::rows(10),
        );
        assert_eq!(outcome, GenerationOutcome::TimedOut);
        assert_eq!(session.phase(), &GenerationPhase::TimedOut);
    }

    #[test]
    fn token_mismatch_changes_nothing() {
        let f = fixture();
        let mut session = ready_session(&f);
        let request = session
            .begin_generation(&f.store, &EngineConfig::default(), None)
            .unwrap();
        let outcome = session.complete_generation(
            request.token,
            Err(ServiceError::TokenMismatch {
                expected: request.token,
                found: RequestToken::new(99),
            }),
            &f.store,
            &Limits::rows(10),
        );
        assert_eq!(outcome, GenerationOutcome::Stale);
        assert_eq!(session.phase(), &GenerationPhase::Requesting { token: request.token });
    }

    #[test]
    fn custom_sessions_reject_transform_edits() {
        let mut session = EditSession::new_custom(SessionId::new(2), TableId::custom());
        assert!(session.set_code("x => x").is_err());
        session.set_domain(vec![json!("a")]).unwrap();
        assert_eq!(session.scratch().domain, Some(vec![json!("a")]));
    }

    #[test]
    fn editing_tracks_changes() {
        let f = fixture();
        let mut session = EditSession::edit(SessionId::new(3), f.price.clone());
        assert_eq!(session.blockers(&f.store), vec![ValidationIssue::Unchanged]);
        session.set_declared_type(ScalarType::String);
        assert!(session.blockers(&f.store).is_empty());
        assert!(session.type_overridden());
    }
}
