//! Application state.
//!
//! [`AppState`] is the one place the committed store, open edit sessions,
//! preview cache and notifications live. Every mutation goes through a typed
//! method here; saving a session is the only way a concept reaches the store.

use crate::config::EngineConfig;
use crate::disambiguation::Disambiguation;
use crate::executor::{concept_values, Preview};
use crate::graph::{available_in_table, check_store, AuditIssue, ValidationIssue};
use crate::infer::infer_type;
use crate::notify::{Level, Notifications};
use crate::preview::PreviewCache;
use crate::session::{EditSession, GenerationOutcome, SessionId};
use crate::{EngineError, Result};
use formulator_service::{
    request_candidates, DeriveConceptRequest, GenerationService, ModelRef, RequestToken,
    ServiceError,
};
use formulator_store::{
    Concept, ConceptId, ConceptSource, ConceptStore, DictTable, ScalarType, Snapshot, TableId,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
pub struct AppState {
    store: ConceptStore,
    sessions: BTreeMap<SessionId, EditSession>,
    next_session: u64,
    notifications: Notifications,
    previews: PreviewCache,
    config: EngineConfig,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(ConceptStore::new(), config)
    }

    pub fn with_store(store: ConceptStore, config: EngineConfig) -> Self {
        Self {
            store,
            sessions: BTreeMap::new(),
            next_session: 0,
            notifications: Notifications::new(),
            previews: PreviewCache::new(),
            config,
        }
    }

    pub fn from_snapshot(snapshot: Snapshot, config: EngineConfig) -> Result<Self> {
        Ok(Self::with_store(ConceptStore::from_snapshot(snapshot)?, config))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn store(&self) -> &ConceptStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.to_snapshot()
    }

    pub fn into_store(self) -> ConceptStore {
        self.store
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut Notifications {
        &mut self.notifications
    }

    pub fn audit(&self) -> Vec<AuditIssue> {
        check_store(&self.store)
    }

    /// Committed concepts available while `table` is in focus.
    pub fn available_in(&self, table: &TableId) -> Vec<&Concept> {
        let Some(table) = self.store.table(table) else {
            return Vec::new();
        };
        self.store
            .concepts()
            .iter()
            .filter(|c| available_in_table(&self.store, c, table))
            .collect()
    }

    pub fn session(&self, id: SessionId) -> Result<&EditSession> {
        self.sessions.get(&id).ok_or(EngineError::UnknownSession(id))
    }

    pub fn session_mut(&mut self, id: SessionId) -> Result<&mut EditSession> {
        self.sessions
            .get_mut(&id)
            .ok_or(EngineError::UnknownSession(id))
    }

    pub fn sessions(&self) -> impl Iterator<Item = &EditSession> {
        self.sessions.values()
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    fn next_session_id(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId::new(self.next_session)
    }

    /// Start editing a committed concept.
    pub fn open_session(&mut self, concept: &ConceptId) -> Result<SessionId> {
        let committed = self
            .store
            .get(concept)
            .cloned()
            .ok_or_else(|| EngineError::UnknownConcept(concept.clone()))?;
        let id = self.next_session_id();
        self.sessions.insert(id, EditSession::edit(id, committed));
        Ok(id)
    }

    /// Start an unnamed derived draft whose first parent is `seed`.
    ///
    /// Refused while another session holds an unnamed draft from the same
    /// seed.
    pub fn new_derived_draft(&mut self, seed: &ConceptId) -> Result<SessionId> {
        let seed_concept = self
            .store
            .get(seed)
            .cloned()
            .ok_or_else(|| EngineError::UnknownConcept(seed.clone()))?;
        let duplicate = self
            .sessions
            .values()
            .any(|s| s.is_new() && s.scratch().is_draft() && s.seed() == Some(seed));
        if duplicate {
            return Err(EngineError::DuplicateDraft {
                parent: seed.clone(),
            });
        }
        let id = self.next_session_id();
        self.sessions
            .insert(id, EditSession::new_derived(id, &seed_concept));
        Ok(id)
    }

    pub fn new_custom_draft(&mut self, table: TableId) -> SessionId {
        let id = self.next_session_id();
        self.sessions.insert(id, EditSession::new_custom(id, table));
        id
    }

    pub fn save_blockers(&self, session: SessionId) -> Result<Vec<ValidationIssue>> {
        Ok(self.session(session)?.blockers(&self.store))
    }

    /// Validate against the current store and commit the session's concept.
    ///
    /// The session stays open when the save is blocked.
    pub fn save_session(&mut self, session: SessionId) -> Result<ConceptId> {
        let edit = self.session(session)?;
        let issues = edit.blockers(&self.store);
        if !issues.is_empty() {
            return Err(EngineError::Blocked(issues));
        }
        let concept = edit.prepare_commit(&self.store, &self.config);
        let id = concept.id.clone();
        let (name, scalar_type) = (concept.name.clone(), concept.scalar_type);
        self.store.commit(concept)?;
        self.sessions.remove(&session);
        self.previews.invalidate(&session_key(session));
        info!(concept = %id, %name, %scalar_type, %session, "concept saved");
        Ok(id)
    }

    pub fn cancel_session(&mut self, session: SessionId) -> Result<()> {
        self.sessions
            .remove(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        self.previews.invalidate(&session_key(session));
        Ok(())
    }

    pub fn disambiguate(&mut self, session: SessionId) -> Result<Disambiguation<'_>> {
        let limits = self.config.limits(self.config.candidate_sample_rows);
        let edit = self
            .sessions
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        Disambiguation::open(edit, &self.store, limits)
    }

    // ------------------------------------------------------------------
    // Store mutations outside sessions
    // ------------------------------------------------------------------

    /// Remove a custom or derived concept nothing depends on.
    pub fn delete_concept(&mut self, id: &ConceptId) -> Result<Concept> {
        let removed = self.store.remove(id)?;
        self.previews.invalidate(&concept_key(id));
        info!(concept = %id, name = %removed.name, "concept deleted");
        Ok(removed)
    }

    /// Change a committed concept's declared type; values are untouched.
    pub fn set_declared_type(&mut self, id: &ConceptId, scalar_type: ScalarType) -> Result<()> {
        self.store.set_scalar_type(id, scalar_type)?;
        Ok(())
    }

    /// Load or replace a table and create an original concept for each new
    /// column, typed by inference.
    pub fn load_table(&mut self, table: DictTable) -> Result<Vec<ConceptId>> {
        let mut created = Vec::new();
        for column in &table.names {
            let id = ConceptId::original(&table.id, column);
            if self.store.contains(&id) {
                continue;
            }
            let scalar_type = infer_type(table.column(column), self.config.inference_sample);
            created.push(Concept::original(&table.id, column, scalar_type));
        }
        let table_id = table.id.clone();
        self.store.upsert_table(table);

        let mut ids = Vec::with_capacity(created.len());
        for concept in created {
            ids.push(concept.id.clone());
            self.store.commit(concept)?;
        }
        info!(table = %table_id, new_concepts = ids.len(), "table loaded");
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Previews
    // ------------------------------------------------------------------

    /// Preview of a committed derived concept.
    pub fn preview(&mut self, id: &ConceptId) -> Result<Arc<Preview>> {
        let concept = self
            .store
            .get(id)
            .ok_or_else(|| EngineError::UnknownConcept(id.clone()))?;
        let transform = concept
            .transform
            .as_ref()
            .filter(|_| concept.source == ConceptSource::Derived)
            .ok_or_else(|| EngineError::NotDerived(id.clone()))?;
        let limits = self.config.limits(self.config.preview_rows);
        self.previews.get_or_compute(
            &concept_key(id),
            &self.store,
            &transform.code,
            &transform.parent_ids,
            Some(&concept.table_ref),
            &limits,
        )
    }

    /// Preview of a session's scratch procedure.
    pub fn session_preview(&mut self, session: SessionId) -> Result<Arc<Preview>> {
        let scratch = self
            .sessions
            .get(&session)
            .ok_or(EngineError::UnknownSession(session))?
            .scratch();
        let transform = scratch
            .transform
            .as_ref()
            .filter(|_| scratch.source == ConceptSource::Derived)
            .ok_or_else(|| EngineError::NotDerived(scratch.id.clone()))?;
        let limits = self.config.limits(self.config.preview_rows);
        self.previews.get_or_compute(
            &session_key(session),
            &self.store,
            &transform.code,
            &transform.parent_ids,
            Some(&scratch.table_ref),
            &limits,
        )
    }

    pub fn concept_values(&self, id: &ConceptId) -> Result<Vec<Option<Value>>> {
        concept_values(
            &self.store,
            id,
            &self.config.limits(self.config.preview_rows),
        )
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    pub fn begin_generation(
        &mut self,
        session: SessionId,
        model: Option<ModelRef>,
    ) -> Result<DeriveConceptRequest> {
        let edit = self
            .sessions
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        edit.begin_generation(&self.store, &self.config, model)
    }

    /// Apply a generation result to its session and record a notification.
    pub fn complete_generation(
        &mut self,
        session: SessionId,
        token: RequestToken,
        result: std::result::Result<Vec<String>, ServiceError>,
    ) -> Result<GenerationOutcome> {
        let limits = self.config.limits(self.config.candidate_sample_rows);
        let edit = self
            .sessions
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        let name = edit.scratch().name.trim().to_string();
        let outcome = edit.complete_generation(token, result, &self.store, &limits);

        match &outcome {
            GenerationOutcome::Applied { accepted, rejected } => self.notifications.push(
                Level::Success,
                format!(
                    "{accepted} candidate(s) for {name} ({} discarded)",
                    rejected.len()
                ),
            ),
            GenerationOutcome::NoCandidates { rejected } => self.notifications.push(
                Level::Info,
                format!(
                    "no usable candidate for {name}; all {} discarded",
                    rejected.len()
                ),
            ),
            GenerationOutcome::Failed(e) => self
                .notifications
                .push(Level::Error, format!("generation for {name} failed: {e}")),
            GenerationOutcome::TimedOut => self
                .notifications
                .push(Level::Error, format!("generation for {name} timed out")),
            GenerationOutcome::Stale => {}
        }
        Ok(outcome)
    }

    /// Request candidates for a session and apply the response.
    pub async fn generate(
        &mut self,
        session: SessionId,
        service: &dyn GenerationService,
        timeout: Duration,
        model: Option<ModelRef>,
    ) -> Result<GenerationOutcome> {
        let request = self.begin_generation(session, model)?;
        let result = request_candidates(service, &request, timeout).await;
        self.complete_generation(session, request.token, result)
    }
}

fn concept_key(id: &ConceptId) -> String {
    format!("concept:{id}")
}

fn session_key(id: SessionId) -> String {
    format!("session:{}", id.get())
}
