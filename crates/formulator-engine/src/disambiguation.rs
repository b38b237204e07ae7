//! Side-by-side choice between surviving candidates.

use crate::candidates::Candidate;
use crate::executor::{materialize, Limits, Preview};
use crate::session::EditSession;
use crate::{EngineError, Result};
use formulator_store::{ConceptStore, Provenance};
use tracing::debug;

/// How the coordinator is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Close {
    /// Keep the active or edited procedure in the draft.
    Commit,
    /// Drop the candidates and restore the draft's previous procedure.
    Discard,
}

/// Borrowed view over a session's candidate set.
///
/// Switching candidates writes the chosen procedure into the draft
/// immediately, so the draft's preview always matches the active candidate.
pub struct Disambiguation<'s> {
    session: &'s mut EditSession,
    store: &'s ConceptStore,
    /// Bounds for re-running revised candidates.
    limits: Limits,
}

impl<'s> Disambiguation<'s> {
    pub fn open(
        session: &'s mut EditSession,
        store: &'s ConceptStore,
        limits: Limits,
    ) -> Result<Self> {
        match session.candidates() {
            Some(set) if !set.is_empty() => Ok(Self {
                session,
                store,
                limits,
            }),
            _ => Err(EngineError::NoCandidates),
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        self.session
            .candidates()
            .map(|set| set.candidates())
            .unwrap_or(&[])
    }

    pub fn active_index(&self) -> usize {
        self.session
            .candidates()
            .map_or(0, |set| set.active_index())
    }

    /// Test-run previews in ranking order.
    pub fn previews(&self) -> impl Iterator<Item = &Preview> + '_ {
        self.candidates().iter().map(|c| &c.preview)
    }

    /// The procedure the draft currently holds.
    pub fn current_code(&self) -> &str {
        self.session
            .scratch()
            .transform
            .as_ref()
            .map_or("", |t| t.code.as_str())
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        let set = self
            .session
            .candidates_mut()
            .ok_or(EngineError::NoCandidates)?;
        let chosen = set.select(index)?;
        let code = chosen.code.clone();
        let provenance = if chosen.revised {
            Provenance::Manual
        } else {
            Provenance::Generated
        };
        debug!(session = %self.session.id(), index, "candidate selected");
        self.session.apply_code(code, provenance);
        Ok(())
    }

    /// Replace the active candidate's procedure with a hand-edited revision.
    ///
    /// The revision must parse and is test-run over the candidate sample;
    /// it replaces the active candidate, so switching away and back keeps
    /// it. The description is kept and provenance becomes manual.
    pub fn accept_revision(&mut self, code: impl Into<String>) -> Result<()> {
        let code = code.into();
        let scratch = self.session.scratch();
        let preview = materialize(
            self.store,
            &code,
            scratch.parent_ids(),
            Some(&scratch.table_ref),
            &self.limits,
        )?;
        let set = self
            .session
            .candidates_mut()
            .ok_or(EngineError::NoCandidates)?;
        let index = set.active_index();
        set.revise_active(code.clone(), preview);
        debug!(session = %self.session.id(), index, "candidate revised");
        self.session.apply_code(code, Provenance::Manual);
        Ok(())
    }

    pub fn close(self, how: Close) {
        debug!(session = %self.session.id(), ?how, "candidates closed");
        self.session.close_candidates(how == Close::Commit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::executor::Limits;
    use crate::session::{GenerationPhase, SessionId};
    use formulator_store::{Concept, ConceptStore, DictTable, ScalarType, TableId};
    use serde_json::json;

    fn session_with_candidates() -> (ConceptStore, EditSession) {
        let table = TableId::new("t");
        let mut store = ConceptStore::new();
        store.upsert_table(
            DictTable::new("t", vec!["a".into()])
                .with_rows(vec![json!({"a": 2}).as_object().cloned().unwrap()]),
        );
        let a = Concept::original(&table, "a", ScalarType::Number);
        store.commit(a.clone()).unwrap();

        let mut session = EditSession::new_derived(SessionId::new(1), &a);
        session.set_name("b");
        session.set_code("x => x").unwrap();
        session.set_description("double it").unwrap();
        let request = session
            .begin_generation(&store, &EngineConfig::default(), None)
            .unwrap();
        session.complete_generation(
            request.token,
            Ok(vec!["x => x * 2".into(), "x => x + x".into()]),
            &store,
            &Limits::rows(10),
        );
        (store, session)
    }

    fn code(session: &EditSession) -> (String, Provenance, String) {
        let t = session.scratch().transform.clone().unwrap();
        (t.code, t.provenance, t.description)
    }

    #[test]
    fn switching_updates_the_draft() {
        let (store, mut session) = session_with_candidates();
        let mut view = Disambiguation::open(&mut session, &store, Limits::rows(10)).unwrap();
        assert_eq!(view.candidates().len(), 2);
        assert_eq!(view.previews().next().unwrap().rows[0].output, Some(json!(4)));
        view.select(1).unwrap();
        assert_eq!(view.active_index(), 1);
        assert_eq!(view.current_code(), "x => x + x");
        assert!(view.select(2).is_err());
        view.close(Close::Commit);
        assert_eq!(
            code(&session),
            ("x => x + x".into(), Provenance::Generated, "double it".into())
        );
        assert!(session.candidates().is_none());
        assert_eq!(session.phase(), &GenerationPhase::Idle);
    }

    #[test]
    fn accepted_revision_is_manual_and_keeps_description() {
        let (store, mut session) = session_with_candidates();
        let mut view = Disambiguation::open(&mut session, &store, Limits::rows(10)).unwrap();
        assert!(view.accept_revision("x => ").is_err());
        view.accept_revision("x => x * 2 + 1").unwrap();
        view.close(Close::Commit);
        assert_eq!(
            code(&session),
            ("x => x * 2 + 1".into(), Provenance::Manual, "double it".into())
        );
    }

    #[test]
    fn revision_survives_switching_back() {
        let (store, mut session) = session_with_candidates();
        let mut view = Disambiguation::open(&mut session, &store, Limits::rows(10)).unwrap();
        view.accept_revision("x => x * 3").unwrap();
        assert_eq!(view.candidates()[0].code, "x => x * 3");
        assert_eq!(view.previews().next().unwrap().rows[0].output, Some(json!(6)));

        view.select(1).unwrap();
        assert_eq!(view.current_code(), "x => x + x");
        view.select(0).unwrap();
        assert_eq!(view.current_code(), "x => x * 3");
        view.close(Close::Commit);
        assert_eq!(
            code(&session),
            ("x => x * 3".into(), Provenance::Manual, "double it".into())
        );
    }

    #[test]
    fn discard_restores_previous_procedure() {
        let (store, mut session) = session_with_candidates();
        Disambiguation::open(&mut session, &store, Limits::rows(10))
            .unwrap()
            .close(Close::Discard);
        assert_eq!(code(&session).0, "x => x");
        assert!(session.candidates().is_none());
        assert!(Disambiguation::open(&mut session, &store, Limits::rows(10)).is_err());
    }
}
