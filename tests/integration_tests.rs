//! Integration tests for the complete Formulator pipeline
//!
//! These tests exercise the crates together:
//! - table files → ingestion → application state → snapshot on disk
//! - derivation chains → materialization → type inference
//! - generation service → candidate filtering → disambiguation → save
//!
//! Run with: cargo test --test integration_tests

use async_trait::async_trait;
use formulator_engine::{
    AppState, Close, EngineConfig, EngineError, GenerationOutcome, GenerationPhase, Level,
    ValidationIssue,
};
use formulator_ingest::{ingest_paths, parse_table, TableFormat};
use formulator_service::{
    CleanDataRequest, CleanDataResponse, DeriveConceptRequest, DeriveConceptResponse,
    GenerationService, RequestToken, ServiceError,
};
use formulator_store::{snapshot, ConceptId, ScalarType, StoreError, TableId};
use serde_json::{json, Value};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

// ============================================================================
// Fixtures
// ============================================================================

const ORDERS: &str = "price,qty,placed\n2,3,2024-01-05\n5,0,2024-02-11\n1,10,2024-03-01\n";

fn orders_state() -> (AppState, ConceptId, ConceptId) {
    let table = parse_table("orders", ORDERS, TableFormat::Delimited).unwrap();
    let mut state = AppState::new(EngineConfig::default());
    let ids = state.load_table(table).unwrap();
    (state, ids[0].clone(), ids[1].clone())
}

fn derive(state: &mut AppState, name: &str, parents: &[&ConceptId], code: &str) -> ConceptId {
    let session = state.new_derived_draft(parents[0]).unwrap();
    let edit = state.session_mut(session).unwrap();
    edit.set_name(name);
    edit.set_parents(parents.iter().map(|p| (*p).clone()).collect())
        .unwrap();
    edit.set_code(code).unwrap();
    state.save_session(session).unwrap()
}

fn outputs(state: &mut AppState, id: &ConceptId) -> Vec<Option<Value>> {
    state
        .preview(id)
        .unwrap()
        .outputs()
        .map(|v| v.cloned())
        .collect()
}

// ============================================================================
// Ingestion → State → Snapshot
// ============================================================================

#[test]
fn test_ingested_tables_get_typed_original_concepts() {
    let (state, price, _) = orders_state();
    let placed = ConceptId::new("original--orders--placed");
    assert_eq!(state.store().get(&price).unwrap().scalar_type, ScalarType::Number);
    assert_eq!(state.store().get(&placed).unwrap().scalar_type, ScalarType::Date);
    assert!(state.audit().is_empty());
}

#[test]
fn test_snapshot_round_trip_preserves_derivations() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("orders.csv"), ORDERS).unwrap();
    let report = ingest_paths(&[dir.path()]);
    assert!(report.is_clean());

    let mut state = AppState::new(EngineConfig::default());
    for table in report.tables {
        state.load_table(table).unwrap();
    }
    let price = ConceptId::new("original--orders--price");
    let qty = ConceptId::new("original--orders--qty");
    let total = derive(&mut state, "total", &[&price, &qty], "row => row.price * row.qty");

    let path = dir.path().join("state.json");
    snapshot::save(state.store(), &path).unwrap();
    let mut reloaded = AppState::with_store(snapshot::load(&path).unwrap(), EngineConfig::default());

    assert_eq!(reloaded.snapshot(), state.snapshot());
    assert_eq!(
        outputs(&mut reloaded, &total),
        vec![Some(json!(6)), Some(json!(0)), Some(json!(10))]
    );
}

// ============================================================================
// Derivation chains
// ============================================================================

#[test]
fn test_chained_derivation_through_custom_concept() {
    let (mut state, price, qty) = orders_state();
    let total = derive(&mut state, "total", &[&price, &qty], "row => row.price * row.qty");
    let label = derive(
        &mut state,
        "label",
        &[&total, &qty],
        "(total, qty) => `${total}/${qty}`",
    );
    assert_eq!(
        outputs(&mut state, &label),
        vec![Some(json!("6/3")), Some(json!("0/0")), Some(json!("10/10"))]
    );
    assert_eq!(state.store().get(&label).unwrap().scalar_type, ScalarType::String);

    let session = state.new_custom_draft(TableId::custom());
    {
        let edit = state.session_mut(session).unwrap();
        edit.set_name("discount");
        edit.set_domain(vec![json!(0.1), json!(0.2)]).unwrap();
    }
    let discount = state.save_session(session).unwrap();
    let scaled = derive(&mut state, "scaled", &[&discount], "d => d * 100");
    assert_eq!(outputs(&mut state, &scaled), vec![Some(json!(10)), Some(json!(20))]);
}

#[test]
fn test_materialization_is_deterministic_and_isolates_failures() {
    let (mut state, price, qty) = orders_state();
    let ratio = derive(
        &mut state,
        "ratio",
        &[&price, &qty],
        "(p, q) => { if (q === 0) throw new Error('no qty'); return p / q; }",
    );
    let first = state.preview(&ratio).unwrap();
    let second = state.preview(&ratio).unwrap();
    assert_eq!(first, second);

    assert_eq!(first.failed_rows(), 1);
    assert_eq!(first.rows[1].output, None);
    assert!(first.rows[1].error.as_deref().unwrap().contains("no qty"));
    assert_eq!(first.rows[2].output, Some(json!(0.1)));
}

#[test]
fn test_cycles_and_dependents_are_refused() {
    let (mut state, price, qty) = orders_state();
    let total = derive(&mut state, "total", &[&price, &qty], "row => row.price * row.qty");
    let double = derive(&mut state, "double", &[&total], "t => t * 2");
    let before = state.snapshot();

    let session = state.open_session(&total).unwrap();
    state
        .session_mut(session)
        .unwrap()
        .set_parents(vec![double.clone()])
        .unwrap();
    match state.save_session(session) {
        Err(EngineError::Blocked(issues)) => {
            assert!(issues.contains(&ValidationIssue::CyclicParent(double.clone())))
        }
        other => panic!("expected a blocked save, got {other:?}"),
    }
    state.cancel_session(session).unwrap();

    assert!(matches!(
        state.delete_concept(&total),
        Err(EngineError::Store(StoreError::HasDependents { .. }))
    ));
    assert_eq!(state.snapshot(), before);
}

// ============================================================================
// Generation
// ============================================================================

enum Reply {
    Candidates(Vec<&'static str>),
    WrongToken,
    Slow,
}

struct ScriptedService(Reply);

#[async_trait]
impl GenerationService for ScriptedService {
    async fn derive_concept(
        &self,
        request: &DeriveConceptRequest,
    ) -> formulator_service::Result<DeriveConceptResponse> {
        let result = match &self.0 {
            Reply::Candidates(c) => c.iter().map(|s| s.to_string()).collect(),
            Reply::WrongToken => {
                return Ok(DeriveConceptResponse::ok(
                    request.token.next(),
                    vec!["row => row.price".to_string()],
                ))
            }
            Reply::Slow => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Vec::new()
            }
        };
        Ok(DeriveConceptResponse::ok(request.token, result))
    }

    async fn clean_data(
        &self,
        _request: &CleanDataRequest,
    ) -> formulator_service::Result<CleanDataResponse> {
        Err(ServiceError::Config("cleaning is not scripted".into()))
    }
}

fn total_draft(state: &mut AppState, price: &ConceptId, qty: &ConceptId) -> formulator_engine::SessionId {
    let session = state.new_derived_draft(price).unwrap();
    let edit = state.session_mut(session).unwrap();
    edit.set_name("total");
    edit.set_parents(vec![price.clone(), qty.clone()]).unwrap();
    session
}

#[tokio::test]
async fn test_generated_candidates_are_filtered_then_chosen() {
    let (mut state, price, qty) = orders_state();
    let session = total_draft(&mut state, &price, &qty);
    let service = ScriptedService(Reply::Candidates(vec![
        "row => row.price * row.qty",
        "row => row.price * row.qty",
        "row => {",
        "row => row.nothing.here",
        "(p, q) => p + q",
    ]));

    let outcome = state
        .generate(session, &service, Duration::from_secs(5), None)
        .await
        .unwrap();
    let GenerationOutcome::Applied { accepted, rejected } = outcome else {
        panic!("expected candidates");
    };
    assert_eq!(accepted, 2);
    assert_eq!(rejected.len(), 3);

    let mut view = state.disambiguate(session).unwrap();
    assert_eq!(view.current_code(), "row => row.price * row.qty");
    view.select(1).unwrap();
    assert_eq!(view.current_code(), "(p, q) => p + q");
    view.close(Close::Commit);

    let total = state.save_session(session).unwrap();
    assert_eq!(
        outputs(&mut state, &total),
        vec![Some(json!(5)), Some(json!(5)), Some(json!(11))]
    );
    let description = &state.store().get(&total).unwrap().transform.as_ref().unwrap().description;
    assert_eq!(description, "Derive total from price, qty");
}

#[tokio::test]
async fn test_stale_and_slow_responses_leave_the_draft_alone() {
    let (mut state, price, qty) = orders_state();
    let session = total_draft(&mut state, &price, &qty);
    state
        .session_mut(session)
        .unwrap()
        .set_code("row => row.qty")
        .unwrap();

    let stale = ScriptedService(Reply::WrongToken);
    let outcome = state
        .generate(session, &stale, Duration::from_secs(5), None)
        .await
        .unwrap();
    assert_eq!(outcome, GenerationOutcome::Stale);
    assert!(state.session(session).unwrap().candidates().is_none());

    let slow = ScriptedService(Reply::Slow);
    let outcome = state
        .generate(session, &slow, Duration::from_millis(20), None)
        .await
        .unwrap();
    assert_eq!(outcome, GenerationOutcome::TimedOut);
    let edit = state.session(session).unwrap();
    assert_eq!(edit.phase(), &GenerationPhase::TimedOut);
    assert_eq!(edit.scratch().transform.as_ref().unwrap().code, "row => row.qty");
    assert!(state
        .notifications()
        .iter()
        .any(|n| n.level == Level::Error));
}

#[test]
fn test_request_tokens_are_monotonic() {
    let (mut state, price, qty) = orders_state();
    let session = total_draft(&mut state, &price, &qty);
    let first = state.begin_generation(session, None).unwrap().token;
    let second = state.begin_generation(session, None).unwrap().token;
    assert!(second > first);

    let outcome = state
        .complete_generation(session, first, Ok(vec!["row => row.price".into()]))
        .unwrap();
    assert_eq!(outcome, GenerationOutcome::Stale);
    let outcome = state
        .complete_generation(session, second, Ok(vec!["row => row.price".into()]))
        .unwrap();
    assert!(matches!(outcome, GenerationOutcome::Applied { accepted: 1, .. }));
    assert_ne!(RequestToken::new(-1), second);
}
