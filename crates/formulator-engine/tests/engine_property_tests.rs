use formulator_engine::{
    descendants_of, materialize, validate, AppState, EngineConfig, EngineError, Limits,
    ValidationIssue,
};
use formulator_store::{ConceptId, DictTable, TableId};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn table(values: &[i64]) -> DictTable {
    let rows: Vec<Map<String, Value>> = values
        .iter()
        .map(|v| {
            let mut row = Map::new();
            row.insert("a".into(), json!(v));
            row
        })
        .collect();
    DictTable::new("t", vec!["a".into()]).with_rows(rows)
}

/// A state with one original column and `n` derived concepts, each over a
/// random earlier concept.
fn chain(values: &[i64], picks: &[usize]) -> (AppState, Vec<ConceptId>) {
    let mut state = AppState::new(EngineConfig::default());
    let mut ids = state.load_table(table(values)).unwrap();
    for (i, pick) in picks.iter().enumerate() {
        let parent = ids[pick % ids.len()].clone();
        let session = state.new_derived_draft(&parent).unwrap();
        let edit = state.session_mut(session).unwrap();
        edit.set_name(format!("d{i}"));
        edit.set_code("x => x + 1").unwrap();
        ids.push(state.save_session(session).unwrap());
    }
    (state, ids)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn saves_through_sessions_never_create_cycles(
        values in proptest::collection::vec(-100i64..100, 1..8),
        picks in proptest::collection::vec(0usize..32, 1..12),
        edits in proptest::collection::vec((0usize..32, 0usize..32), 1..12),
    ) {
        let (mut state, ids) = chain(&values, &picks);
        for (target, parent) in edits {
            let target = &ids[1 + target % (ids.len() - 1)];
            let parent = &ids[parent % ids.len()];
            let session = state.open_session(target).unwrap();
            state.session_mut(session).unwrap().set_parents(vec![parent.clone()]).unwrap();

            let descendant = parent == target
                || descendants_of(state.store(), target).contains(parent);
            match state.save_session(session) {
                Ok(_) => prop_assert!(!descendant),
                Err(EngineError::Blocked(issues)) => {
                    prop_assert!(issues.iter().any(|i| matches!(
                        i,
                        ValidationIssue::CyclicParent(_)
                            | ValidationIssue::SelfReference
                            | ValidationIssue::Unchanged
                    )));
                    state.cancel_session(session).unwrap();
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
        prop_assert!(state.audit().is_empty());
        for id in &ids {
            let concept = state.store().get(id).unwrap();
            prop_assert!(validate(state.store(), concept)
                .iter()
                .all(|i| !matches!(i, ValidationIssue::CyclicParent(_))));
        }
    }

    #[test]
    fn materialization_is_deterministic(
        values in proptest::collection::vec(-1000i64..1000, 0..20),
        picks in proptest::collection::vec(0usize..8, 1..6),
    ) {
        let (state, ids) = chain(&values, &picks);
        let last = ids.last().unwrap().clone();
        let code = "x => x % 3 === 0 ? String(x) : x * 2";
        let run = || materialize(state.store(), code, &[last.clone()], Some(&TableId::new("t")), &Limits::default()).unwrap();
        let first = run();
        prop_assert_eq!(&first, &run());
        prop_assert_eq!(first.rows.len(), values.len());
    }

    #[test]
    fn one_throwing_row_leaves_the_rest_defined(
        values in proptest::collection::vec(1i64..1000, 1..20),
        bad in 0usize..20,
    ) {
        let bad = bad % values.len();
        let mut values = values;
        values[bad] = 0;
        let (state, ids) = chain(&values, &[]);
        let code = "x => { if (x === 0) throw new Error('zero'); return 100 / x; }";
        let preview = materialize(state.store(), code, &[ids[0].clone()], None, &Limits::default()).unwrap();
        prop_assert_eq!(preview.rows.len(), values.len());
        for (i, row) in preview.rows.iter().enumerate() {
            prop_assert_eq!(row.output.is_none(), values[i] == 0);
        }
        prop_assert_eq!(preview.failed_rows(), values.iter().filter(|v| **v == 0).count());
    }
}
