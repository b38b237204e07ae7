use formulator_store::{Concept, ConceptId, ConceptStore, DictTable, ScalarType, TableId, Transform};
use proptest::prelude::*;

/// Random parent picks for a chain of derived concepts over one original.
fn edits() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
    proptest::collection::vec(
        (0usize..12, proptest::collection::vec(0usize..12, 1..4)),
        1..40,
    )
}

fn reachable(store: &ConceptStore, from: &ConceptId, target: &ConceptId) -> bool {
    let mut stack = vec![from.clone()];
    let mut seen = std::collections::HashSet::new();
    while let Some(id) = stack.pop() {
        if &id == target {
            return true;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(c) = store.get(&id) {
            stack.extend(c.parent_ids().iter().cloned());
        }
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn commits_never_create_cycles(edits in edits()) {
        let table = TableId::new("t");
        let mut store = ConceptStore::new();
        store.upsert_table(DictTable::new("t", vec!["a".into()]));
        let root = Concept::original(&table, "a", ScalarType::Number);
        store.commit(root.clone()).unwrap();

        let mut ids = vec![root.id.clone()];
        for i in 0..11 {
            let c = Concept::derived(format!("d{i}"), table.clone(), Transform::new(vec![root.id.clone()], "x => x"))
                .with_id(format!("d{i}").as_str());
            ids.push(c.id.clone());
            store.commit(c).unwrap();
        }

        for (target, parents) in edits {
            if target == 0 {
                continue;
            }
            let Some(mut concept) = store.get(&ids[target]).cloned() else { continue };
            concept.transform = Some(Transform::new(
                parents.iter().map(|p| ids[*p].clone()).collect(),
                "x => x",
            ));
            let _ = store.commit(concept);

            for id in &ids {
                let concept = store.get(id).unwrap();
                for parent in concept.parent_ids() {
                    prop_assert!(!reachable(&store, parent, id), "cycle through {}", id);
                }
            }
        }
    }
}
