//! Store invariant tests

use super::*;
use serde_json::json;

/// `orders(price, qty)` with both columns committed as original concepts.
fn orders_store() -> (ConceptStore, ConceptId, ConceptId) {
    let table = TableId::new("orders");
    let mut store = ConceptStore::new();
    store.upsert_table(
        DictTable::new("orders", vec!["price".into(), "qty".into()]).with_rows(vec![
            json!({"price": 2, "qty": 3}).as_object().cloned().unwrap(),
        ]),
    );
    let price = Concept::original(&table, "price", ScalarType::Number);
    let qty = Concept::original(&table, "qty", ScalarType::Number);
    let (price_id, qty_id) = (price.id.clone(), qty.id.clone());
    store.commit(price).unwrap();
    store.commit(qty).unwrap();
    (store, price_id, qty_id)
}

fn derived(name: &str, parents: Vec<ConceptId>) -> Concept {
    Concept::derived(
        name,
        TableId::new("orders"),
        Transform::new(parents, "row => 1"),
    )
}

#[test]
fn commit_rejects_unknown_and_empty_parents() {
    let (mut store, _, _) = orders_store();

    let err = store.commit(derived("x", vec![])).unwrap_err();
    assert!(matches!(err, StoreError::EmptyParents(_)));

    let err = store
        .commit(derived("x", vec![ConceptId::new("missing")]))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownParent { .. }));
    assert_eq!(store.len(), 2);
}

#[test]
fn commit_rejects_unnamed_drafts() {
    let (mut store, price, _) = orders_store();
    let err = store.commit(derived("  ", vec![price])).unwrap_err();
    assert!(matches!(err, StoreError::Unnamed(_)));
}

#[test]
fn commit_rejects_self_reference_and_cycles() {
    let (mut store, price, qty) = orders_store();
    let total = derived("total", vec![price, qty.clone()]);
    let total_id = total.id.clone();
    store.commit(total.clone()).unwrap();

    let total2 = derived("total2", vec![total_id.clone(), qty]);
    let total2_id = total2.id.clone();
    store.commit(total2).unwrap();

    let mut looped = total.clone();
    looped.transform = Some(Transform::new(vec![total2_id], "r => r"));
    assert!(matches!(
        store.commit(looped),
        Err(StoreError::Cycle(_))
    ));

    let mut selfish = total;
    selfish.transform = Some(Transform::new(vec![total_id.clone()], "r => r"));
    assert!(matches!(
        store.commit(selfish),
        Err(StoreError::SelfReference(_))
    ));

    // Unchanged after both rejections.
    assert_eq!(store.get(&total_id).unwrap().parent_ids().len(), 2);
}

#[test]
fn remove_is_refused_while_dependents_exist() {
    let (mut store, price, qty) = orders_store();
    let total = derived("total", vec![price, qty]);
    let total_id = total.id.clone();
    store.commit(total).unwrap();
    let total2 = derived("total2", vec![total_id.clone()]);
    let total2_id = total2.id.clone();
    store.commit(total2).unwrap();

    match store.remove(&total_id) {
        Err(StoreError::HasDependents { dependents, .. }) => {
            assert_eq!(dependents, vec![total2_id.clone()]);
        }
        other => panic!("expected HasDependents, got {other:?}"),
    }

    store.remove(&total2_id).unwrap();
    assert!(store.get(&total2_id).is_none());
    assert!(store.get(&total_id).is_some());
    store.remove(&total_id).unwrap();
    assert_eq!(store.len(), 2);
}

#[test]
fn originals_cannot_be_removed() {
    let (mut store, price, _) = orders_store();
    assert!(matches!(
        store.remove(&price),
        Err(StoreError::OriginalNotDeletable(_))
    ));
}

#[test]
fn table_revision_tracks_replacements() {
    let (mut store, _, _) = orders_store();
    let before = store.tables_revision();
    store.upsert_table(DictTable::new("orders", vec!["price".into(), "qty".into()]));
    assert_eq!(store.tables_revision(), before + 1);
    assert_eq!(store.tables().len(), 1);
    assert!(store.table(&TableId::new("orders")).unwrap().is_empty());
}

#[test]
fn snapshot_rejects_duplicate_ids() {
    let (store, _, _) = orders_store();
    let mut snapshot = store.to_snapshot();
    snapshot.concepts.push(snapshot.concepts[0].clone());
    assert!(matches!(
        ConceptStore::from_snapshot(snapshot),
        Err(StoreError::DuplicateId(_))
    ));
}

#[test]
fn resolve_prefers_ids_then_names() {
    let (store, price, _) = orders_store();
    assert_eq!(store.resolve(price.as_str()).unwrap().name, "price");
    assert_eq!(store.resolve("qty").unwrap().name, "qty");
    assert!(store.resolve("nope").is_none());
}
