use formulator_ingest::{ingest_paths, load_table, IngestError};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

#[test]
fn directory_ingestion_reports_bad_files_and_keeps_going() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("a_orders.csv"),
        "price,qty\n2,3\n5,0\n1,10\n",
    )
    .unwrap();
    fs::write(dir.path().join("b_broken.json"), "{not json").unwrap();
    fs::write(
        dir.path().join("c_people.json"),
        r#"[{"name": "Ada", "age": 36}]"#,
    )
    .unwrap();
    fs::write(dir.path().join("notes.md"), "ignored").unwrap();

    let report = ingest_paths(&[dir.path()]);
    let ids: Vec<_> = report.tables.iter().map(|t| t.id.to_string()).collect();
    assert_eq!(ids, ["a_orders", "c_people"]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].0.ends_with("b_broken.json"));
    assert!(matches!(report.failures[0].1, IngestError::Json { .. }));
    assert_eq!(report.tables[0].rows[2]["qty"], json!(10));
}

#[test]
fn explicit_files_with_unknown_extensions_fail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.xlsx");
    fs::write(&path, "binary").unwrap();
    let report = ingest_paths(&[&path]);
    assert!(report.tables.is_empty());
    assert!(matches!(report.failures[0].1, IngestError::Unsupported(_)));

    let missing = dir.path().join("missing.csv");
    assert!(matches!(load_table(&missing), Err(IngestError::Io { .. })));
}

#[test]
fn duplicate_table_ids_are_suffixed() {
    let dir = tempdir().unwrap();
    let sub = dir.path().join("nested");
    fs::create_dir(&sub).unwrap();
    fs::write(dir.path().join("t.csv"), "a\n1\n").unwrap();
    fs::write(sub.join("t.tsv"), "a\tb\n1\t2\n").unwrap();

    let report = ingest_paths(&[dir.path().join("t.csv"), sub.join("t.tsv")]);
    let ids: Vec<_> = report.tables.iter().map(|t| t.id.to_string()).collect();
    assert_eq!(ids, ["t", "t-2"]);
    assert!(report.is_clean());
}

#[test]
fn header_only_files_are_empty_tables() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.csv");
    fs::write(&path, "a,b\n").unwrap();
    let table = load_table(&path).unwrap();
    assert!(table.is_empty());
    assert_eq!(table.names, vec!["a", "b"]);

    fs::write(&path, "").unwrap();
    assert!(load_table(&path).is_err());
}
