//! Graph inspection and concept editing commands.

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use formulator_engine::graph::{ancestors_of, descendants_of, eligible_parents};
use formulator_engine::{AppState, EngineConfig, EngineError};
use formulator_store::{snapshot, Concept, ConceptId, ConceptSource, ConceptStore, ScalarType};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Load a snapshot into a fresh application state.
pub(crate) fn open_state(path: &Path) -> Result<AppState> {
    let store = snapshot::load(path)
        .with_context(|| format!("failed to load snapshot {}", path.display()))?;
    Ok(AppState::with_store(store, EngineConfig::from_env()?))
}

pub(crate) fn save_state(state: &AppState, path: &Path) -> Result<()> {
    snapshot::save(state.store(), path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    println!("{} wrote {}", "→".yellow(), path.display());
    Ok(())
}

pub(crate) fn resolve(store: &ConceptStore, key: &str) -> Result<ConceptId> {
    store
        .resolve(key)
        .map(|c| c.id.clone())
        .ok_or_else(|| anyhow!("no concept with id or name {key:?}"))
}

fn label(store: &ConceptStore, id: &ConceptId) -> String {
    match store.get(id) {
        Some(c) => format!("{} ({}, {})", c.name, source_label(c), c.scalar_type),
        None => format!("{id} (missing)"),
    }
}

fn source_label(concept: &Concept) -> &'static str {
    match concept.source {
        ConceptSource::Original => "original",
        ConceptSource::Custom => "custom",
        ConceptSource::Derived => "derived",
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None => "undefined".dimmed().to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn cmd_check(path: &Path) -> Result<()> {
    let state = open_state(path)?;
    let issues = state.audit();
    println!(
        "{} tables, {} concepts",
        state.store().tables().len(),
        state.store().len()
    );
    if issues.is_empty() {
        println!("{}", "ok".green().bold());
        return Ok(());
    }
    for issue in &issues {
        println!("  {} {issue}", "✗".red());
    }
    bail!("{} issue(s) found", issues.len())
}

pub fn cmd_show(path: &Path, key: &str) -> Result<()> {
    let state = open_state(path)?;
    let store = state.store();
    let id = resolve(store, key)?;
    let Some(concept) = store.get(&id) else {
        bail!("no concept {id}");
    };

    println!("{} {}", concept.name.bold(), format!("[{id}]").dimmed());
    println!("  source:   {}", source_label(concept));
    println!("  type:     {}", concept.scalar_type);
    if let Some(semantic) = &concept.semantic_type {
        println!("  semantic: {semantic}");
    }
    println!("  table:    {}", concept.table_ref);
    if let Some(domain) = &concept.domain {
        println!("  domain:   {} value(s)", domain.len());
    }
    if let Some(transform) = &concept.transform {
        println!("  code:     {}", transform.code.cyan());
        if !transform.description.is_empty() {
            println!("  about:    {}", transform.description);
        }
    }

    println!("{}", "ancestors".bold());
    for ancestor in ancestors_of(store, &id) {
        println!("  {}", label(store, &ancestor));
    }
    println!("{}", "descendants".bold());
    for descendant in descendants_of(store, &id) {
        println!("  {}", label(store, &descendant));
    }
    println!("{}", "eligible parents".bold());
    for parent in eligible_parents(store, concept) {
        println!("  {}", label(store, &parent.id));
    }
    Ok(())
}

pub fn cmd_materialize(path: &Path, key: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let mut config = EngineConfig::from_env()?;
    if let Some(limit) = limit {
        config.preview_rows = limit;
    }
    let store = snapshot::load(path)
        .with_context(|| format!("failed to load snapshot {}", path.display()))?;
    let mut state = AppState::with_store(store, config);
    let id = resolve(state.store(), key)?;

    let is_derived = state.store().get(&id).is_some_and(Concept::is_derived);
    if !is_derived {
        let values = state.concept_values(&id)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&values)?);
        } else {
            for value in &values {
                println!("{}", render(value.as_ref()));
            }
        }
        return Ok(());
    }

    let preview = state.preview(&id)?;
    let inferred = formulator_engine::infer_type(preview.outputs(), state.config().inference_sample);
    if json {
        println!("{}", serde_json::to_string_pretty(&*preview)?);
        return Ok(());
    }

    println!(
        "{} ← {}",
        label(state.store(), &id).bold(),
        preview.parent_names.join(", ")
    );
    for row in &preview.rows {
        let inputs: Vec<String> = row.inputs.iter().map(|v| render(v.as_ref())).collect();
        match &row.error {
            Some(error) => println!("  {} → {}", inputs.join(" | "), error.red()),
            None => println!("  {} → {}", inputs.join(" | "), render(row.output.as_ref())),
        }
    }
    println!(
        "{} rows, {} failed, inferred type {}",
        preview.rows.len(),
        preview.failed_rows(),
        inferred.to_string().green()
    );
    Ok(())
}

pub struct DeriveArgs {
    pub name: String,
    pub from: Vec<String>,
    pub code: String,
    pub description: Option<String>,
    pub scalar_type: Option<String>,
}

pub fn cmd_derive(path: &Path, args: DeriveArgs, out: Option<&PathBuf>) -> Result<()> {
    let mut state = open_state(path)?;
    let parents = args
        .from
        .iter()
        .map(|key| resolve(state.store(), key))
        .collect::<Result<Vec<_>>>()?;
    let Some(seed) = parents.first() else {
        bail!("at least one parent is required");
    };
    let declared: Option<ScalarType> = args
        .scalar_type
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| anyhow!(e))?;

    let session = state.new_derived_draft(seed)?;
    {
        let edit = state.session_mut(session)?;
        edit.set_name(args.name.trim());
        edit.set_parents(parents.clone())?;
        edit.set_code(args.code)?;
        if let Some(description) = args.description {
            edit.set_description(description)?;
        }
        if let Some(scalar_type) = declared {
            edit.set_declared_type(scalar_type);
        }
    }

    // Unparsable code is reported with the other blockers below.
    if let Ok(preview) = state.session_preview(session) {
        if preview.failed_rows() > 0 {
            println!(
                "{} {} of {} preview rows failed",
                "!".yellow(),
                preview.failed_rows(),
                preview.rows.len()
            );
        }
    }

    let id = match state.save_session(session) {
        Ok(id) => id,
        Err(EngineError::Blocked(issues)) => {
            for issue in &issues {
                println!("  {} {issue}", "✗".red());
            }
            bail!("concept {:?} not saved", args.name);
        }
        Err(e) => return Err(e.into()),
    };
    println!("{} saved {}", "ok".green().bold(), label(state.store(), &id));
    save_state(&state, out.map(PathBuf::as_path).unwrap_or(path))
}

pub fn cmd_delete(path: &Path, key: &str, out: Option<&PathBuf>) -> Result<()> {
    let mut state = open_state(path)?;
    let id = resolve(state.store(), key)?;
    let removed = state.delete_concept(&id)?;
    println!("{} deleted {}", "ok".green().bold(), removed.name);
    save_state(&state, out.map(PathBuf::as_path).unwrap_or(path))
}
