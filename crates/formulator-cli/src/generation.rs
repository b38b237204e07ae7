//! Commands backed by the generation service.

use crate::concepts::{open_state, resolve, save_state};
use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use formulator_engine::{AppState, Close, EngineConfig, GenerationOutcome};
use formulator_ingest::{parse_table, TableFormat};
use formulator_service::{
    request_cleaning, CleanDataRequest, ContentType, HttpGenerationService, RequestToken,
    ServiceConfig,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service settings from the environment, overridden by command-line flags.
pub fn service_config(url: Option<&str>, timeout_secs: Option<u64>) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::from_env()?;
    if let Some(url) = url {
        config = config.with_base_url(url)?;
    }
    if let Some(secs) = timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

pub struct GenerateArgs {
    pub name: String,
    pub from: Vec<String>,
    pub description: String,
    pub pick: Option<usize>,
}

pub async fn cmd_generate(
    path: &Path,
    args: GenerateArgs,
    config: ServiceConfig,
    out: Option<&PathBuf>,
) -> Result<()> {
    let mut state = open_state(path)?;
    let parents = args
        .from
        .iter()
        .map(|key| resolve(state.store(), key))
        .collect::<Result<Vec<_>>>()?;
    let Some(seed) = parents.first() else {
        bail!("at least one parent is required");
    };

    let session = state.new_derived_draft(seed)?;
    {
        let edit = state.session_mut(session)?;
        edit.set_name(args.name.trim());
        edit.set_parents(parents.clone())?;
        edit.set_description(args.description)?;
    }

    let (timeout, model) = (config.timeout, config.model.clone());
    let service = HttpGenerationService::new(config)?;
    println!("{} requesting candidates for {}", "→".yellow(), args.name.bold());
    let outcome = state.generate(session, &service, timeout, model).await?;

    let rejected = match &outcome {
        GenerationOutcome::Applied { rejected, .. } => rejected,
        GenerationOutcome::NoCandidates { rejected } => rejected,
        GenerationOutcome::Failed(e) => bail!("generation failed: {e}"),
        GenerationOutcome::TimedOut => bail!("generation timed out after {timeout:?}"),
        GenerationOutcome::Stale => bail!("response did not match the request"),
    };
    for r in rejected {
        println!("  {} #{} {}", "✗".red(), r.rank, r.reason.to_string().dimmed());
    }

    let mut view = state
        .disambiguate(session)
        .map_err(|_| anyhow!("no usable candidate for {}", args.name))?;
    for (i, candidate) in view.candidates().iter().enumerate() {
        let sample: Vec<String> = candidate
            .preview
            .outputs()
            .take(5)
            .map(|v| v.map_or_else(|| "undefined".to_string(), |v| v.to_string()))
            .collect();
        println!(
            "  [{i}] {}\n      {} {}",
            candidate.code.cyan(),
            "sample:".dimmed(),
            sample.join(", ")
        );
    }

    let Some(pick) = args.pick else {
        view.close(Close::Discard);
        println!("re-run with {} to save one", "--pick N".bold());
        return Ok(());
    };
    view.select(pick)?;
    view.close(Close::Commit);

    let id = state.save_session(session)?;
    println!("{} saved {} [{id}]", "ok".green().bold(), args.name);
    save_state(&state, out.map(PathBuf::as_path).unwrap_or(path))
}

/// Send a raw table file for cleaning and add the cleaned table to `out`,
/// creating the snapshot when it does not exist.
pub async fn cmd_clean(
    file: &Path,
    instructions: &str,
    config: ServiceConfig,
    out: &Path,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let table_id = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "cleaned".to_string());

    let request = CleanDataRequest {
        token: RequestToken::new(1),
        content_type: ContentType::Text,
        raw_data: raw,
        image_cleaning_instruction: instructions.to_string(),
        model: config.model.clone(),
    };
    let timeout = config.timeout;
    let service = HttpGenerationService::new(config)?;
    println!("{} cleaning {}", "→".yellow(), file.display());
    let cleaned = request_cleaning(&service, &request, timeout).await?;
    if !cleaned.info.reason.is_empty() {
        println!("  {}", cleaned.info.reason.dimmed());
    }
    let table = parse_table(&table_id, &cleaned.content, TableFormat::Delimited)?;

    let mut state = if out.exists() {
        open_state(out)?
    } else {
        AppState::new(EngineConfig::from_env()?)
    };
    let rows = table.len();
    let created = state.load_table(table)?;
    println!(
        "{} table {table_id}: {rows} rows, {} new concepts",
        "ok".green().bold(),
        created.len()
    );
    save_state(&state, out)
}
