//! Snapshot construction from table files.

use crate::concepts::save_state;
use anyhow::{bail, Result};
use colored::Colorize;
use formulator_engine::{AppState, EngineConfig};
use formulator_ingest::ingest_paths;
use std::path::{Path, PathBuf};

pub fn cmd_ingest(files: &[PathBuf], out: &Path) -> Result<()> {
    let report = ingest_paths(files);
    for (path, error) in &report.failures {
        println!("  {} {}: {error}", "✗".red(), path.display());
    }
    if report.tables.is_empty() {
        bail!("no table could be loaded");
    }

    let mut state = AppState::new(EngineConfig::from_env()?);
    for table in report.tables {
        let (id, rows) = (table.id.clone(), table.len());
        let created = state.load_table(table)?;
        println!(
            "{} {id}: {rows} rows, {} columns",
            "ok".green().bold(),
            created.len()
        );
    }
    save_state(&state, out)
}
