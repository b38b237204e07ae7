//! Formulator CLI
//!
//! Works on snapshot files (`{ tables, concepts }` JSON):
//! - auditing and inspecting the derivation graph,
//! - materializing concept previews,
//! - deriving and deleting concepts with the same validation the engine
//!   applies to edit sessions,
//! - requesting generated candidates and cleaned tables from the service,
//! - building snapshots from table files.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod concepts;
mod generation;
mod tables;

#[derive(Parser)]
#[command(name = "formulator")]
#[command(author, version, about = "Formulator: derive new data fields from existing ones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit a snapshot's derivation graph.
    Check { snapshot: PathBuf },

    /// Show a concept with its ancestors, descendants and eligible parents.
    Show {
        snapshot: PathBuf,
        /// Concept id or name.
        concept: String,
    },

    /// Print preview rows of a concept and its inferred type.
    Materialize {
        snapshot: PathBuf,
        /// Concept id or name.
        concept: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Print the preview as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create, validate and save a derived concept.
    Derive {
        snapshot: PathBuf,
        #[arg(long)]
        name: String,
        /// Comma-separated parent ids or names; the first fixes the table.
        #[arg(long, value_delimiter = ',', required = true)]
        from: Vec<String>,
        #[arg(long)]
        code: String,
        #[arg(long)]
        description: Option<String>,
        /// Declared type instead of the inferred one.
        #[arg(long = "type")]
        scalar_type: Option<String>,
        /// Output snapshot (default: overwrite the input).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete a custom or derived concept nothing depends on.
    Delete {
        snapshot: PathBuf,
        concept: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Request candidate procedures for a new derived concept.
    Generate {
        snapshot: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, value_delimiter = ',', required = true)]
        from: Vec<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Service base URL (default: FORMULATOR_SERVICE_URL or localhost).
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Save the concept with candidate I (0-based).
        #[arg(long)]
        pick: Option<usize>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Build a snapshot from table files or directories.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },

    /// Send a raw table file to the cleaning service and save the result.
    Clean {
        file: PathBuf,
        #[arg(long, default_value = "")]
        instructions: String,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Check { snapshot } => concepts::cmd_check(&snapshot),
        Commands::Show { snapshot, concept } => concepts::cmd_show(&snapshot, &concept),
        Commands::Materialize {
            snapshot,
            concept,
            limit,
            json,
        } => concepts::cmd_materialize(&snapshot, &concept, limit, json),
        Commands::Derive {
            snapshot,
            name,
            from,
            code,
            description,
            scalar_type,
            out,
        } => concepts::cmd_derive(
            &snapshot,
            concepts::DeriveArgs {
                name,
                from,
                code,
                description,
                scalar_type,
            },
            out.as_ref(),
        ),
        Commands::Delete {
            snapshot,
            concept,
            out,
        } => concepts::cmd_delete(&snapshot, &concept, out.as_ref()),
        Commands::Generate {
            snapshot,
            name,
            from,
            description,
            service,
            timeout_secs,
            pick,
            out,
        } => {
            generation::cmd_generate(
                &snapshot,
                generation::GenerateArgs {
                    name,
                    from,
                    description,
                    pick,
                },
                generation::service_config(service.as_deref(), timeout_secs)?,
                out.as_ref(),
            )
            .await
        }
        Commands::Ingest { files, out } => tables::cmd_ingest(&files, &out),
        Commands::Clean {
            file,
            instructions,
            service,
            timeout_secs,
            out,
        } => {
            generation::cmd_clean(
                &file,
                &instructions,
                generation::service_config(service.as_deref(), timeout_secs)?,
                &out,
            )
            .await
        }
    }
}
