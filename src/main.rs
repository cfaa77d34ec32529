// Data Matrix CLI
//
//   data-matrix import <paths...>
//   data-matrix query "SELECT Company FROM BB_ASSETS WHERE Revenue > 300"
//   data-matrix asset <id> [--columns a,b]
//   data-matrix metadata <id>
//   data-matrix columns
//   data-matrix stats
//
// Results go to stdout as pretty JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use data_matrix::{is_data_file, DataMatrix, Settings};

/// Data Matrix - versioned entity store fed by dated CSV extracts
#[derive(Parser, Debug)]
#[command(name = "data-matrix")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override the data directory from settings
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest files; directories are expanded to the data files they contain
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run a SELECT query
    Query { sql: String },

    /// Show one asset
    Asset {
        id: String,

        /// Only these columns (comma-separated)
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
    },

    /// Show effective date and source of every column of one asset
    Metadata { id: String },

    /// List every known column
    Columns,

    /// Entity and column counts
    Stats,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load().context("Failed to load settings")?;
    if let Some(data_dir) = cli.data_dir {
        settings = settings.with_data_dir(data_dir);
    }
    let matrix = DataMatrix::open(settings).context("Failed to open data matrix")?;

    match cli.command {
        Command::Import { paths } => {
            let files = expand_paths(&paths)?;
            info!(files = files.len(), "importing");
            print_json(&matrix.load_files(&files))?;
        }
        Command::Query { sql } => {
            let rows = matrix.execute_query(&sql).context("Query failed")?;
            print_json(&rows)?;
        }
        Command::Asset { id, columns } => {
            let asset = match columns {
                Some(columns) => matrix.get_asset_columns(&id, &columns),
                None => matrix.get_asset(&id),
            }
            .with_context(|| format!("Failed to get asset {id}"))?;
            print_json(&asset)?;
        }
        Command::Metadata { id } => {
            let metadata = matrix
                .get_asset_column_metadata(&id)
                .with_context(|| format!("Failed to get metadata for {id}"))?;
            print_json(&metadata)?;
        }
        Command::Columns => print_json(&matrix.get_columns())?,
        Command::Stats => print_json(&matrix.stats())?,
    }

    Ok(())
}

/// Files are kept as given; directories contribute their direct data files.
fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))? {
            let entry = entry?;
            let candidate = entry.path();
            if candidate.is_file() && is_data_file(&candidate) {
                found.push(candidate);
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
