//! Type-safe configuration loaded with the `config` crate.
//!
//! Sources, lowest priority first:
//! - built-in defaults (see [`Settings::default`])
//! - `DataMatrix.toml` in the working directory, if present
//! - `MATRIX__*` environment variables (e.g. `MATRIX__DATA_DIR`)

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::Result;

pub const DEFAULT_ID_COLUMN: &str = "ID_BB_GLOBAL";
pub const DEFAULT_TABLE_NAME: &str = "BB_ASSETS";
pub const DEFAULT_MAX_WORKERS: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root for persisted state; documents live under `<data_dir>/json`
    pub data_dir: PathBuf,

    /// Column that carries the entity identifier in every extract
    pub id_column: String,

    /// The one collection name queries may select from
    pub table_name: String,

    /// Upper bound on parallel ingestion workers
    pub max_workers: usize,

    /// Cap on trie nesting; `None` nests one directory per character
    #[serde(default)]
    pub trie_depth: Option<usize>,

    /// Regex (or plain prefix) patterns an identifier must match to be ingested
    #[serde(default)]
    pub id_prefix_filter: Vec<String>,

    /// HTTP bind address for `matrix-server`
    pub server_bind: String,

    /// Directory the server ingests at startup
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("data"),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            trie_depth: None,
            id_prefix_filter: Vec::new(),
            server_bind: "0.0.0.0:8080".to_string(),
            input_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from `DataMatrix.toml` and `MATRIX__*` overrides.
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .set_default("data_dir", "data")?
            .set_default("id_column", DEFAULT_ID_COLUMN)?
            .set_default("table_name", DEFAULT_TABLE_NAME)?
            .set_default("max_workers", DEFAULT_MAX_WORKERS as i64)?
            .set_default("server_bind", "0.0.0.0:8080")?
            .add_source(File::with_name("DataMatrix").required(false))
            .add_source(
                Environment::with_prefix("MATRIX")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("id_prefix_filter")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Same settings rooted at another data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Directory holding the character-trie of entity files
    pub fn store_root(&self) -> PathBuf {
        self.data_dir.join("json")
    }

    /// Single-file index written by the earlier schema generation
    pub fn legacy_index_path(&self) -> PathBuf {
        self.data_dir.join("asset_index.json")
    }
}
