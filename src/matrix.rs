// 🧮 DataMatrix - the surface collaborators talk to
//
// Wires the store, the ingestion pipeline and the query engine together
// from one `Settings`. Opening runs the legacy index migration first.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::ingest::{BatchReport, FileReport, Ingestor};
use crate::migration::{self, MigrationOutcome};
use crate::query::QueryEngine;
use crate::store::{Document, EntityStore, StoreStats};
use crate::temporal::ColumnProvenance;

pub struct DataMatrix {
    settings: Settings,
    store: Arc<EntityStore>,
    ingestor: Ingestor,
}

impl DataMatrix {
    pub fn open(settings: Settings) -> Result<Self> {
        let store = Arc::new(EntityStore::open(
            settings.store_root(),
            settings.id_column.clone(),
            settings.trie_depth,
        )?);

        // A broken legacy index must not keep the store from opening.
        match migration::migrate_legacy_index(&store, &settings.legacy_index_path()) {
            Ok(MigrationOutcome::Migrated { entities, failed, .. }) => {
                info!(entities, failed, "legacy index converted")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "legacy index migration failed"),
        }

        let ingestor = Ingestor::from_settings(store.clone(), &settings);
        info!(
            root = %store.root().display(),
            table = %settings.table_name,
            id_column = %settings.id_column,
            "data matrix ready"
        );

        Ok(DataMatrix {
            settings,
            store,
            ingestor,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn load_file(&self, path: &Path) -> Result<FileReport> {
        self.ingestor.load_file(path)
    }

    pub fn load_files(&self, paths: &[PathBuf]) -> BatchReport {
        self.ingestor.load_files(paths)
    }

    pub fn get_columns(&self) -> Vec<String> {
        self.store.list_columns()
    }

    pub fn get_asset(&self, id: &str) -> Result<Document> {
        self.store.get(id)
    }

    pub fn get_asset_columns(&self, id: &str, columns: &[String]) -> Result<Document> {
        self.store.get_with_columns(id, columns)
    }

    pub fn get_asset_column_metadata(&self, id: &str) -> Result<BTreeMap<String, ColumnProvenance>> {
        self.store.column_metadata(id)
    }

    pub fn execute_query(&self, text: &str) -> Result<Vec<Document>> {
        QueryEngine::new(&self.store, &self.settings.table_name).execute_text(text)
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn rebuild_catalog(&self) -> Result<()> {
        self.store.rebuild_catalog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MatrixError;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn open_matrix() -> (TempDir, DataMatrix) {
        let tmp = tempdir().unwrap();
        let settings = Settings::default().with_data_dir(tmp.path().join("data"));
        let matrix = DataMatrix::open(settings).unwrap();
        (tmp, matrix)
    }

    fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_scenarios_end_to_end() {
        let (tmp, matrix) = open_matrix();

        // A: first load creates the entity with provenance
        let a = write_csv(
            tmp.path(),
            "companies_20240101.csv",
            "ID_BB_GLOBAL,Company,Revenue\nAAPL,Apple Inc.,365.8\nMSFT,Microsoft,168.1\n",
        );
        let batch = matrix.load_files(&[a.clone()]);
        assert_eq!(batch.rows_updated(), 2);

        let aapl = matrix.get_asset("AAPL").unwrap();
        assert_eq!(aapl["ID_BB_GLOBAL"], "AAPL");
        assert_eq!(aapl["Company"], "Apple Inc.");
        assert_eq!(aapl["Revenue"], "365.8");
        assert_eq!(aapl.len(), 3);

        let metadata = matrix.get_asset_column_metadata("AAPL").unwrap();
        assert_eq!(metadata["Revenue"].effective_date.as_str(), "20240101");
        assert_eq!(metadata["Revenue"].source_file, a.display().to_string());

        // B: an older file does not overwrite
        let b = write_csv(tmp.path(), "companies_20231231.csv", "ID_BB_GLOBAL,Revenue\nAAPL,999\n");
        matrix.load_files(&[b]);
        assert_eq!(matrix.get_asset("AAPL").unwrap()["Revenue"], "365.8");

        // C: lexicographic predicate
        let rows = matrix
            .execute_query("SELECT Company FROM BB_ASSETS WHERE Revenue > 300")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Company"], "Apple Inc.");

        // D: file without the identifier column
        let d = write_csv(tmp.path(), "other_20240102.csv", "Ticker,Company\nGOOG,Alphabet\n");
        let batch = matrix.load_files(&[d]);
        assert!(batch.failed.is_empty());
        assert!(batch.files[0].missing_id_column);
        assert_eq!(batch.rows_read(), 0);
        assert_eq!(batch.entity_count, 2);

        // E: wrong collection
        assert!(matches!(
            matrix.execute_query("SELECT * FROM OTHER_TABLE"),
            Err(MatrixError::UnknownTable(_))
        ));

        assert_eq!(matrix.get_columns(), vec!["Company", "ID_BB_GLOBAL", "Revenue"]);
        let stats = matrix.stats();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.column_count, 3);
    }

    #[test]
    fn test_get_asset_columns() {
        let (tmp, matrix) = open_matrix();
        let path = write_csv(
            tmp.path(),
            "companies_20240101.csv",
            "ID_BB_GLOBAL,Company,Revenue\nAAPL,Apple Inc.,365.8\n",
        );
        matrix.load_file(&path).unwrap();

        let subset = matrix.get_asset_columns("aapl", &["company".to_string()]).unwrap();
        assert_eq!(subset.len(), 1);
        assert_eq!(subset["Company"], "Apple Inc.");
        assert!(matches!(matrix.get_asset("NOPE"), Err(MatrixError::NotFound(_))));
        assert_eq!(matrix.settings().table_name, "BB_ASSETS");
    }

    #[test]
    fn test_open_migrates_legacy_index() {
        let tmp = tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(
            data_dir.join("asset_index.json"),
            r#"{"entries":[{"id":"AAPL","column_name":"Revenue","effective_date":"20250101","source_file":"old.csv"}]}"#,
        )
        .unwrap();

        let matrix = DataMatrix::open(Settings::default().with_data_dir(&data_dir)).unwrap();
        assert!(data_dir.join("asset_index.json.migrated").exists());
        assert!(matrix.get_columns().contains(&"Revenue".to_string()));

        // The migrated date still gates newer loads
        let path = write_csv(tmp.path(), "companies_20240101.csv", "ID_BB_GLOBAL,Revenue\nAAPL,365.8\n");
        matrix.load_file(&path).unwrap();
        assert!(matrix.get_asset("AAPL").unwrap().get("Revenue").is_none());

        // Reopening is a no-op for the migration
        drop(matrix);
        assert!(DataMatrix::open(Settings::default().with_data_dir(&data_dir)).is_ok());
    }

    #[test]
    fn test_broken_legacy_index_does_not_block_open() {
        let tmp = tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(data_dir.join("asset_index.json"), b"{ broken").unwrap();

        assert!(DataMatrix::open(Settings::default().with_data_dir(&data_dir)).is_ok());
        assert!(data_dir.join("asset_index.json").exists());
    }
}
