// 🔁 Legacy index migration
//
// The earlier schema kept every column's effective date in one
// `asset_index.json` file. The current layout keeps them per entity.
// The conversion runs on every startup: it does nothing once the old file
// has been renamed to `asset_index.json.migrated`, and converting the same
// entries twice leaves the store unchanged (ties never replace).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{MatrixError, Result};
use crate::store::EntityStore;
use crate::temporal::{ColumnIndex, EffectiveDate};

const MIGRATED_SUFFIX: &str = ".migrated";

#[derive(Debug, Deserialize)]
struct LegacyIndex {
    #[serde(default)]
    entries: Vec<ColumnIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy index exists
    NotPresent,
    /// The legacy index was already converted on an earlier run
    AlreadyMigrated,
    Migrated {
        entries: usize,
        entities: usize,
        failed: usize,
    },
}

pub fn migrated_marker(index_path: &Path) -> PathBuf {
    let mut marker = OsString::from(index_path.as_os_str());
    marker.push(MIGRATED_SUFFIX);
    PathBuf::from(marker)
}

/// Convert a legacy single-file index into per-entity provenance files.
pub fn migrate_legacy_index(store: &EntityStore, index_path: &Path) -> Result<MigrationOutcome> {
    let marker = migrated_marker(index_path);

    if !index_path.exists() {
        if marker.exists() {
            return Ok(MigrationOutcome::AlreadyMigrated);
        }
        return Ok(MigrationOutcome::NotPresent);
    }

    let data = fs::read(index_path).map_err(|e| MatrixError::io(index_path, e))?;
    let index: LegacyIndex = serde_json::from_slice(&data)
        .map_err(|e| MatrixError::decode(index_path.display().to_string(), e))?;

    info!(path = %index_path.display(), entries = index.entries.len(), "migrating legacy index");

    let entries = index.entries.len();
    let mut by_entity: BTreeMap<String, Vec<(String, EffectiveDate, String)>> = BTreeMap::new();
    for entry in index.entries {
        by_entity
            .entry(entry.id)
            .or_default()
            .push((entry.column_name, entry.effective_date, entry.source_file));
    }

    let entities = by_entity.len();
    let mut failed = 0;
    for (id, columns) in &by_entity {
        if let Err(e) = store.merge_provenance(id, columns) {
            warn!(id = %id, error = %e, "failed to migrate legacy entries");
            failed += 1;
        }
    }

    if failed == 0 {
        fs::rename(index_path, &marker).map_err(|e| MatrixError::io(index_path, e))?;
    } else {
        // Leave the index in place so the next startup retries.
        warn!(failed, "legacy index kept for retry");
    }

    info!(entries, entities, failed, "legacy index migration complete");
    Ok(MigrationOutcome::Migrated {
        entries,
        entities,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_index(path: &Path) {
        let json = serde_json::json!({
            "entries": [
                {"id": "AAPL", "column_name": "Revenue", "effective_date": "20240101", "source_file": "a.csv"},
                {"id": "AAPL", "column_name": "Company", "effective_date": "20231201", "source_file": "b.csv"},
                {"id": "MSFT", "column_name": "Revenue", "effective_date": "20240101", "source_file": "a.csv"}
            ]
        });
        fs::write(path, serde_json::to_vec(&json).unwrap()).unwrap();
    }

    #[test]
    fn test_migrates_once_and_marks_file() {
        let tmp = tempdir().unwrap();
        let store = EntityStore::open(tmp.path().join("json"), "ID_BB_GLOBAL", None).unwrap();
        let index = tmp.path().join("asset_index.json");
        write_index(&index);

        let outcome = migrate_legacy_index(&store, &index).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                entries: 3,
                entities: 2,
                failed: 0
            }
        );
        assert!(!index.exists());
        assert!(migrated_marker(&index).exists());

        let prov = store.get_provenance("AAPL", "Revenue").unwrap();
        assert_eq!(prov.effective_date.as_str(), "20240101");
        assert_eq!(prov.source_file, "a.csv");
        assert!(store.list_columns().contains(&"Company".to_string()));

        // Second run is a no-op
        assert_eq!(
            migrate_legacy_index(&store, &index).unwrap(),
            MigrationOutcome::AlreadyMigrated
        );
    }

    #[test]
    fn test_rerun_on_same_entries_changes_nothing() {
        let tmp = tempdir().unwrap();
        let store = EntityStore::open(tmp.path().join("json"), "ID_BB_GLOBAL", None).unwrap();
        let index = tmp.path().join("asset_index.json");

        write_index(&index);
        migrate_legacy_index(&store, &index).unwrap();
        let provenance = store.layout().locate("AAPL").provenance;
        let before = fs::read(&provenance).unwrap();

        // Same file shows up again (e.g. restored from backup)
        write_index(&index);
        migrate_legacy_index(&store, &index).unwrap();
        assert_eq!(fs::read(&provenance).unwrap(), before, "record was not rewritten");
    }

    #[test]
    fn test_migrated_dates_gate_later_merges() {
        use crate::store::ColumnUpdate;

        let tmp = tempdir().unwrap();
        let store = EntityStore::open(tmp.path().join("json"), "ID_BB_GLOBAL", None).unwrap();
        let index = tmp.path().join("asset_index.json");
        write_index(&index);
        migrate_legacy_index(&store, &index).unwrap();

        let mut older = BTreeMap::new();
        older.insert(
            "Revenue".to_string(),
            ColumnUpdate::new("1", EffectiveDate::parse("20231231").unwrap(), "old.csv"),
        );
        older.insert(
            "Sector".to_string(),
            ColumnUpdate::new("Tech", EffectiveDate::parse("20231231").unwrap(), "old.csv"),
        );
        assert!(store.merge("AAPL", &older).unwrap());

        let doc = store.get("AAPL").unwrap();
        assert!(doc.get("Revenue").is_none(), "older than migrated date");
        assert_eq!(doc["Sector"], "Tech");
        assert_eq!(doc["ID_BB_GLOBAL"], "AAPL");
    }

    #[test]
    fn test_no_index_present() {
        let tmp = tempdir().unwrap();
        let store = EntityStore::open(tmp.path().join("json"), "ID_BB_GLOBAL", None).unwrap();
        let outcome = migrate_legacy_index(&store, &tmp.path().join("asset_index.json")).unwrap();
        assert_eq!(outcome, MigrationOutcome::NotPresent);
    }
}
