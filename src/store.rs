// 🗄️ Entity Store - versioned per-entity documents with column provenance
//
// One JSON document plus one provenance file per entity, laid out as a
// character trie (see `layout`). Every mutation of an entity runs inside
// that entity's lock shard: load, compare-and-decide and save are one
// critical section, so concurrent ingestion workers never lose updates.

use ignore::WalkBuilder;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{MatrixError, Result};
use crate::layout::{self, EntityLocation, TrieLayout, TEMP_SUFFIX};
use crate::temporal::{ColumnProvenance, EffectiveDate, ProvenanceRecord};

/// Flat column -> value mapping of one entity
pub type Document = BTreeMap<String, String>;

/// Source reference recorded for columns written through [`EntityStore::put`]
pub const DIRECT_PUT_SOURCE: &str = "direct_put";

const LOCK_SHARDS: usize = 64;

// ============================================================================
// TYPES
// ============================================================================

/// One incoming column value with the provenance it would carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub value: String,
    pub effective_date: EffectiveDate,
    pub source_file: String,
}

impl ColumnUpdate {
    pub fn new(
        value: impl Into<String>,
        effective_date: EffectiveDate,
        source_file: impl Into<String>,
    ) -> Self {
        ColumnUpdate {
            value: value.into(),
            effective_date,
            source_file: source_file.into(),
        }
    }
}

/// Aggregate store statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub entity_count: usize,
    pub column_count: usize,
    pub storage_location: String,
}

// ============================================================================
// LOCK TABLE
// ============================================================================

/// Fixed table of mutexes keyed by a hash of the folded entity id.
///
/// Unrelated ids may share a shard; that only costs some contention.
struct LockTable {
    shards: Vec<Mutex<()>>,
}

impl LockTable {
    fn new(shards: usize) -> Self {
        LockTable {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock(&self, folded_id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        folded_id.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % self.shards.len();
        self.shards[shard].lock()
    }
}

// ============================================================================
// ENTITY STORE
// ============================================================================

pub struct EntityStore {
    layout: TrieLayout,
    id_column: String,
    locks: LockTable,
    /// Column catalog cache; rebuildable from provenance files alone
    catalog: RwLock<BTreeSet<String>>,
    /// Folded ids that have a document on disk
    entities: RwLock<HashSet<String>>,
}

impl EntityStore {
    /// Open (or create) a store rooted at `root` and rebuild its caches.
    pub fn open(
        root: impl Into<PathBuf>,
        id_column: impl Into<String>,
        trie_depth: Option<usize>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| MatrixError::io(&root, e))?;

        let store = EntityStore {
            layout: TrieLayout::new(root, trie_depth),
            id_column: id_column.into(),
            locks: LockTable::new(LOCK_SHARDS),
            catalog: RwLock::new(BTreeSet::new()),
            entities: RwLock::new(HashSet::new()),
        };
        store.rebuild_catalog()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &TrieLayout {
        &self.layout
    }

    /// Resolve the on-disk location of `id`, creating its directories.
    pub fn resolve(&self, id: &str) -> Result<EntityLocation> {
        self.layout.resolve(id)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Fetch one entity document.
    ///
    /// A document that cannot be read or parsed is logged and reported as
    /// not found.
    pub fn get(&self, id: &str) -> Result<Document> {
        let location = self.layout.locate(id);
        read_lenient::<Document>(&location.document)
            .ok_or_else(|| MatrixError::NotFound(id.to_string()))
    }

    /// Fetch one entity document restricted to `columns` (`*` means all).
    ///
    /// Column names are matched case-insensitively; output keys keep the
    /// document's casing. Requested columns the document lacks are left out.
    pub fn get_with_columns(&self, id: &str, columns: &[String]) -> Result<Document> {
        let document = self.get(id)?;
        if columns.len() == 1 && columns[0] == "*" {
            return Ok(document);
        }

        let resolver = ColumnResolver::from_catalog(self.list_columns());
        Ok(resolver.select(&document, columns))
    }

    /// Effective date and source of the value currently held in `column`.
    pub fn get_provenance(&self, id: &str, column: &str) -> Option<ColumnProvenance> {
        let location = self.layout.locate(id);
        let record = read_lenient::<ProvenanceRecord>(&location.provenance)?;
        record.get(column).map(|c| ColumnProvenance {
            effective_date: c.effective_date.clone(),
            source_file: c.source_file.clone(),
        })
    }

    /// Provenance of every column of an existing entity.
    pub fn column_metadata(&self, id: &str) -> Result<BTreeMap<String, ColumnProvenance>> {
        let location = self.layout.locate(id);
        if !location.document.is_file() {
            return Err(MatrixError::NotFound(id.to_string()));
        }
        Ok(read_lenient::<ProvenanceRecord>(&location.provenance)
            .map(|record| record.to_map())
            .unwrap_or_default())
    }

    /// Every column name observed across the store, in sorted order.
    pub fn list_columns(&self) -> Vec<String> {
        self.catalog.read().iter().cloned().collect()
    }

    /// Lazily walk every document in the store.
    ///
    /// Each yielded document is a snapshot of that one entity; documents
    /// that fail to load are logged and skipped. Call again to restart.
    pub fn scan_all(&self) -> EntityScan {
        EntityScan {
            files: FileWalk::new(self.layout.root()),
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entity_count: self.entities.read().len(),
            column_count: self.catalog.read().len(),
            storage_location: self.layout.root().display().to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Persist `document` as the full content of entity `id`.
    ///
    /// The identifier column is always set. Existing provenance is kept for
    /// columns that survive; new columns are stamped with today's date.
    pub fn put(&self, id: &str, document: &Document) -> Result<()> {
        let folded = layout::normalize_id(id);
        let _guard = self.locks.lock(&folded);

        let location = self.layout.resolve(id)?;
        let mut document = document.clone();
        document.insert(self.id_column.clone(), id.to_string());

        let mut record = read_lenient::<ProvenanceRecord>(&location.provenance)
            .unwrap_or_else(|| ProvenanceRecord::new(id));
        record.retain_columns(|column| document.contains_key(column));

        let today = EffectiveDate::today();
        for column in document.keys() {
            if record.get(column).is_none() {
                record.offer(column, &today, DIRECT_PUT_SOURCE);
            }
        }
        record.touch();

        write_json_atomic(&location.document, &document)?;
        write_json_atomic(&location.provenance, &record)?;

        self.note_entity(folded, document.keys());
        Ok(())
    }

    /// Merge column updates into entity `id` under the monotonic rule.
    ///
    /// Returns true if any column changed (and the entity was persisted).
    pub fn merge(&self, id: &str, updates: &BTreeMap<String, ColumnUpdate>) -> Result<bool> {
        if updates.is_empty() {
            return Ok(false);
        }

        let folded = layout::normalize_id(id);
        let _guard = self.locks.lock(&folded);

        let location = self.layout.resolve(id)?;
        let (mut document, mut record) = self.load_for_merge(id, &location);

        let mut changed = false;
        for (column, update) in updates {
            if record.offer(column, &update.effective_date, &update.source_file) {
                document.insert(column.clone(), update.value.clone());
                changed = true;
            }
        }

        if !changed {
            return Ok(false);
        }

        if !document.contains_key(&self.id_column) {
            let newest = updates
                .values()
                .max_by(|a, b| a.effective_date.cmp(&b.effective_date))
                .map(|u| (u.effective_date.clone(), u.source_file.clone()));
            if let Some((date, source)) = newest {
                record.offer(&self.id_column, &date, &source);
            }
            document.insert(self.id_column.clone(), id.to_string());
        }
        record.touch();

        // Document first: a crash between the two writes leaves a value newer
        // than its record, which a re-ingest of the same file repairs.
        write_json_atomic(&location.document, &document)?;
        write_json_atomic(&location.provenance, &record)?;

        self.note_entity(folded, document.keys());
        Ok(true)
    }

    /// Load the current state of an entity for a merge.
    ///
    /// A corrupt document or provenance file makes the whole entity absent:
    /// records are never kept for values that can no longer be read, and
    /// values are never kept without a record.
    fn load_for_merge(&self, id: &str, location: &EntityLocation) -> (Document, ProvenanceRecord) {
        let record = match read_json::<ProvenanceRecord>(&location.provenance) {
            Ok(record) => record,
            Err(e) => {
                warn!(id, error = %e, "discarding unreadable provenance, rebuilding entity");
                return (Document::new(), ProvenanceRecord::new(id));
            }
        };

        let document = match read_json::<Document>(&location.document) {
            Ok(document) => document,
            Err(e) => {
                warn!(id, error = %e, "discarding unreadable document, rebuilding entity");
                return (Document::new(), ProvenanceRecord::new(id));
            }
        };

        (
            document.unwrap_or_default(),
            record.unwrap_or_else(|| ProvenanceRecord::new(id)),
        )
    }

    /// Apply the merge rule to provenance entries only; the document is
    /// left untouched. Legacy index conversion goes through here.
    pub(crate) fn merge_provenance(
        &self,
        id: &str,
        entries: &[(String, EffectiveDate, String)],
    ) -> Result<bool> {
        let folded = layout::normalize_id(id);
        let _guard = self.locks.lock(&folded);

        let location = self.layout.resolve(id)?;
        let mut record = read_lenient::<ProvenanceRecord>(&location.provenance)
            .unwrap_or_else(|| ProvenanceRecord::new(id));

        let mut changed = false;
        for (column, date, source) in entries {
            changed |= record.offer(column, date, source);
        }
        if changed {
            record.touch();
            write_json_atomic(&location.provenance, &record)?;
            let mut catalog = self.catalog.write();
            for (column, _, _) in entries {
                if !catalog.contains(column) {
                    catalog.insert(column.clone());
                }
            }
        }
        Ok(changed)
    }

    fn note_entity<'a>(&self, folded: String, columns: impl Iterator<Item = &'a String>) {
        let unknown: Vec<&String> = {
            let catalog = self.catalog.read();
            columns.filter(|c| !catalog.contains(*c)).collect()
        };
        if !unknown.is_empty() {
            let mut catalog = self.catalog.write();
            for column in unknown {
                catalog.insert(column.clone());
            }
        }

        if !self.entities.read().contains(&folded) {
            self.entities.write().insert(folded);
        }
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    /// Rebuild the column catalog and entity set from the files on disk.
    pub fn rebuild_catalog(&self) -> Result<()> {
        let mut columns = BTreeSet::new();
        let mut entities = HashSet::new();
        let mut provenance_files = 0usize;

        for path in FileWalk::new(self.layout.root()) {
            if layout::is_provenance_file(&path) {
                provenance_files += 1;
                if let Some(record) = read_lenient::<ProvenanceRecord>(&path) {
                    columns.extend(record.columns.into_iter().map(|c| c.column_name));
                }
            } else if layout::is_document_file(&path) {
                if let Some(id) = layout::id_from_file_name(&path) {
                    entities.insert(id);
                }
            }
        }

        info!(
            root = %self.layout.root().display(),
            entities = entities.len(),
            columns = columns.len(),
            provenance_files,
            "rebuilt column catalog"
        );

        // Keep anything merged concurrently while we were walking.
        self.catalog.write().extend(columns);
        self.entities.write().extend(entities);
        Ok(())
    }
}

// ============================================================================
// COLUMN RESOLUTION
// ============================================================================

/// Case-insensitive column lookup built from the catalog.
///
/// Maps each lowercase name to every canonical casing seen in the store.
/// Lookups try the exact key first, then each canonical casing.
#[derive(Debug, Default)]
pub struct ColumnResolver {
    canonical: HashMap<String, Vec<String>>,
}

impl ColumnResolver {
    pub fn from_catalog<I>(columns: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut canonical: HashMap<String, Vec<String>> = HashMap::new();
        for column in columns {
            canonical.entry(column.to_lowercase()).or_default().push(column);
        }
        ColumnResolver { canonical }
    }

    /// Find `requested` in `document`, returning the document's own key.
    pub fn resolve<'d>(&self, document: &'d Document, requested: &str) -> Option<(&'d String, &'d String)> {
        if let Some(found) = document.get_key_value(requested) {
            return Some(found);
        }
        self.canonical
            .get(&requested.to_lowercase())?
            .iter()
            .find_map(|name| document.get_key_value(name.as_str()))
    }

    /// The requested columns the document has, under the document's casing
    pub fn select(&self, document: &Document, columns: &[String]) -> Document {
        columns
            .iter()
            .filter_map(|requested| self.resolve(document, requested))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

// ============================================================================
// SCANNING
// ============================================================================

/// Every regular file below a root. No ignore-file or hidden-file filtering:
/// the store owns its whole tree.
struct FileWalk {
    walk: ignore::Walk,
}

impl FileWalk {
    fn new(root: &Path) -> Self {
        FileWalk {
            walk: WalkBuilder::new(root).standard_filters(false).build(),
        }
    }
}

impl Iterator for FileWalk {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        for result in self.walk.by_ref() {
            match result {
                Ok(entry) if entry.file_type().is_some_and(|t| t.is_file()) => {
                    return Some(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping unreadable store entry"),
            }
        }
        None
    }
}

/// Lazy sequence of entity documents, see [`EntityStore::scan_all`]
pub struct EntityScan {
    files: FileWalk,
}

impl Iterator for EntityScan {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        for path in self.files.by_ref() {
            if !layout::is_document_file(&path) {
                continue;
            }
            if let Some(document) = read_lenient::<Document>(&path) {
                return Some(document);
            }
        }
        None
    }
}

// ============================================================================
// FILE HELPERS
// ============================================================================

/// Read and parse a JSON file; `Ok(None)` if it does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MatrixError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| MatrixError::decode(path.display().to_string(), e))
}

/// Like [`read_json`], but failures are logged and reported as absent.
fn read_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    match read_json(path) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "treating unreadable file as absent");
            None
        }
    }
}

/// Write JSON to a temp file beside `path`, then rename it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| MatrixError::decode(path.display().to_string(), e))?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(format!(".{}{}", uuid::Uuid::new_v4().simple(), TEMP_SUFFIX));
    let temp = PathBuf::from(temp);

    let result = fs::File::create(&temp)
        .and_then(|mut file| {
            file.write_all(&data)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&temp, path));

    if let Err(e) = result {
        let _ = fs::remove_file(&temp);
        return Err(MatrixError::io(path, e));
    }
    debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
