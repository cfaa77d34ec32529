// 📥 Ingestion Pipeline - tabular extracts -> entity merges
//
// Each file is decoded row by row; every row becomes one `EntityStore::merge`
// carrying the file's effective date. Files are spread over a bounded pool
// of worker threads. A bad row or a bad file is logged and skipped; it never
// stops the rest of the batch.

use flate2::read::MultiGzDecoder;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::{MatrixError, Result};
use crate::filter::IdFilter;
use crate::store::{ColumnUpdate, EntityStore};
use crate::temporal::EffectiveDate;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const SNIFF_BYTES: usize = 512;

// ============================================================================
// REPORTS
// ============================================================================

/// Row counters for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub effective_date: EffectiveDate,
    pub rows_read: usize,
    pub rows_updated: usize,
    pub rows_skipped: usize,
    /// The file had no identifier column and was skipped as a whole
    pub missing_id_column: bool,
}

impl FileReport {
    fn new(path: &Path, effective_date: EffectiveDate) -> Self {
        FileReport {
            path: path.to_path_buf(),
            effective_date,
            rows_read: 0,
            rows_updated: 0,
            rows_skipped: 0,
            missing_id_column: false,
        }
    }
}

/// A file that could not be processed at all
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one `load_files` batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub failed: Vec<FailedFile>,
    /// Store-wide counts after the batch, read back from the store
    pub entity_count: usize,
    pub column_count: usize,
}

impl BatchReport {
    pub fn rows_read(&self) -> usize {
        self.files.iter().map(|f| f.rows_read).sum()
    }

    pub fn rows_updated(&self) -> usize {
        self.files.iter().map(|f| f.rows_updated).sum()
    }

    pub fn rows_skipped(&self) -> usize {
        self.files.iter().map(|f| f.rows_skipped).sum()
    }
}

// ============================================================================
// INGESTOR
// ============================================================================

pub struct Ingestor {
    store: Arc<EntityStore>,
    id_column: String,
    filter: IdFilter,
    max_workers: usize,
}

impl Ingestor {
    pub fn new(
        store: Arc<EntityStore>,
        id_column: impl Into<String>,
        filter: IdFilter,
        max_workers: usize,
    ) -> Self {
        Ingestor {
            store,
            id_column: id_column.into(),
            filter,
            max_workers: max_workers.max(1),
        }
    }

    pub fn from_settings(store: Arc<EntityStore>, settings: &Settings) -> Self {
        let filter = IdFilter::new(&settings.id_prefix_filter);
        if !filter.is_empty() {
            info!(patterns = ?settings.id_prefix_filter, "identifier filter active");
        }
        Self::new(store, settings.id_column.clone(), filter, settings.max_workers)
    }

    /// Decode one extract and merge every row into the store.
    ///
    /// Returns an error only when the file cannot be opened or its header
    /// cannot be decoded. A file without the identifier column is not an
    /// error: the report comes back with `missing_id_column` set.
    pub fn load_file(&self, path: &Path) -> Result<FileReport> {
        let started = Instant::now();
        let effective_date = EffectiveDate::from_file_name(path);
        let source = path.display().to_string();
        let mut report = FileReport::new(path, effective_date.clone());

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(open_reader(path)?);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| MatrixError::decode(format!("header of {source}"), e))?
            .iter()
            .enumerate()
            .map(|(i, h)| if i == 0 { h.trim_start_matches('\u{feff}') } else { h })
            .map(str::to_string)
            .collect();

        let Some(id_index) = header.iter().position(|h| *h == self.id_column) else {
            warn!(file = %source, id_column = %self.id_column, "skipping file without identifier column");
            report.missing_id_column = true;
            return Ok(report);
        };

        for (n, result) in reader.records().enumerate() {
            report.rows_read += 1;

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    // +2: 1-indexed, plus the header row
                    warn!(file = %source, line = n + 2, error = %e, "skipping undecodable row");
                    report.rows_skipped += 1;
                    continue;
                }
            };

            let id = record.get(id_index).unwrap_or_default().trim();
            if id.is_empty() || !self.filter.allows(id) {
                report.rows_skipped += 1;
                continue;
            }

            let mut updates = row_updates(&header, &record, &effective_date, &source);
            if let Some(update) = updates.get_mut(&self.id_column) {
                update.value = id.to_string();
            }
            match self.store.merge(id, &updates) {
                Ok(true) => report.rows_updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(file = %source, id, error = %e, "merge failed, skipping row");
                    report.rows_skipped += 1;
                }
            }
        }

        info!(
            file = %source,
            effective_date = %effective_date,
            rows_read = report.rows_read,
            rows_updated = report.rows_updated,
            rows_skipped = report.rows_skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded file"
        );
        Ok(report)
    }

    /// Load a batch of files in parallel and wait for all of them.
    pub fn load_files(&self, paths: &[PathBuf]) -> BatchReport {
        let mut batch = BatchReport::default();
        if paths.is_empty() {
            info!("no files to load");
            return batch;
        }

        let workers = worker_count(self.max_workers, paths.len());
        info!(files = paths.len(), workers, "starting ingestion batch");

        let load = |path: &PathBuf| (path.clone(), self.load_file(path));
        let outcomes: Vec<(PathBuf, Result<FileReport>)> = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ingest-{i}"))
            .build()
        {
            Ok(pool) => pool.install(|| paths.par_iter().map(load).collect()),
            Err(e) => {
                warn!(error = %e, "could not start worker pool, loading sequentially");
                paths.iter().map(load).collect()
            }
        };

        for (path, outcome) in outcomes {
            match outcome {
                Ok(report) => batch.files.push(report),
                Err(e) => {
                    error!(file = %path.display(), error = %e, "failed to load file");
                    batch.failed.push(FailedFile {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        // The store is the source of truth for what the batch produced.
        if let Err(e) = self.store.rebuild_catalog() {
            warn!(error = %e, "could not rebuild column catalog after batch");
        }
        let stats = self.store.stats();
        batch.entity_count = stats.entity_count;
        batch.column_count = stats.column_count;

        info!(
            files = batch.files.len(),
            failed = batch.failed.len(),
            rows_read = batch.rows_read(),
            rows_updated = batch.rows_updated(),
            entities = batch.entity_count,
            columns = batch.column_count,
            "ingestion batch complete"
        );
        batch
    }
}

/// Column -> update map for one row, leaving out missing-value sentinels
fn row_updates(
    header: &[String],
    record: &csv::StringRecord,
    effective_date: &EffectiveDate,
    source: &str,
) -> BTreeMap<String, ColumnUpdate> {
    header
        .iter()
        .zip(record.iter())
        .filter(|(_, value)| !is_missing(value))
        .map(|(column, value)| {
            (
                column.clone(),
                ColumnUpdate::new(value, effective_date.clone(), source),
            )
        })
        .collect()
}

/// Empty, `null` in any case, and `N.A.` mean "no value"
pub fn is_missing(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null") || value == "N.A."
}

fn worker_count(cap: usize, files: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cap.min(cores).min(files).max(1)
}

// ============================================================================
// FILE DECODING
// ============================================================================

/// Open a file for reading, decompressing gzip transparently.
///
/// Gzip is detected by a `.gz` extension or by the gzip magic bytes.
pub fn open_reader(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).map_err(|e| MatrixError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let has_gz_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"));
    let has_magic = reader
        .fill_buf()
        .map_err(|e| MatrixError::io(path, e))?
        .starts_with(&GZIP_MAGIC);

    if has_gz_extension || has_magic {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Whether `path` looks like an extract worth handing to the pipeline:
/// a `.csv`/`.gz` file, or anything whose first bytes are gzip or text.
pub fn is_data_file(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    if lower.ends_with(".csv") || lower.ends_with(".gz") {
        return true;
    }

    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut buf = [0u8; SNIFF_BYTES];
    let Ok(n) = file.read(&mut buf) else {
        return false;
    };
    let head = &buf[..n];

    head.starts_with(&GZIP_MAGIC)
        || head
            .iter()
            .all(|&b| b >= 32 || b == b'\t' || b == b'\n' || b == b'\r')
}

// ============================================================================
// TESTS
// ============================================================================
