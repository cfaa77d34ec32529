// 🗂️ Character-trie layout
//
// An entity lives at a path derived only from its case-folded identifier:
// one directory per character, then `<stem>.json` (document) and
// `<stem>.metadata.json` (provenance) side by side in the leaf directory.
//
//   AAPL -> <root>/a/a/p/l/aapl.json
//           <root>/a/a/p/l/aapl.metadata.json

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MatrixError, Result};

pub const DOCUMENT_SUFFIX: &str = ".json";
pub const PROVENANCE_SUFFIX: &str = ".metadata.json";
pub const TEMP_SUFFIX: &str = ".tmp";

/// Where one entity's files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLocation {
    pub dir: PathBuf,
    pub document: PathBuf,
    pub provenance: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TrieLayout {
    root: PathBuf,
    max_depth: Option<usize>,
}

impl TrieLayout {
    pub fn new(root: impl Into<PathBuf>, max_depth: Option<usize>) -> Self {
        TrieLayout {
            root: root.into(),
            max_depth,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the location of `id` without touching the filesystem.
    pub fn locate(&self, id: &str) -> EntityLocation {
        let folded = normalize_id(id);

        let mut dir = self.root.clone();
        let depth = self.max_depth.unwrap_or(usize::MAX);
        let mut buf = [0u8; 4];
        for c in folded.chars().take(depth) {
            dir.push(escape_component(c.encode_utf8(&mut buf)));
        }

        let stem = escape_component(&folded);
        EntityLocation {
            document: dir.join(format!("{stem}{DOCUMENT_SUFFIX}")),
            provenance: dir.join(format!("{stem}{PROVENANCE_SUFFIX}")),
            dir,
        }
    }

    /// Compute the location of `id`, creating missing directories.
    pub fn resolve(&self, id: &str) -> Result<EntityLocation> {
        let location = self.locate(id);
        fs::create_dir_all(&location.dir).map_err(|e| MatrixError::io(&location.dir, e))?;
        Ok(location)
    }
}

/// Case-fold an identifier; ids differing only in case name one entity.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Bytes that pass through unescaped: `[a-z0-9_-]`. Folded ids carry no
/// ASCII uppercase, so the alphanumeric set is the lowercase one in practice.
const PATH_UNSAFE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-');

/// Make a path-safe component; every byte outside the safe set becomes `%XX`.
fn escape_component(text: &str) -> String {
    utf8_percent_encode(text, PATH_UNSAFE).to_string()
}

/// Recover the folded identifier from a document or provenance file name.
pub fn id_from_file_name(path: &Path) -> Option<String> {
    let name = file_name(path);
    let stem = name
        .strip_suffix(PROVENANCE_SUFFIX)
        .or_else(|| name.strip_suffix(DOCUMENT_SUFFIX))?;

    percent_decode_str(stem)
        .decode_utf8()
        .ok()
        .map(|id| id.into_owned())
}

pub fn is_document_file(path: &Path) -> bool {
    let name = file_name(path);
    name.ends_with(DOCUMENT_SUFFIX) && !name.ends_with(PROVENANCE_SUFFIX)
}

pub fn is_provenance_file(path: &Path) -> bool {
    file_name(path).ends_with(PROVENANCE_SUFFIX)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
