// ⏰ Temporal Model - effective dates and column provenance
//
// Every stored column value carries the as-of date of the extract it came
// from and a reference to that extract. The merge rule is decided here:
// a value replaces the current one only when its effective date is
// strictly newer; the first value seen for a column always wins.

use chrono::{DateTime, Local, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

const DATE_FORMAT: &str = "%Y%m%d";

// ============================================================================
// EFFECTIVE DATE
// ============================================================================

/// EffectiveDate - an 8-digit `YYYYMMDD` calendar-date token
///
/// Ordering is the ordering of the token text, which for fixed-width
/// `YYYYMMDD` is also chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectiveDate(String);

impl EffectiveDate {
    /// Parse a token, accepting it only if it names a real calendar date
    pub fn parse(token: &str) -> Option<Self> {
        if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveDate::parse_from_str(token, DATE_FORMAT)
            .ok()
            .map(|_| EffectiveDate(token.to_string()))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        EffectiveDate(date.format(DATE_FORMAT).to_string())
    }

    /// Today's date in local time
    pub fn today() -> Self {
        Self::from_date(Local::now().date_naive())
    }

    /// Derive the effective date of an extract from its file name.
    ///
    /// Looks at the first run of 8 digits in the file name; falls back to
    /// today when there is none or it is not a real date.
    pub fn from_file_name(path: &Path) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        date_token_regex()
            .find(name)
            .and_then(|m| Self::parse(m.as_str()))
            .unwrap_or_else(Self::today)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectiveDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn date_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8}").expect("static date pattern is valid"))
}

// ============================================================================
// COLUMN PROVENANCE
// ============================================================================

/// Why a column currently holds its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProvenance {
    pub effective_date: EffectiveDate,
    pub source_file: String,
}

/// Decide whether an incoming value dated `incoming` replaces the current one.
///
/// First-seen values are always accepted; ties never replace.
pub fn supersedes(current: Option<&EffectiveDate>, incoming: &EffectiveDate) -> bool {
    match current {
        None => true,
        Some(current) => incoming > current,
    }
}

// ============================================================================
// PERSISTED PROVENANCE RECORD
// ============================================================================

/// One entry of the persisted provenance file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnIndex {
    pub id: String,
    pub column_name: String,
    pub effective_date: EffectiveDate,
    pub source_file: String,
}

/// ProvenanceRecord - the sibling `.metadata.json` file of an entity
///
/// Holds one [`ColumnIndex`] per column present in the entity document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: String,
    #[serde(default)]
    pub columns: Vec<ColumnIndex>,
    pub updated_at: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        ProvenanceRecord {
            id: id.into(),
            columns: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnIndex> {
        self.columns.iter().find(|c| c.column_name == column)
    }

    /// Apply the merge rule for one column. Returns true if the record changed.
    pub fn offer(&mut self, column: &str, date: &EffectiveDate, source_file: &str) -> bool {
        match self.columns.iter_mut().find(|c| c.column_name == column) {
            Some(existing) => {
                if !supersedes(Some(&existing.effective_date), date) {
                    return false;
                }
                existing.effective_date = date.clone();
                existing.source_file = source_file.to_string();
                true
            }
            None => {
                self.columns.push(ColumnIndex {
                    id: self.id.clone(),
                    column_name: column.to_string(),
                    effective_date: date.clone(),
                    source_file: source_file.to_string(),
                });
                true
            }
        }
    }

    /// Drop records for columns no longer present
    pub fn retain_columns<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.columns.retain(|c| keep(&c.column_name));
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Column name -> provenance, for callers that want a lookup view
    pub fn to_map(&self) -> BTreeMap<String, ColumnProvenance> {
        self.columns
            .iter()
            .map(|c| {
                (
                    c.column_name.clone(),
                    ColumnProvenance {
                        effective_date: c.effective_date.clone(),
                        source_file: c.source_file.clone(),
                    },
                )
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn date(token: &str) -> EffectiveDate {
        EffectiveDate::parse(token).unwrap()
    }

    #[test]
    fn test_parse_rejects_invalid_dates() {
        assert!(EffectiveDate::parse("20240101").is_some());
        assert!(EffectiveDate::parse("20240230").is_none());
        assert!(EffectiveDate::parse("2024010").is_none());
        assert!(EffectiveDate::parse("2024-01-01").is_none());
    }

    #[test]
    fn test_from_file_name() {
        let path = PathBuf::from("/data/in/companies_20240101.csv");
        assert_eq!(EffectiveDate::from_file_name(&path).as_str(), "20240101");

        let gz = PathBuf::from("prices_20231231_v2.csv.gz");
        assert_eq!(EffectiveDate::from_file_name(&gz).as_str(), "20231231");
    }

    #[test]
    fn test_from_file_name_falls_back_to_today() {
        let today = EffectiveDate::today();

        let no_date = PathBuf::from("companies.csv");
        assert_eq!(EffectiveDate::from_file_name(&no_date), today);

        let bad_date = PathBuf::from("companies_20241340.csv");
        assert_eq!(EffectiveDate::from_file_name(&bad_date), today);
    }

    #[test]
    fn test_supersedes_is_strict() {
        let d1 = date("20240101");
        let d2 = date("20240102");

        assert!(supersedes(None, &d1));
        assert!(supersedes(Some(&d1), &d2));
        assert!(!supersedes(Some(&d2), &d1));
        assert!(!supersedes(Some(&d1), &d1), "ties never replace");
    }

    #[test]
    fn test_offer_updates_record() {
        let mut record = ProvenanceRecord::new("AAPL");

        assert!(record.offer("Revenue", &date("20240101"), "a.csv"));
        assert!(!record.offer("Revenue", &date("20231231"), "b.csv"));
        assert!(!record.offer("Revenue", &date("20240101"), "c.csv"));
        assert!(record.offer("Revenue", &date("20240201"), "d.csv"));

        let entry = record.get("Revenue").unwrap();
        assert_eq!(entry.effective_date.as_str(), "20240201");
        assert_eq!(entry.source_file, "d.csv");
        assert_eq!(record.columns.len(), 1);
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = ProvenanceRecord::new("AAPL");
        record.offer("Company", &date("20240101"), "companies_20240101.csv");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "AAPL");
        assert_eq!(json["columns"][0]["column_name"], "Company");
        assert_eq!(json["columns"][0]["effective_date"], "20240101");
        assert_eq!(json["columns"][0]["source_file"], "companies_20240101.csv");
        assert!(json["updated_at"].is_string());
    }
}
