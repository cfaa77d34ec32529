// Error taxonomy shared by the store, the ingestion pipeline and the query engine

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Malformed query text. Each variant is a distinct parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("query must start with SELECT")]
    MissingSelect,

    #[error("query must contain a FROM clause")]
    MissingFrom,

    #[error("SELECT list is empty")]
    EmptySelectList,

    #[error("FROM clause does not name a table")]
    MissingTable,

    #[error("query contains multiple WHERE clauses")]
    MultipleWhere,

    #[error("WHERE clause must contain a valid operator (=, >, <, >=, <=, !=)")]
    MissingOperator,

    #[error("WHERE clause does not name a column")]
    MissingPredicateColumn,
}

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decode error in {context}: {message}")]
    Decode { context: String, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MatrixError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        MatrixError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn decode(context: impl Into<String>, message: impl ToString) -> Self {
        MatrixError::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Errors the caller caused (bad query text or wrong collection)
    pub fn is_client_error(&self) -> bool {
        matches!(self, MatrixError::Parse(_) | MatrixError::UnknownTable(_))
    }
}

pub type Result<T> = std::result::Result<T, MatrixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_are_client_errors() {
        let err: MatrixError = ParseError::MultipleWhere.into();
        assert!(err.is_client_error());
        assert!(MatrixError::UnknownTable("OTHER".to_string()).is_client_error());
        assert!(!MatrixError::NotFound("AAPL".to_string()).is_client_error());
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = MatrixError::io(
            "/tmp/missing.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/missing.csv"));
        assert!(message.contains("gone"));
    }
}
