// ⚙️ Query executor - full scan over the entity store
//
// Column names in a query are resolved against the column catalog, not
// against the query text: a lookup table from lowercase name to every
// canonical casing is built once per execution, then each document is
// matched exactly first and by canonical casing second.

use std::time::Instant;
use tracing::{debug, info};

use crate::error::{MatrixError, Result};
use crate::sql::{self, Projection, Query};
use crate::store::{ColumnResolver, Document, EntityStore};

pub struct QueryEngine<'a> {
    store: &'a EntityStore,
    table_name: &'a str,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a EntityStore, table_name: &'a str) -> Self {
        QueryEngine { store, table_name }
    }

    /// Parse and run query text.
    pub fn execute_text(&self, text: &str) -> Result<Vec<Document>> {
        let query = sql::parse(text)?;
        self.execute(&query)
    }

    /// Run a parsed query. Output order is scan order.
    pub fn execute(&self, query: &Query) -> Result<Vec<Document>> {
        if !query.table.eq_ignore_ascii_case(self.table_name) {
            return Err(MatrixError::UnknownTable(query.table.clone()));
        }

        let started = Instant::now();
        let resolver = ColumnResolver::from_catalog(self.store.list_columns());
        debug!(?query, "executing query");

        let mut results = Vec::new();
        let mut scanned = 0usize;
        for document in self.store.scan_all() {
            scanned += 1;

            if let Some(predicate) = &query.predicate {
                match resolver.resolve(&document, &predicate.column) {
                    Some((_, value)) if predicate.matches(value) => {}
                    _ => continue,
                }
            }

            results.push(project(&resolver, document, &query.projection));
        }

        info!(
            scanned,
            matched = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query complete"
        );
        Ok(results)
    }
}

fn project(resolver: &ColumnResolver, document: Document, projection: &Projection) -> Document {
    match projection {
        Projection::All => document,
        Projection::Columns(columns) => resolver.select(&document, columns),
    }
}
