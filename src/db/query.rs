use std::time::Instant;

use tracing::{debug, warn};

use super::{QueryError, SharedSource};
use crate::config::RowShapePolicy;

/// Column names and text rows exactly as a driver produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A fully materialised result. Row 0 is always the header and every row
/// has the header's cell count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularResult {
    rows: Vec<Vec<String>>,
    pub execution_time_ms: u64,
}

impl TabularResult {
    #[cfg(test)]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a result from a header and body, applying `policy` to rows
    /// whose width differs from the header.
    pub fn from_parts(
        columns: Vec<String>,
        body: Vec<Vec<String>>,
        policy: RowShapePolicy,
    ) -> Result<Self, QueryError> {
        let expected = columns.len();
        let mut rows = Vec::with_capacity(body.len() + 1);
        rows.push(columns);

        let mut dropped = 0;
        for (index, row) in body.into_iter().enumerate() {
            if row.len() == expected {
                rows.push(row);
                continue;
            }
            match policy {
                RowShapePolicy::DropMismatched => dropped += 1,
                RowShapePolicy::Reject => {
                    return Err(QueryError::MalformedRow {
                        row: index + 1,
                        found: row.len(),
                        expected,
                    });
                }
            }
        }

        if dropped > 0 {
            warn!("Dropped {} rows whose width did not match the header", dropped);
        }

        Ok(Self {
            rows,
            execution_time_ms: 0,
        })
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    pub fn column_count(&self) -> usize {
        self.header().map_or(0, <[String]>::len)
    }

    /// Number of rows after the header.
    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }
}

pub struct QueryExecutor {
    source: SharedSource,
    policy: RowShapePolicy,
}

impl QueryExecutor {
    pub fn new(source: SharedSource, policy: RowShapePolicy) -> Self {
        Self { source, policy }
    }

    /// Run `sql` against the shared connection. Either the whole result is
    /// materialised or an error is returned; there is no partial result.
    pub fn execute(&self, sql: &str) -> Result<TabularResult, QueryError> {
        let start_time = Instant::now();

        let raw = self.source.fetch(sql)?;
        let mut result = TabularResult::from_parts(raw.columns, raw.rows, self.policy)?;
        result.execution_time_ms = start_time.elapsed().as_millis() as u64;

        debug!(
            "Query returned {} rows x {} columns in {}ms",
            result.data_row_count(),
            result.column_count(),
            result.execution_time_ms
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DuckDbSource;
    use std::sync::Arc;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn duck_executor(policy: RowShapePolicy) -> QueryExecutor {
        let source = DuckDbSource::open(":memory:").unwrap();
        QueryExecutor::new(Arc::new(source), policy)
    }

    #[test]
    fn test_header_is_row_zero() {
        let result = TabularResult::from_parts(
            strings(&["id", "name"]),
            vec![strings(&["1", "Alice"])],
            RowShapePolicy::DropMismatched,
        )
        .unwrap();

        assert_eq!(result.rows(), &[strings(&["id", "name"]), strings(&["1", "Alice"])]);
        assert_eq!(result.column_count(), 2);
        assert_eq!(result.data_row_count(), 1);
        assert_eq!(result.cell(1, 1), Some("Alice"));
        assert_eq!(result.cell(2, 0), None);
    }

    #[test]
    fn test_lenient_policy_drops_mismatched_rows() {
        let result = TabularResult::from_parts(
            strings(&["a", "b"]),
            vec![strings(&["1", "2"]), strings(&["3"]), strings(&["4", "5", "6"]), strings(&["7", "8"])],
            RowShapePolicy::DropMismatched,
        )
        .unwrap();

        assert_eq!(result.data_row_count(), 2);
        assert!(result.rows().iter().all(|row| row.len() == 2));
    }

    #[test]
    fn test_strict_policy_rejects_mismatched_rows() {
        let result = TabularResult::from_parts(
            strings(&["a", "b"]),
            vec![strings(&["1", "2"]), strings(&["3"])],
            RowShapePolicy::Reject,
        );

        assert_eq!(
            result,
            Err(QueryError::MalformedRow {
                row: 2,
                found: 1,
                expected: 2
            })
        );
    }

    #[test]
    fn test_execute_against_duckdb() {
        let executor = duck_executor(RowShapePolicy::DropMismatched);
        let result = executor
            .execute("SELECT 1 AS id, 'Alice' AS name UNION ALL SELECT 2, NULL ORDER BY id")
            .unwrap();

        assert_eq!(result.header().unwrap(), &strings(&["id", "name"])[..]);
        assert_eq!(result.rows()[1], strings(&["1", "Alice"]));
        assert_eq!(result.rows()[2], strings(&["2", "NULL"]));
    }

    #[test]
    fn test_execute_empty_result_keeps_header() {
        let executor = duck_executor(RowShapePolicy::DropMismatched);
        let result = executor
            .execute("SELECT 1 AS id, 'x' AS label WHERE 1 = 0")
            .unwrap();

        assert_eq!(result.rows().len(), 1);
        assert_eq!(result.column_count(), 2);
    }

    #[test]
    fn test_execute_failure_has_no_partial_result() {
        let executor = duck_executor(RowShapePolicy::DropMismatched);
        let result = executor.execute("SELECT * FROM table_that_does_not_exist");
        assert!(matches!(result, Err(QueryError::Execution(_))));
    }
}
