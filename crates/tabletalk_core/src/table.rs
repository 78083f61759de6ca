use std::io::Cursor;
use std::sync::Arc;

use parking_lot::RwLock;
use polars::prelude::*;
use thiserror::Error;

/// The uploaded dataset, shared between the orchestrator and the sandbox.
/// Sandboxed code gets a write handle and may mutate the frame in place;
/// this is an accepted risk, not something the loader prevents.
pub type SharedFrame = Arc<RwLock<DataFrame>>;

#[derive(Debug, Error)]
pub enum TableError {
    /// The bytes were received but do not parse as CSV. Maps to a client
    /// error at the HTTP boundary.
    #[error("Failed to parse CSV file: {0}")]
    Parse(String),
    #[error("Error reading CSV data: {0}")]
    Io(String),
}

pub fn load_csv(bytes: &[u8]) -> Result<DataFrame, TableError> {
    CsvReader::new(Cursor::new(bytes))
        .has_header(true)
        .finish()
        .map_err(|e| match &e {
            // Malformed or empty input is the client's fault; anything else
            // (reader-level failures) is ours.
            PolarsError::ComputeError(_)
            | PolarsError::NoData(_)
            | PolarsError::SchemaMismatch(_)
            | PolarsError::ShapeMismatch(_) => TableError::Parse(e.to_string()),
            _ => TableError::Io(e.to_string()),
        })
}

pub fn shared(df: DataFrame) -> SharedFrame {
    Arc::new(RwLock::new(df))
}

/// (rows, cols) plus column names, in frame order.
pub fn schema_summary(df: &DataFrame) -> ((usize, usize), Vec<String>) {
    let shape = df.shape();
    let columns = df.get_column_names().iter().map(|s| s.to_string()).collect();
    (shape, columns)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_CSV: &[u8] = b"a,b\n1,2\n3,4\n5,6\n";

    #[test]
    fn loads_csv_with_header() {
        let df = load_csv(SAMPLE_CSV).unwrap();
        let (shape, columns) = schema_summary(&df);
        assert_eq!(shape, (3, 2));
        assert_eq!(columns, vec!["a", "b"]);
    }

    #[test]
    fn ragged_rows_are_a_parse_error() {
        let err = load_csv(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(err, TableError::Parse(_)), "got: {err}");
    }

    #[test]
    fn empty_input_is_a_parse_error() {
        let err = load_csv(b"").unwrap_err();
        assert!(matches!(err, TableError::Parse(_)), "got: {err}");
    }
}
