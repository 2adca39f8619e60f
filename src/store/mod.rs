//! Persistent tabular store: a spreadsheet-like grid of string cells, keyed
//! by sheet (tab) name and 1-based row/column.

pub mod memory;
pub mod sheets;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sheets::SheetsStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid column {0:?}")]
    InvalidColumn(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub cells_written: usize,
}

/// The three operations uploads need from a store.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Values of one column from row 1 down to its last populated cell.
    /// Gaps come back as empty rows, trailing blanks are not returned.
    async fn read_column(&self, sheet: &str, column: &str) -> Result<Vec<Vec<String>>, StoreError>;

    /// Write `rows` starting at column A of `start_row` (1-based).
    async fn write(
        &self,
        sheet: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Result<WriteSummary, StoreError>;

    /// Remove every value from the sheet.
    async fn clear(&self, sheet: &str) -> Result<bool, StoreError>;
}

/// "A" → 1, "AA" → 27.
pub fn column_index(column: &str) -> Result<usize, StoreError> {
    let col = column.trim();
    if col.is_empty() || !col.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(StoreError::InvalidColumn(column.to_string()));
    }
    Ok(col
        .chars()
        .fold(0, |acc, c| acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1)))
}

/// Quote a sheet name for A1 notation: `'Expert Corner'!A1`.
pub fn a1(sheet: &str, cells: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), cells)
}
