use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{column_index, StoreError, TableStore, WriteSummary};

type Grid = BTreeMap<(usize, usize), String>;

/// In-process store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: Mutex<BTreeMap<String, Grid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a sheet as dense rows up to the last populated row.
    #[cfg(test)]
    pub fn rows(&self, sheet: &str) -> Vec<Vec<String>> {
        let sheets = self.lock();
        let Some(grid) = sheets.get(sheet) else {
            return Vec::new();
        };
        let last_row = grid.keys().map(|(r, _)| *r).max().unwrap_or(0);
        (1..=last_row)
            .map(|r| {
                let last_col = grid
                    .keys()
                    .filter(|(row, _)| *row == r)
                    .map(|(_, c)| *c)
                    .max()
                    .unwrap_or(0);
                (1..=last_col)
                    .map(|c| grid.get(&(r, c)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Grid>> {
        // a poisoned lock only means a panicking test; the data is still usable
        self.sheets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn read_column(&self, sheet: &str, column: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let col = column_index(column)?;
        let sheets = self.lock();
        let Some(grid) = sheets.get(sheet) else {
            return Ok(Vec::new());
        };
        let last = grid
            .iter()
            .filter(|((_, c), v)| *c == col && !v.is_empty())
            .map(|((r, _), _)| *r)
            .max()
            .unwrap_or(0);
        Ok((1..=last)
            .map(|r| match grid.get(&(r, col)) {
                Some(v) if !v.is_empty() => vec![v.clone()],
                _ => Vec::new(),
            })
            .collect())
    }

    async fn write(
        &self,
        sheet: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Result<WriteSummary, StoreError> {
        if start_row == 0 {
            return Err(StoreError::Other("rows are 1-based".into()));
        }
        let mut sheets = self.lock();
        let grid = sheets.entry(sheet.to_string()).or_default();
        let mut cells_written = 0;
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                grid.insert((start_row + i, j + 1), value.clone());
                cells_written += 1;
            }
        }
        Ok(WriteSummary { cells_written })
    }

    async fn clear(&self, sheet: &str) -> Result<bool, StoreError> {
        self.lock().remove(sheet);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn write_then_read_column() {
        let store = MemoryStore::new();
        let summary = store
            .write("S", 1, &[row(&["h1", "h2"]), row(&["a", "b"]), row(&["", "c"])])
            .await
            .unwrap();
        assert_eq!(summary.cells_written, 6);
        // trailing blank in column A is not reported
        assert_eq!(store.read_column("S", "A").await.unwrap().len(), 2);
        assert_eq!(store.read_column("S", "B").await.unwrap().len(), 3);
        assert_eq!(store.rows("S")[2], row(&["", "c"]));
    }

    #[tokio::test]
    async fn clear_and_missing_sheets() {
        let store = MemoryStore::new();
        assert!(store.read_column("nope", "A").await.unwrap().is_empty());
        store.write("S", 3, &[row(&["x"])]).await.unwrap();
        assert_eq!(
            store.read_column("S", "A").await.unwrap(),
            vec![Vec::<String>::new(), Vec::new(), row(&["x"])]
        );
        assert!(store.clear("S").await.unwrap());
        assert!(store.rows("S").is_empty());
        assert!(store.write("S", 0, &[row(&["x"])]).await.is_err());
    }
}
