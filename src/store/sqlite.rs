use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::Connection;

use super::{column_index, StoreError, TableStore, WriteSummary};

/// Local sheet store: one row per non-empty cell.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Other(format!("create {}: {}", dir.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cells (
            sheet      TEXT NOT NULL,
            row        INTEGER NOT NULL,
            col        INTEGER NOT NULL,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (sheet, row, col)
        );
        CREATE INDEX IF NOT EXISTS idx_cells_sheet_col ON cells(sheet, col);
        ",
    )?;
    Ok(())
}

#[async_trait]
impl TableStore for SqliteStore {
    async fn read_column(&self, sheet: &str, column: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let col = column_index(column)? as i64;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT row, value FROM cells
             WHERE sheet = ?1 AND col = ?2 AND value <> ''
             ORDER BY row",
        )?;
        let cells = stmt
            .query_map(rusqlite::params![sheet, col], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out: Vec<Vec<String>> = Vec::new();
        for (row, value) in cells {
            let idx = row.max(1) as usize;
            out.resize(idx - 1, Vec::new());
            out.push(vec![value]);
        }
        Ok(out)
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
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut cells_written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO cells (sheet, row, col, value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (i, row) in rows.iter().enumerate() {
                for (j, value) in row.iter().enumerate() {
                    stmt.execute(rusqlite::params![
                        sheet,
                        (start_row + i) as i64,
                        (j + 1) as i64,
                        value,
                    ])?;
                    cells_written += 1;
                }
            }
        }
        tx.commit()?;
        Ok(WriteSummary { cells_written })
    }

    async fn clear(&self, sheet: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM cells WHERE sheet = ?1", rusqlite::params![sheet])?;
        tracing::debug!(sheet, removed, "cleared sheet");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn rows(n: usize) -> Vec<Vec<String>> {
        (0..n)
            .map(|i| vec![format!("d{}", i), "cat".into(), String::new(), "sum".into()])
            .collect()
    }

    #[tokio::test]
    async fn matches_memory_store_semantics() {
        let sqlite = SqliteStore::in_memory().unwrap();
        let memory = MemoryStore::new();
        for store in [&sqlite as &dyn TableStore, &memory as &dyn TableStore] {
            store.write("Rulings", 1, &rows(3)).await.unwrap();
            store.write("Rulings", 6, &rows(1)).await.unwrap();
        }
        let a = sqlite.read_column("Rulings", "A").await.unwrap();
        let b = memory.read_column("Rulings", "A").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
        assert!(a[3].is_empty());
        // column C was only ever written blank
        assert!(sqlite.read_column("Rulings", "C").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/sheet.sqlite");
        {
            let store = SqliteStore::open(&path).unwrap();
            let summary = store.write("S", 1, &rows(2)).await.unwrap();
            assert_eq!(summary.cells_written, 8);
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.read_column("S", "A").await.unwrap().len(), 2);
        store.clear("S").await.unwrap();
        assert!(store.read_column("S", "A").await.unwrap().is_empty());
    }
}
