// Rust guideline compliant 2026-02-16

//! In-process `OffsetStore` adapter. Useful for tests and for a single-run
//! demo invocation where persisting the offset across restarts does not
//! matter; production use should prefer [`super::sqlite_offset_store`].

use std::sync::Mutex;

use chrono::Utc;
use domain::{OffsetRow, OffsetStore, OffsetStoreError};

#[derive(Debug)]
pub struct InMemoryOffsetStore {
    row: Mutex<Option<OffsetRow>>,
    file_path: String,
}

impl InMemoryOffsetStore {
    #[must_use]
    pub fn new(file_path: impl Into<String>) -> Self {
        Self { row: Mutex::new(None), file_path: file_path.into() }
    }
}

impl OffsetStore for InMemoryOffsetStore {
    async fn load(&self) -> Result<OffsetRow, OffsetStoreError> {
        let guard = self.row.lock().expect("offset row mutex poisoned");
        Ok(guard.clone().unwrap_or_else(|| OffsetRow::zero(self.file_path.clone(), Utc::now().date_naive(), Utc::now())))
    }

    async fn save(&self, row: OffsetRow) -> Result<(), OffsetStoreError> {
        *self.row.lock().expect("offset row mutex poisoned") = Some(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_row_reads_back_as_zero() {
        let store = InMemoryOffsetStore::new("/var/log/nginx/access.log");
        let row = store.load().await.unwrap();
        assert_eq!(row.offset, 0);
        assert_eq!(row.count, 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryOffsetStore::new("/var/log/nginx/access.log");
        let row = OffsetRow { offset: 4096, count: 12, ..store.load().await.unwrap() };
        store.save(row.clone()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), row);
    }
}
