// Rust guideline compliant 2026-02-16

//! Batch registry (C5): the `log_metadata_batch` index as a typed state
//! machine. Generic over [`domain::DocumentStore<BatchEntry>`] — never over
//! a concrete adapter.

use domain::{BatchEntry, BatchId, BatchStatus, DocQuery, DocumentStore, DocumentStoreError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchRegistryError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
    #[error("batch {batch_id} cannot move from {from:?} to {to:?}: not a forward transition")]
    NonMonotonicTransition { batch_id: String, from: BatchStatus, to: BatchStatus },
}

#[derive(Debug)]
pub struct BatchRegistry<D: DocumentStore<BatchEntry>> {
    store: D,
}

impl<D: DocumentStore<BatchEntry>> BatchRegistry<D> {
    #[must_use]
    pub fn new(store: D) -> Self {
        Self { store }
    }

    /// Advance `batch_id` to `new_status`. Creates the entry (at `new_status`)
    /// if it does not exist yet — the first record seen in a batch creates it
    /// at `COLLECTING` (§4.5).
    ///
    /// # Errors
    ///
    /// Returns [`BatchRegistryError::NonMonotonicTransition`] if `new_status`
    /// does not strictly follow the current status in the monotone order of
    /// §3 (a programmer error, not a transient fault — see `SPEC_FULL.md` §4.5).
    pub async fn advance(
        &self,
        batch_id: &BatchId,
        new_status: BatchStatus,
    ) -> Result<(), BatchRegistryError> {
        let existing = self.store.get_by_id(batch_id.as_str()).await?;
        if let Some(entry) = &existing {
            self.assert_forward_transition(batch_id, entry.status, new_status)?;
        }
        let updated = BatchEntry { batch_id: batch_id.clone(), status: new_status };
        self.store.merge(batch_id.as_str(), updated).await?;
        Ok(())
    }

    fn assert_forward_transition(
        &self,
        batch_id: &BatchId,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<(), BatchRegistryError> {
        if matches!(to, BatchStatus::Failed) {
            // FAILED is reachable from any non-terminal state (§4.5, §7 StageFatal).
            return Ok(());
        }
        match (from.rank(), to.rank()) {
            (Some(from_rank), Some(to_rank)) if to_rank > from_rank => Ok(()),
            _ => Err(BatchRegistryError::NonMonotonicTransition {
                batch_id: batch_id.to_string(),
                from,
                to,
            }),
        }
    }

    /// Batches in `status`, ascending by `batch_id` so downstream stages
    /// process oldest first (§4.5).
    ///
    /// # Errors
    ///
    /// Propagates [`DocumentStoreError`] from the underlying store.
    pub async fn get_all_by_status(
        &self,
        status: BatchStatus,
    ) -> Result<Vec<BatchEntry>, BatchRegistryError> {
        let status_label = format!("{status:?}");
        let query = DocQuery::term("status", status_label).sorted_by("batch_id");
        let mut entries: Vec<BatchEntry> = self
            .store
            .get_all(&query)
            .await?
            .into_iter()
            .filter(|e| e.status == status)
            .collect();
        entries.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        Ok(entries)
    }

    /// Entries left in an `*ING` state, candidates for crash-recovery re-entry
    /// (§4.5, §9 open question on stuck `*ING` batches).
    ///
    /// # Errors
    ///
    /// Propagates [`DocumentStoreError`] from the underlying store.
    pub async fn get_all_in_progress(&self) -> Result<Vec<BatchEntry>, BatchRegistryError> {
        let all = self.store.get_all(&DocQuery::all()).await?;
        Ok(all.into_iter().filter(|e| e.status.is_in_progress()).collect())
    }
}
