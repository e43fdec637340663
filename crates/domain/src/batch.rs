//! Batch state machine entity (§3, §4.5).

use crate::record::BatchId;

/// Lifecycle of a single `batch_id`, left-to-right monotone until a terminal
/// state (`SUMMARIZED` or `FAILED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Collecting,
    Collected,
    Aggregating,
    Aggregated,
    Scoring,
    Scored,
    /// Legacy name kept from the source scheduler: conceptually "summarizing".
    Summarizing,
    Summarized,
    Failed,
}

impl BatchStatus {
    /// Ordinal position in the monotone left-to-right order of §3, used by
    /// `batch_registry` to reject backward transitions. `Failed` has no
    /// ordinal position of its own: it is reachable from any non-terminal
    /// state and is never advanced further.
    #[must_use]
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Collecting => Some(0),
            Self::Collected => Some(1),
            Self::Aggregating => Some(2),
            Self::Aggregated => Some(3),
            Self::Scoring => Some(4),
            Self::Scored => Some(5),
            Self::Summarizing => Some(6),
            Self::Summarized => Some(7),
            Self::Failed => None,
        }
    }

    /// `*ING` states are the ones a crashed stage can leave a batch stuck in
    /// (§4.5 crash recovery, §9 open question on stuck `*ING` batches).
    #[must_use]
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Collecting | Self::Aggregating | Self::Scoring | Self::Summarizing
        )
    }
}

/// A row of the `log_metadata_batch` registry (§3, §4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub batch_id: BatchId,
    pub status: BatchStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_rank_is_strictly_increasing_along_the_happy_path() {
        let order = [
            BatchStatus::Collecting,
            BatchStatus::Collected,
            BatchStatus::Aggregating,
            BatchStatus::Aggregated,
            BatchStatus::Scoring,
            BatchStatus::Scored,
            BatchStatus::Summarizing,
            BatchStatus::Summarized,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank().unwrap() < pair[1].rank().unwrap());
        }
    }

    #[test]
    fn in_progress_states() {
        assert!(BatchStatus::Collecting.is_in_progress());
        assert!(BatchStatus::Aggregating.is_in_progress());
        assert!(!BatchStatus::Collected.is_in_progress());
        assert!(!BatchStatus::Summarized.is_in_progress());
        assert!(!BatchStatus::Failed.is_in_progress());
    }
}
