//! Per-task scheduler bookkeeping (§3, §4.9), inferred from
//! `models/scheduler.py` (`TaskScheduler`) plus its only two writers,
//! `core/scheduler/scheduler.py: __load_config`/`__task_runner_wrapper`.

use chrono::{DateTime, Utc};

/// Outcome of the most recent run of one task, mirroring the source's plain
/// `last_status: Optional[str]` strings (`"running"`/`"successful"`/`"failed"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunStatus {
    Running,
    Successful,
    Failed,
}

/// One row of the `task_scheduler` index: a task's cron configuration plus
/// its last-run bookkeeping, written by the scheduler's wrapper before and
/// after every invocation (§4.9).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskScheduler {
    pub task_id: String,
    pub task_name: Option<String>,
    pub enabled: bool,
    pub cron: Option<String>,
    pub description: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<TaskRunStatus>,
    pub last_message: Option<String>,
    pub last_cost_seconds: Option<i64>,
    pub run_count: u64,
}

impl TaskScheduler {
    /// A freshly configured, never-run task (§4.9's "write RUNNING" case
    /// needs a seed when no row exists yet).
    #[must_use]
    pub fn new(task_id: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_name: None,
            enabled: true,
            cron: Some(cron.into()),
            description: None,
            last_run_at: None,
            last_status: None,
            last_message: None,
            last_cost_seconds: None,
            run_count: 0,
        }
    }
}
