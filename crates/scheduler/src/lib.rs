// Rust guideline compliant 2026-02-16

//! Stage scheduler (C9): a static, cron-driven registry of background
//! tasks, grounded on `core/scheduler/scheduler.py`'s `SchedulerManager`
//! and `core/scheduler/task_runner.py`'s `TaskRunner` ABC. The source's
//! `pkgutil.walk_packages`/`TaskRunner.__subclasses__()` reflection has no
//! Rust equivalent and is replaced by an explicit `Vec<Box<dyn Task>>`
//! built by the caller (§9 design note, §4.9).

use std::collections::{HashMap, HashSet};
use std::str::FromStr as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use domain::{DocQuery, DocumentStore, DocumentStoreError, TaskRunStatus, TaskScheduler};
use tokio::sync::{Mutex, Semaphore};

/// Total concurrent task executions allowed across all task ids (§5, §4.9).
const MAX_CONCURRENT_TASKS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
    #[error("invalid cron expression {expr:?} for task {task_id}: {source}")]
    InvalidCron { task_id: String, expr: String, source: cron::error::Error },
}

/// One schedulable unit of work, replacing `TaskRunner` (§4.9). Boxed
/// dynamically (`Vec<Box<dyn Task>>`), hence the `async_trait` macro rather
/// than a native `async fn` in the trait — a `dyn Task` must be object-safe.
#[async_trait::async_trait]
pub trait Task: Send + Sync {
    fn task_id(&self) -> &str;
    async fn run(&self) -> anyhow::Result<()>;
}

/// Drives every registered [`Task`] on its configured cron schedule,
/// mirroring `SchedulerManager.__task_runner_wrapper`'s bookkeeping
/// (`RUNNING` -> run -> `SUCCESS`/`FAILED`, `last_cost`, `run_count`).
pub struct Scheduler<S: DocumentStore<TaskScheduler>> {
    tasks: Vec<Box<dyn Task>>,
    store: S,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    last_fired_minute: Arc<Mutex<HashMap<String, String>>>,
}

impl<S: DocumentStore<TaskScheduler>> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks.iter().map(Task::task_id).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<S: DocumentStore<TaskScheduler>> Scheduler<S> {
    #[must_use]
    pub fn new(tasks: Vec<Box<dyn Task>>, store: S) -> Self {
        Self {
            tasks,
            store,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_TASKS)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            last_fired_minute: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Evaluate every task's cron schedule against `now` and fire the ones
    /// that are due, each at most once per wall-clock minute (§4.9's
    /// minute-precision dedup guard) and never overlapping itself
    /// (§5's `max_instances=1, coalesce=true`).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if a task's configuration cannot be read,
    /// or if its cron expression fails to parse.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let guard_value = now.format("%Y_%m_%d%H%M").to_string();
        let mut fired = 0;
        for task_id in self.tasks.iter().map(|t| t.task_id().to_owned()).collect::<Vec<_>>() {
            if self.try_fire(&task_id, now, &guard_value).await? {
                fired += 1;
            }
        }
        Ok(fired)
    }

    async fn try_fire(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        guard_value: &str,
    ) -> Result<bool, SchedulerError> {
        let Some(config) = self.store.get_by_id(task_id).await? else {
            tracing::warn!(task_id, "task not found in config, skipping");
            return Ok(false);
        };
        if !config.enabled {
            return Ok(false);
        }
        let Some(cron_expr) = &config.cron else {
            return Ok(false);
        };
        let schedule = Schedule::from_str(cron_expr).map_err(|source| SchedulerError::InvalidCron {
            task_id: task_id.to_owned(),
            expr: cron_expr.clone(),
            source,
        })?;
        if !schedule.includes(now) {
            return Ok(false);
        }

        {
            let mut last_fired = self.last_fired_minute.lock().await;
            if last_fired.get(task_id).map(String::as_str) == Some(guard_value) {
                return Ok(false);
            }
            last_fired.insert(task_id.to_owned(), guard_value.to_owned());
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(task_id.to_owned()) {
                tracing::warn!(task_id, "previous run still in flight, coalescing tick");
                return Ok(false);
            }
        }

        self.run_task(task_id, now).await?;

        self.in_flight.lock().await.remove(task_id);
        Ok(true)
    }

    async fn run_task(&self, task_id: &str, start_time: DateTime<Utc>) -> Result<(), SchedulerError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        let Some(task) = self.tasks.iter().find(|t| t.task_id() == task_id) else {
            return Ok(());
        };

        tracing::info!(task_id, "task started");
        self.store
            .upsert_with(task_id, TaskScheduler::new(task_id, ""), move |mut existing| {
                existing.last_run_at = Some(start_time);
                existing.last_status = Some(TaskRunStatus::Running);
                existing
            })
            .await?;

        let outcome = task.run().await;
        let cost_seconds = (Utc::now() - start_time).num_seconds();

        self.store
            .upsert_with(task_id, TaskScheduler::new(task_id, ""), move |mut existing| {
                existing.run_count += 1;
                existing.last_cost_seconds = Some(cost_seconds);
                match &outcome {
                    Ok(()) => {
                        existing.last_status = Some(TaskRunStatus::Successful);
                        existing.last_message = None;
                        tracing::info!(task_id = %existing.task_id, "task completed");
                    }
                    Err(error) => {
                        existing.last_status = Some(TaskRunStatus::Failed);
                        existing.last_message = Some(format!("{error:#}"));
                        tracing::error!(task_id = %existing.task_id, %error, "task failed");
                    }
                }
                existing
            })
            .await?;
        Ok(())
    }

    /// All configured tasks, for registry bootstrap/inspection (tests and
    /// `main.rs` wiring).
    ///
    /// # Errors
    ///
    /// Propagates [`DocumentStoreError`] from the underlying store.
    pub async fn configs(&self) -> Result<Vec<TaskScheduler>, DocumentStoreError> {
        self.store.get_all(&DocQuery::all()).await
    }
}
