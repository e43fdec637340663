// Rust guideline compliant 2026-02-16

//! Tailing collector (C2).
//!
//! Reads lines from a byte offset forward until EOF, never blocking on EOF:
//! a single [`Collector::run`] call drains whatever is currently on disk and
//! returns, relying on the caller (the C9 scheduler wrapper) to re-invoke it
//! on the next tick. Generic over the [`domain::CollectSink`] port — this
//! crate never touches an offset store or a document store directly.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use domain::{BatchId, CollectSink, LogRecord};
use log_parser::parse_line;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt as _, AsyncSeekExt as _, BufReader};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CollectorError {
    #[error("invalid collector config: {0}")]
    InvalidConfig(String),
    #[error("io error reading {path}: {source}")]
    Io { path: String, #[source] source: std::sync::Arc<std::io::Error> },
    /// The sink's `on_batch` returned `false` (§7 `CallbackFailure`): fatal to
    /// this run, offset left untouched, next run retries from the same offset.
    #[error("data callback reported failure after {records_delivered} records")]
    CallbackFailure { records_delivered: u64 },
}

impl CollectorError {
    fn io(path: &str, source: std::io::Error) -> Self {
        Self::Io { path: path.to_owned(), source: std::sync::Arc::new(source) }
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    batch_size: usize,
}

impl CollectorConfig {
    #[must_use]
    pub fn builder() -> CollectorConfigBuilder {
        CollectorConfigBuilder::default()
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[derive(Debug)]
pub struct CollectorConfigBuilder {
    batch_size: usize,
}

impl Default for CollectorConfigBuilder {
    fn default() -> Self {
        // §4.2: "batch_size (default 1000)".
        Self { batch_size: 1000 }
    }
}

impl CollectorConfigBuilder {
    #[must_use]
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// # Errors
    ///
    /// Returns [`CollectorError::InvalidConfig`] when `batch_size == 0`.
    pub fn build(self) -> Result<CollectorConfig, CollectorError> {
        if self.batch_size == 0 {
            return Err(CollectorError::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        Ok(CollectorConfig { batch_size: self.batch_size })
    }
}

/// Outcome of one [`Collector::run`] invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Byte offset to resume from on the next tick.
    pub final_offset: u64,
    pub records_collected: u64,
    pub lines_skipped: u64,
    /// `true` if the run ended because `stop` was observed, not because of EOF.
    pub stopped_early: bool,
}

#[derive(Debug)]
pub struct Collector {
    config: CollectorConfig,
}

impl Collector {
    #[must_use]
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// Drain `file_path` from `start_offset` to EOF (or until `stop` flips),
    /// invoking `sink.on_batch` every `batch_size` records and on every date
    /// or batch transition (§4.2).
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Io`] on a read failure, or
    /// [`CollectorError::CallbackFailure`] if `sink.on_batch` returns `false`.
    pub async fn run<S: CollectSink>(
        &self,
        sink: &S,
        file_path: &str,
        start_offset: u64,
        stop: &AtomicBool,
    ) -> Result<RunOutcome, CollectorError> {
        let file = File::open(file_path).await.map_err(|err| CollectorError::io(file_path, err))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(std::io::SeekFrom::Start(start_offset))
            .await
            .map_err(|err| CollectorError::io(file_path, err))?;

        let mut offset = start_offset;
        let mut buffer: Vec<LogRecord> = Vec::new();
        let mut prior_date: Option<NaiveDate> = None;
        let mut prior_batch: Option<BatchId> = None;
        let mut records_collected = 0_u64;
        let mut lines_skipped = 0_u64;
        let mut raw_line = Vec::new();

        loop {
            if stop.load(Ordering::Relaxed) {
                self.flush(sink, &mut buffer, offset).await?;
                return Ok(RunOutcome {
                    final_offset: offset,
                    records_collected,
                    lines_skipped,
                    stopped_early: true,
                });
            }

            raw_line.clear();
            let bytes_read = reader
                .read_until(b'\n', &mut raw_line)
                .await
                .map_err(|err| CollectorError::io(file_path, err))?;
            if bytes_read == 0 {
                // EOF: flush whatever remains and return (never block, §4.2).
                self.flush(sink, &mut buffer, offset).await?;
                return Ok(RunOutcome {
                    final_offset: offset,
                    records_collected,
                    lines_skipped,
                    stopped_early: false,
                });
            }
            let offset_before_line = offset;
            offset += bytes_read as u64;
            let line = String::from_utf8_lossy(&raw_line);
            let line = line.trim_end_matches(['\n', '\r']);

            let record = match parse_line(line) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(error = %err, %file_path, "skipping malformed log line");
                    lines_skipped += 1;
                    continue;
                }
            };

            if let Some(prior) = prior_date
                && prior != record.date
            {
                self.flush(sink, &mut buffer, offset_before_line).await?;
                sink.on_date_changed(prior, record.date).await;
            }
            if let Some(prior) = &prior_batch
                && *prior != record.batch_id
            {
                self.flush(sink, &mut buffer, offset_before_line).await?;
                sink.on_batch_changed(prior.clone(), record.batch_id.clone()).await;
            }
            prior_date = Some(record.date);
            prior_batch = Some(record.batch_id.clone());

            buffer.push(record);
            records_collected += 1;

            if buffer.len() >= self.config.batch_size {
                self.flush(sink, &mut buffer, offset).await?;
            }
        }
    }

    async fn flush<S: CollectSink>(
        &self,
        sink: &S,
        buffer: &mut Vec<LogRecord>,
        offset_after: u64,
    ) -> Result<(), CollectorError> {
        if buffer.is_empty() {
            return Ok(());
        }
        let records_delivered = buffer.len() as u64;
        let batch = std::mem::take(buffer);
        if !sink.on_batch(batch, offset_after).await {
            return Err(CollectorError::CallbackFailure { records_delivered });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Write as _;
    use tempfile_stub::NamedTempFile;

    /// Minimal stand-in for a temp-file crate: this workspace does not
    /// depend on `tempfile`, so tests write into `std::env::temp_dir()`
    /// with a unique name and clean up on drop.
    mod tempfile_stub {
        use std::path::PathBuf;

        pub struct NamedTempFile {
            pub path: PathBuf,
        }

        impl NamedTempFile {
            pub fn new(tag: &str) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "sentinel_collector_test_{tag}_{:?}",
                    std::thread::current().id()
                ));
                Self { path }
            }
        }

        impl Drop for NamedTempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    struct RecordingSink {
        batches: RefCell<Vec<(usize, u64)>>,
        date_changes: RefCell<Vec<(NaiveDate, NaiveDate)>>,
        batch_changes: RefCell<Vec<(BatchId, BatchId)>>,
        fail_next: RefCell<bool>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                batches: RefCell::new(Vec::new()),
                date_changes: RefCell::new(Vec::new()),
                batch_changes: RefCell::new(Vec::new()),
                fail_next: RefCell::new(false),
            }
        }
    }

    impl CollectSink for RecordingSink {
        async fn on_batch(&self, records: Vec<LogRecord>, offset_after: u64) -> bool {
            if *self.fail_next.borrow() {
                return false;
            }
            self.batches.borrow_mut().push((records.len(), offset_after));
            true
        }

        async fn on_date_changed(&self, prior: NaiveDate, current: NaiveDate) {
            self.date_changes.borrow_mut().push((prior, current));
        }

        async fn on_batch_changed(&self, prior: BatchId, current: BatchId) {
            self.batch_changes.borrow_mut().push((prior, current));
        }
    }

    fn line(ip: &str, time: &str, ms: &str) -> String {
        format!("{ip}||-||{time}||GET /a HTTP/1.1||200||512||1024||-||curl/8.0||{ms}\n")
    }

    fn write_lines(path: &std::path::Path, lines: &[String]) {
        let mut f = std::fs::File::create(path).unwrap();
        for l in lines {
            f.write_all(l.as_bytes()).unwrap();
        }
    }

    #[tokio::test]
    async fn empty_file_returns_offset_unchanged_and_no_events() {
        let tmp = NamedTempFile::new("empty");
        std::fs::File::create(&tmp.path).unwrap();
        let sink = RecordingSink::new();
        let collector = Collector::new(CollectorConfig::builder().build().unwrap());
        let stop = AtomicBool::new(false);

        let outcome = collector
            .run(&sink, tmp.path.to_str().unwrap(), 0, &stop)
            .await
            .unwrap();

        assert_eq!(outcome.final_offset, 0);
        assert_eq!(outcome.records_collected, 0);
        assert!(sink.batches.borrow().is_empty());
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_surrounding_records_survive() {
        let tmp = NamedTempFile::new("malformed");
        let lines = vec![
            line("1.2.3.4", "01/Jun/2024:12:37:54 +0000", "0.1"),
            "not-a-valid-line\n".to_owned(),
            line("1.2.3.5", "01/Jun/2024:12:37:55 +0000", "0.1"),
        ];
        write_lines(&tmp.path, &lines);
        let sink = RecordingSink::new();
        let collector = Collector::new(CollectorConfig::builder().build().unwrap());
        let stop = AtomicBool::new(false);

        let outcome = collector
            .run(&sink, tmp.path.to_str().unwrap(), 0, &stop)
            .await
            .unwrap();

        assert_eq!(outcome.records_collected, 2);
        assert_eq!(outcome.lines_skipped, 1);
    }

    // S2 (batch transition), §8: two records in different 5-minute batches
    // flush the first batch before the second begins.
    #[tokio::test]
    async fn batch_change_flushes_prior_batch_and_emits_event() {
        let tmp = NamedTempFile::new("batch_change");
        let lines = vec![
            line("1.2.3.4", "01/Jun/2024:12:39:59 +0000", "0.1"),
            line("1.2.3.4", "01/Jun/2024:12:40:00 +0000", "0.1"),
        ];
        write_lines(&tmp.path, &lines);
        let sink = RecordingSink::new();
        let collector = Collector::new(CollectorConfig::builder().batch_size(1000).build().unwrap());
        let stop = AtomicBool::new(false);

        collector.run(&sink, tmp.path.to_str().unwrap(), 0, &stop).await.unwrap();

        assert_eq!(sink.batch_changes.borrow().len(), 1);
        let (prior, current) = sink.batch_changes.borrow()[0].clone();
        assert_eq!(prior.as_str(), "2024_06_011235");
        assert_eq!(current.as_str(), "2024_06_011240");
        // One flush for the first batch (triggered by the transition) plus
        // the EOF flush for the second batch's single record.
        assert_eq!(sink.batches.borrow().len(), 2);
        assert_eq!(sink.batches.borrow()[0].0, 1);
    }

    #[tokio::test]
    async fn reaching_batch_size_triggers_a_flush() {
        let tmp = NamedTempFile::new("batch_size");
        let lines: Vec<String> = (0..5)
            .map(|i| line("1.2.3.4", &format!("01/Jun/2024:12:3{i}:00 +0000"), "0.1"))
            .collect();
        write_lines(&tmp.path, &lines);
        let sink = RecordingSink::new();
        let collector = Collector::new(CollectorConfig::builder().batch_size(2).build().unwrap());
        let stop = AtomicBool::new(false);

        let outcome = collector
            .run(&sink, tmp.path.to_str().unwrap(), 0, &stop)
            .await
            .unwrap();

        assert_eq!(outcome.records_collected, 5);
        assert!(sink.batches.borrow().len() >= 2);
    }

    #[tokio::test]
    async fn callback_failure_is_fatal_and_offset_is_untouched_by_this_run() {
        let tmp = NamedTempFile::new("callback_fail");
        let lines = vec![line("1.2.3.4", "01/Jun/2024:12:37:54 +0000", "0.1")];
        write_lines(&tmp.path, &lines);
        let sink = RecordingSink::new();
        *sink.fail_next.borrow_mut() = true;
        let collector = Collector::new(CollectorConfig::builder().build().unwrap());
        let stop = AtomicBool::new(false);

        let result = collector.run(&sink, tmp.path.to_str().unwrap(), 0, &stop).await;
        assert!(matches!(result, Err(CollectorError::CallbackFailure { .. })));
    }

    #[tokio::test]
    async fn resumes_from_a_nonzero_offset() {
        let tmp = NamedTempFile::new("resume");
        let first = line("1.2.3.4", "01/Jun/2024:12:37:54 +0000", "0.1");
        let second = line("1.2.3.5", "01/Jun/2024:12:37:55 +0000", "0.1");
        write_lines(&tmp.path, &[first.clone(), second]);
        let sink = RecordingSink::new();
        let collector = Collector::new(CollectorConfig::builder().build().unwrap());
        let stop = AtomicBool::new(false);

        let outcome = collector
            .run(&sink, tmp.path.to_str().unwrap(), first.len() as u64, &stop)
            .await
            .unwrap();

        assert_eq!(outcome.records_collected, 1);
        let batches = sink.batches.borrow();
        assert_eq!(batches[0].0, 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = CollectorConfig::builder().batch_size(0).build();
        assert!(matches!(result, Err(CollectorError::InvalidConfig(_))));
    }
}
