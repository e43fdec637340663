// Rust guideline compliant 2026-02-16

//! Adaptive sampling controller (C10): an EWMA ratio controller that
//! widens or tightens the collector's poll interval/duration based on how
//! fast the log file is growing versus how fast it is being read, ported
//! line-for-line from `core/collector/adaptive_controller.py`
//! (`AdaptiveController`, `SamplingState`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdaptiveControllerError {
    #[error("failed to read state file {path}: {source}")]
    Read { path: String, source: std::sync::Arc<std::io::Error> },
    #[error("failed to write state file {path}: {source}")]
    Write { path: String, source: std::sync::Arc<std::io::Error> },
    #[error("failed to parse state file {path}: {source}")]
    Parse { path: String, source: std::sync::Arc<serde_json::Error> },
}

/// One of the four regimes `adjust` classifies the current write/read
/// ratio into (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Idle,
    Balanced,
    Overload,
    Backlog,
}

/// Persisted snapshot of the controller, written to a sidecar JSON file
/// after every `adjust` call (`SamplingState`, `_save_state`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SamplingState {
    /// Unix timestamp (seconds) of the last `adjust` call.
    pub timestamp: f64,
    pub file_size: u64,
    pub offset: u64,
    pub avg_ratio: f64,
    pub interval: u64,
    pub duration: u64,
    pub system_state: SystemState,
}

impl SamplingState {
    #[must_use]
    fn initial(now: Duration, init_interval: u64, init_duration: u64) -> Self {
        Self {
            timestamp: now.as_secs_f64(),
            file_size: 0,
            offset: 0,
            avg_ratio: 1.0,
            interval: init_interval,
            duration: init_duration,
            system_state: SystemState::Balanced,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveControllerConfig {
    pub state_file: PathBuf,
    pub init_interval: u64,
    pub init_duration: u64,
    pub alpha: f64,
    pub min_interval: u64,
    pub max_interval: u64,
}

impl Default for AdaptiveControllerConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/tmp/sentinel_adaptive_state.json"),
            init_interval: 600,
            init_duration: 600,
            alpha: 0.3,
            min_interval: 60,
            max_interval: 1800,
        }
    }
}

/// EWMA write/read ratio controller (§4.10). `adjust` takes `now` as an
/// explicit parameter rather than reading the wall clock itself, so the
/// core algorithm stays a pure, independently testable function; callers
/// pass `SystemTime::now()` converted to a `Duration` since the epoch.
#[derive(Debug)]
pub struct AdaptiveController {
    config: AdaptiveControllerConfig,
    state: SamplingState,
}

impl AdaptiveController {
    /// Load persisted state from `config.state_file` if present, else seed
    /// a fresh `BALANCED` state at `now` (`_load_state`).
    #[must_use]
    pub fn load(config: AdaptiveControllerConfig, now: Duration) -> Self {
        let fallback = SamplingState::initial(now, config.init_interval, config.init_duration);
        let state = match read_state(&config.state_file) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(%error, "could not load adaptive controller state, starting fresh");
                fallback
            }
        };
        Self { config, state }
    }

    #[must_use]
    pub fn state(&self) -> SamplingState {
        self.state
    }

    /// Recompute `interval`/`duration`/`system_state` from how much the log
    /// file grew (`file_size_now`) versus how much was read
    /// (`offset_now`) since the last call, persisting the new state
    /// (`AdaptiveController.adjust`).
    ///
    /// # Errors
    ///
    /// Returns [`AdaptiveControllerError::Write`] if the sidecar file
    /// cannot be written; the in-memory state is still updated.
    pub fn adjust(
        &mut self,
        file_size_now: u64,
        offset_now: u64,
        now: Duration,
    ) -> Result<(u64, u64, SystemState), AdaptiveControllerError> {
        let now_secs = now.as_secs_f64();
        let delta_t = {
            let raw = now_secs - self.state.timestamp;
            if raw == 0.0 { 1.0 } else { raw }
        };
        let delta_file = file_size_now.saturating_sub(self.state.file_size);
        let delta_offset = offset_now.saturating_sub(self.state.offset).max(1);

        let write_rate = delta_file as f64 / delta_t;
        let read_rate = delta_offset as f64 / delta_t;
        let ratio = write_rate / read_rate.max(1e-6);

        let avg_ratio = self.config.alpha * ratio + (1.0 - self.config.alpha) * self.state.avg_ratio;

        let mut interval = self.state.interval as f64;
        let mut duration = self.state.duration as f64;
        let system_state = if avg_ratio < 0.7 {
            interval *= 1.2;
            SystemState::Idle
        } else if avg_ratio <= 1.3 {
            SystemState::Balanced
        } else if avg_ratio <= 2.0 {
            interval *= 0.8;
            duration *= 1.2;
            SystemState::Overload
        } else {
            interval = (interval * 0.5).max(self.config.min_interval as f64);
            duration *= 1.5;
            SystemState::Backlog
        };

        let interval = interval.clamp(self.config.min_interval as f64, self.config.max_interval as f64) as u64;
        let duration = duration.clamp(60.0, 3600.0) as u64;

        self.state = SamplingState {
            timestamp: now_secs,
            file_size: file_size_now,
            offset: offset_now,
            avg_ratio,
            interval,
            duration,
            system_state,
        };

        write_state(&self.config.state_file, &self.state)?;

        tracing::info!(
            ?system_state,
            ratio = avg_ratio,
            interval,
            duration,
            write_rate,
            read_rate,
            "adaptive controller updated"
        );

        Ok((interval, duration, system_state))
    }
}

fn read_state(path: &Path) -> Result<SamplingState, AdaptiveControllerError> {
    let text = fs::read_to_string(path).map_err(|source| AdaptiveControllerError::Read {
        path: path.display().to_string(),
        source: std::sync::Arc::new(source),
    })?;
    serde_json::from_str(&text).map_err(|source| AdaptiveControllerError::Parse {
        path: path.display().to_string(),
        source: std::sync::Arc::new(source),
    })
}

fn write_state(path: &Path, state: &SamplingState) -> Result<(), AdaptiveControllerError> {
    let text = serde_json::to_string_pretty(state).expect("SamplingState always serializes");
    fs::write(path, text).map_err(|source| AdaptiveControllerError::Write {
        path: path.display().to_string(),
        source: std::sync::Arc::new(source),
    })
}
