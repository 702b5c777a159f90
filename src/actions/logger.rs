use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use anyhow::Result;
use tracing::{info, error};

use super::{Action, ActionResult};

pub const DEFAULT_ACTION_LOG: &str = "sqlmon-actions.log";

/// Tracks an action in progress
pub struct ActionTracker {
    pub action: Action,
    pub start_time: Instant,
}

/// Centralized logger for user actions, one JSON line per result
pub struct ActionLogger {
    log_file: Option<BufWriter<File>>,
    log_path: Option<PathBuf>,
}

impl ActionLogger {
    pub fn new(path: &Path) -> Result<Self> {
        // Create/overwrite the log file
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        info!("Action logger initialized at: {}", path.display());

        Ok(Self {
            log_file: Some(BufWriter::new(file)),
            log_path: Some(path.to_path_buf()),
        })
    }

    /// A logger that only forwards to tracing
    pub fn disabled() -> Self {
        Self {
            log_file: None,
            log_path: None,
        }
    }

    /// Start logging an action and return a tracker for it
    pub fn start_action(&mut self, action: Action) -> ActionTracker {
        let start_time = Instant::now();
        info!("Starting action: {}", action);

        ActionTracker {
            action,
            start_time,
        }
    }

    /// Complete action logging with the result
    pub fn complete_action<T>(&mut self, tracker: ActionTracker, result: &Result<T>) {
        let duration_ms = tracker.start_time.elapsed().as_millis() as u64;

        let action_result = match result {
            Ok(_) => ActionResult::success(tracker.action, None, duration_ms),
            Err(e) => ActionResult::failure(tracker.action, format!("{e:#}"), duration_ms),
        };

        self.log_action_result(&action_result);
    }

    fn log_action_result(&mut self, result: &ActionResult) {
        if result.success {
            info!("Action completed: {} ({}ms)", result.action, result.duration_ms);
        } else {
            error!(
                "Action failed: {} - {} ({}ms)",
                result.action,
                result.error.as_deref().unwrap_or("Unknown error"),
                result.duration_ms
            );
        }

        if let Some(ref mut writer) = self.log_file {
            match serde_json::to_string(result) {
                Ok(json_str) => {
                    if let Err(e) = writeln!(writer, "{}", json_str) {
                        error!("Failed to write action result to log: {}", e);
                    } else {
                        // Flush to ensure it's written immediately
                        let _ = writer.flush();
                    }
                }
                Err(e) => {
                    error!("Failed to serialize action result: {}", e);
                }
            }
        }
    }

    /// Get the path to the log file, if one is being written
    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }
}

impl Drop for ActionLogger {
    fn drop(&mut self) {
        if let Some(ref mut writer) = self.log_file {
            let _ = writer.flush();
        }
    }
}
