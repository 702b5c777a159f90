use chrono::{DateTime, Local};

use super::sizer::{compute_widths, TextMeasure};
use crate::db::TabularResult;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rows together with the widths computed from those same rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    rows: Vec<Vec<String>>,
    column_widths: Vec<u16>,
}

impl BufferSnapshot {
    pub fn new<M>(result: &TabularResult, measure: &M) -> Self
    where
        M: TextMeasure + ?Sized,
    {
        Self {
            column_widths: compute_widths(result, measure),
            rows: result.rows().to_vec(),
        }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn column_widths(&self) -> &[u16] {
        &self.column_widths
    }
}

/// What one tick produced for its view.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Success {
        snapshot: BufferSnapshot,
        at: DateTime<Local>,
    },
    Failure {
        message: String,
    },
}

/// Latest rendered state of a single view.
#[derive(Debug, Clone, Default)]
pub struct DisplayBuffer {
    rows: Vec<Vec<String>>,
    column_widths: Vec<u16>,
    status: String,
    last_updated: Option<DateTime<Local>>,
}

impl DisplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a tick. Success replaces rows and widths together; failure
    /// keeps the previous rows and only annotates the status.
    pub fn apply(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Success { snapshot, at } => {
                self.rows = snapshot.rows;
                self.column_widths = snapshot.column_widths;
                self.status.clear();
                self.last_updated = Some(at);
            }
            RefreshOutcome::Failure { message } => {
                self.status = format!("Error: {message}");
            }
        }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn column_widths(&self) -> &[u16] {
        &self.column_widths
    }

    /// Empty after a successful tick, the error text after a failed one.
    #[cfg(test)]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[cfg(test)]
    pub fn last_updated(&self) -> Option<DateTime<Local>> {
        self.last_updated
    }

    pub fn has_error(&self) -> bool {
        !self.status.is_empty()
    }

    /// (rows including the header, columns)
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map_or(0, Vec::len))
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    pub fn column_width(&self, col: usize) -> Option<u16> {
        self.column_widths.get(col).copied()
    }

    /// Text for the live "last updated" label.
    pub fn status_line(&self) -> String {
        if !self.status.is_empty() {
            return self.status.clone();
        }
        match self.last_updated {
            Some(at) => at.format(TIMESTAMP_FORMAT).to_string(),
            None => "Loading...".to_string(),
        }
    }
}
