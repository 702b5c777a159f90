use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

pub mod logger;
pub use logger::ActionLogger;

/// Meaningful user actions worth keeping a record of
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    SwitchView {
        group: String,
        view: String,
    },
    RefreshView {
        view: String,
    },
    CopyCell {
        view: String,
        row: usize,
        col: usize,
    },
}

/// Result of executing an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: Action,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ActionResult {
    pub fn success(action: Action, message: Option<String>, duration_ms: u64) -> Self {
        Self {
            action,
            timestamp: Utc::now(),
            success: true,
            message,
            error: None,
            duration_ms,
        }
    }

    pub fn failure(action: Action, error: String, duration_ms: u64) -> Self {
        Self {
            action,
            timestamp: Utc::now(),
            success: false,
            message: None,
            error: Some(error),
            duration_ms,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::SwitchView { group, view } => {
                write!(f, "Switch to view '{}' in '{}'", view, group)
            }
            Action::RefreshView { view } => write!(f, "Refresh view '{}'", view),
            Action::CopyCell { view, row, col } => {
                write!(f, "Copy cell ({}, {}) of '{}'", row, col, view)
            }
        }
    }
}
