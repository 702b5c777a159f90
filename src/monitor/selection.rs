use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{ViewId, ViewRegistry};

/// A cell position in a view's buffer. Row 0 is the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Remembers the highlighted cell of every view independently.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    selections: HashMap<ViewId, CellRef>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, view: ViewId, row: usize, col: usize) {
        self.selections.insert(view, CellRef::new(row, col));
    }

    pub fn deselect(&mut self, view: ViewId) {
        self.selections.remove(&view);
    }

    pub fn selection(&self, view: ViewId) -> Option<CellRef> {
        self.selections.get(&view).copied()
    }
}

/// Somewhere copied text can go.
pub trait ClipboardSink {
    fn set_text(&mut self, text: &str) -> Result<()>;
}

/// The system clipboard. Opened on first use and kept open, since on some
/// platforms the contents disappear with the handle.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        if self.inner.is_none() {
            self.inner = Some(arboard::Clipboard::new().context("Clipboard unavailable")?);
        }
        let clipboard = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Clipboard unavailable"))?;
        clipboard
            .set_text(text.to_string())
            .context("Failed to copy to clipboard")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied(String),
    NothingSelected,
    /// The selection points past the buffer, e.g. after a refresh shrank it.
    OutOfRange,
    ClipboardUnavailable(String),
}

pub struct ClipboardService<C> {
    sink: C,
}

impl<C: ClipboardSink> ClipboardService<C> {
    pub fn new(sink: C) -> Self {
        Self { sink }
    }

    /// Copy the focused view's selected cell. Never fails: an empty or
    /// stale selection is simply not copied.
    pub fn copy_active_selection(
        &mut self,
        active: ViewId,
        tracker: &SelectionTracker,
        registry: &ViewRegistry,
    ) -> CopyOutcome {
        let Some(cell) = tracker.selection(active) else {
            return CopyOutcome::NothingSelected;
        };

        // Bounds are re-checked here because the buffer may have been
        // replaced since the cell was selected.
        let Some(text) = registry
            .buffer(active)
            .and_then(|buffer| buffer.cell(cell.row, cell.col))
        else {
            debug!("Selection {:?} in {} is out of range, nothing copied", cell, active);
            return CopyOutcome::OutOfRange;
        };

        match self.sink.set_text(text) {
            Ok(()) => CopyOutcome::Copied(text.to_string()),
            Err(e) => {
                warn!("Copy from {} failed: {:#}", active, e);
                CopyOutcome::ClipboardUnavailable(format!("{e:#}"))
            }
        }
    }

    #[cfg(test)]
    pub fn sink(&self) -> &C {
        &self.sink
    }
}
