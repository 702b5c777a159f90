//! Live views: the per-view buffers, the loops that refresh them and the
//! bridge that carries their results onto the render thread.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{effective_interval, MonitorConfig};

pub mod bridge;
pub mod buffer;
pub mod refresh;
pub mod selection;
pub mod sizer;

pub use bridge::{UiReceiver, UiSender};
pub use buffer::{BufferSnapshot, DisplayBuffer, RefreshOutcome};
pub use refresh::{RefreshHandle, RefreshLoop};
pub use selection::{CellRef, ClipboardService, ClipboardSink, CopyOutcome, SelectionTracker, SystemClipboard};
pub use sizer::{compute_widths, TerminalMeasure, TextMeasure};

/// Stable identifier of a view, assigned once at startup in configuration
/// order. Titles are not unique, ids are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(usize);

impl ViewId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Immutable description of one view, shared with its refresh loop.
#[derive(Debug, Clone)]
pub struct ViewSpec {
    pub id: ViewId,
    pub group_title: String,
    pub title: String,
    pub query: String,
    pub interval: Duration,
}

pub struct ViewSlot {
    pub spec: Arc<ViewSpec>,
    pub buffer: DisplayBuffer,
}

#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub title: String,
    pub views: Vec<ViewId>,
}

/// Every configured view, indexed by [`ViewId`]. Owned by the render thread.
#[derive(Default)]
pub struct ViewRegistry {
    groups: Vec<GroupEntry>,
    slots: Vec<ViewSlot>,
}

impl ViewRegistry {
    pub fn from_config(config: &MonitorConfig) -> Self {
        let mut registry = Self::default();
        let global = config.refresh_interval.as_deref();

        for group in &config.groups {
            let mut entry = GroupEntry {
                title: group.title.clone(),
                views: Vec::with_capacity(group.views.len()),
            };
            for view in &group.views {
                let interval = effective_interval(
                    view.refresh_interval.as_deref(),
                    group.refresh_interval.as_deref(),
                    global,
                );
                let id = registry.push_view(ViewSpec {
                    id: ViewId::new(0),
                    group_title: group.title.clone(),
                    title: view.title.clone(),
                    query: view.query.clone(),
                    interval,
                });
                entry.views.push(id);
            }
            registry.groups.push(entry);
        }
        registry
    }

    fn push_view(&mut self, mut spec: ViewSpec) -> ViewId {
        let id = ViewId::new(self.slots.len());
        spec.id = id;
        self.slots.push(ViewSlot {
            spec: Arc::new(spec),
            buffer: DisplayBuffer::new(),
        });
        id
    }

    /// Register a standalone view in its own group.
    #[cfg(test)]
    pub fn with_view(title: &str, query: &str, interval: Duration) -> (Self, ViewId) {
        let mut registry = Self::default();
        let id = registry.push_view(ViewSpec {
            id: ViewId::new(0),
            group_title: title.to_string(),
            title: title.to_string(),
            query: query.to_string(),
            interval,
        });
        registry.groups.push(GroupEntry {
            title: title.to_string(),
            views: vec![id],
        });
        (registry, id)
    }

    pub fn groups(&self) -> &[GroupEntry] {
        &self.groups
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<ViewSpec>> {
        self.slots.iter().map(|slot| &slot.spec)
    }

    pub fn view(&self, id: ViewId) -> Option<&ViewSlot> {
        self.slots.get(id.index())
    }

    pub fn buffer(&self, id: ViewId) -> Option<&DisplayBuffer> {
        self.slots.get(id.index()).map(|slot| &slot.buffer)
    }

    pub fn buffer_mut(&mut self, id: ViewId) -> Option<&mut DisplayBuffer> {
        self.slots.get_mut(id.index()).map(|slot| &mut slot.buffer)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
