use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::actions::{Action, ActionLogger};
use crate::app::state::ApplicationState;
use crate::monitor::{
    ClipboardService, ClipboardSink, CopyOutcome, RefreshHandle, SelectionTracker, ViewId,
    ViewRegistry,
};

/// User-triggered operations on the live views, each recorded in the
/// action log.
pub struct MonitorWorkflows<'a> {
    pub registry: &'a ViewRegistry,
    pub action_logger: &'a mut ActionLogger,
    pub state: &'a mut ApplicationState,
}

impl<'a> MonitorWorkflows<'a> {
    pub fn new(
        registry: &'a ViewRegistry,
        action_logger: &'a mut ActionLogger,
        state: &'a mut ApplicationState,
    ) -> Self {
        Self {
            registry,
            action_logger,
            state,
        }
    }

    fn view_title(&self, view: ViewId) -> String {
        self.registry
            .view(view)
            .map(|slot| slot.spec.title.clone())
            .unwrap_or_else(|| view.to_string())
    }

    /// Focus a group by index, keeping its previously focused view
    pub fn switch_group(&mut self, index: usize) -> Result<()> {
        if !self.state.select_group(self.registry, index) {
            return Err(anyhow::anyhow!("No group number {}", index + 1));
        }
        self.log_switch();
        Ok(())
    }

    pub fn next_view(&mut self) {
        self.state.next_view(self.registry);
        self.log_switch();
    }

    pub fn prev_view(&mut self) {
        self.state.prev_view(self.registry);
        self.log_switch();
    }

    fn log_switch(&mut self) {
        let group = self
            .registry
            .groups()
            .get(self.state.active_group)
            .map(|g| g.title.clone())
            .unwrap_or_default();
        let view = self
            .state
            .active_view_id(self.registry)
            .map(|id| self.view_title(id))
            .unwrap_or_default();

        let tracker = self.action_logger.start_action(Action::SwitchView { group, view });
        self.action_logger.complete_action(tracker, &Ok::<(), anyhow::Error>(()));
    }

    /// Ask a view's loop to tick now, out of band
    pub fn refresh_view(
        &mut self,
        view: ViewId,
        handles: &HashMap<ViewId, RefreshHandle>,
    ) -> Result<()> {
        let title = self.view_title(view);
        let tracker = self.action_logger.start_action(Action::RefreshView {
            view: title.clone(),
        });
        let result = match handles.get(&view) {
            Some(handle) => {
                handle.request_refresh();
                self.state.show_info(format!("Refreshing {title}"));
                Ok(())
            }
            None => Err(anyhow::anyhow!("No refresher running for '{title}'")),
        };
        self.action_logger.complete_action(tracker, &result);
        result
    }

    /// Copy the focused view's selected cell. An empty or stale selection
    /// does nothing.
    pub fn copy_selection<C: ClipboardSink>(
        &mut self,
        view: ViewId,
        tracker: &SelectionTracker,
        clipboard: &mut ClipboardService<C>,
    ) -> Result<()> {
        let Some(cell) = tracker.selection(view) else {
            debug!("Copy requested with nothing selected in {}", view);
            return Ok(());
        };

        let action = Action::CopyCell {
            view: self.view_title(view),
            row: cell.row,
            col: cell.col,
        };

        match clipboard.copy_active_selection(view, tracker, self.registry) {
            CopyOutcome::Copied(text) => {
                let action_tracker = self.action_logger.start_action(action);
                let chars = text.chars().count();
                self.state.show_success(format!(
                    "Copied {} char{}",
                    chars,
                    if chars == 1 { "" } else { "s" }
                ));
                self.action_logger
                    .complete_action(action_tracker, &Ok::<(), anyhow::Error>(()));
                Ok(())
            }
            CopyOutcome::NothingSelected | CopyOutcome::OutOfRange => Ok(()),
            CopyOutcome::ClipboardUnavailable(message) => {
                let action_tracker = self.action_logger.start_action(action);
                let result = Err(anyhow::anyhow!(message.clone()));
                self.action_logger.complete_action::<()>(action_tracker, &result);
                self.state.show_error(message);
                result
            }
        }
    }
}
