use std::collections::HashMap;

use crate::monitor::{ViewId, ViewRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationType {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub notification_type: NotificationType,
    pub timestamp: std::time::Instant,
    pub duration_secs: u64,
}

impl Notification {
    pub fn success(message: String) -> Self {
        Self {
            message,
            notification_type: NotificationType::Success,
            timestamp: std::time::Instant::now(),
            duration_secs: 2,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            message,
            notification_type: NotificationType::Error,
            timestamp: std::time::Instant::now(),
            duration_secs: 5, // Errors stay longer
        }
    }

    pub fn info(message: String) -> Self {
        Self {
            message,
            notification_type: NotificationType::Info,
            timestamp: std::time::Instant::now(),
            duration_secs: 2,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.timestamp.elapsed().as_secs() >= self.duration_secs
    }
}

/// First visible data row and column of a view's table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub top_row: usize,
    pub first_col: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationState {
    pub active_group: usize,
    /// Position of the focused view inside each group
    pub active_view: Vec<usize>,
    pub notifications: Vec<Notification>,
    pub viewports: HashMap<ViewId, Viewport>,
    pub show_help: bool,
}

impl ApplicationState {
    pub fn new(registry: &ViewRegistry) -> Self {
        Self {
            active_group: 0,
            active_view: vec![0; registry.groups().len()],
            notifications: Vec::new(),
            viewports: HashMap::new(),
            show_help: false,
        }
    }

    /// The view that currently has focus, if its group has any views.
    pub fn active_view_id(&self, registry: &ViewRegistry) -> Option<ViewId> {
        let group = registry.groups().get(self.active_group)?;
        let position = self.active_view.get(self.active_group).copied().unwrap_or(0);
        group.views.get(position).copied()
    }

    pub fn select_group(&mut self, registry: &ViewRegistry, index: usize) -> bool {
        if index < registry.groups().len() {
            self.active_group = index;
            true
        } else {
            false
        }
    }

    pub fn next_view(&mut self, registry: &ViewRegistry) {
        self.step_view(registry, 1);
    }

    pub fn prev_view(&mut self, registry: &ViewRegistry) {
        let len = self.active_group_len(registry);
        if len > 0 {
            self.step_view(registry, len - 1);
        }
    }

    fn step_view(&mut self, registry: &ViewRegistry, step: usize) {
        let len = self.active_group_len(registry);
        if len == 0 {
            return;
        }
        if let Some(position) = self.active_view.get_mut(self.active_group) {
            *position = (*position + step) % len;
        }
    }

    fn active_group_len(&self, registry: &ViewRegistry) -> usize {
        registry
            .groups()
            .get(self.active_group)
            .map_or(0, |group| group.views.len())
    }

    pub fn viewport_mut(&mut self, view: ViewId) -> &mut Viewport {
        self.viewports.entry(view).or_default()
    }

    // Notification system methods
    pub fn add_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn show_success(&mut self, message: String) {
        self.add_notification(Notification::success(message));
    }

    pub fn show_error(&mut self, message: String) {
        self.add_notification(Notification::error(message));
    }

    pub fn show_info(&mut self, message: String) {
        self.add_notification(Notification::info(message));
    }

    pub fn remove_expired_notifications(&mut self) {
        self.notifications.retain(|n| !n.is_expired());
    }
}
