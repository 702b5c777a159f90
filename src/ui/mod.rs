use std::collections::HashMap;

use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs},
    Frame,
};
use tracing::warn;

use crate::actions::ActionLogger;
use crate::app::state::{ApplicationState, NotificationType, Viewport};
use crate::monitor::{
    CellRef, ClipboardService, ClipboardSink, DisplayBuffer, RefreshHandle, SelectionTracker,
    SystemClipboard, UiReceiver, ViewId, ViewRegistry,
};
use crate::workflows::MonitorWorkflows;

const PAGE_ROWS: isize = 10;

pub struct App<C: ClipboardSink = SystemClipboard> {
    state: ApplicationState,
    registry: ViewRegistry,
    receiver: UiReceiver<ViewRegistry>,
    handles: HashMap<ViewId, RefreshHandle>,
    selection: SelectionTracker,
    clipboard: ClipboardService<C>,
    action_logger: ActionLogger,
}

impl<C: ClipboardSink> App<C> {
    pub fn new(
        registry: ViewRegistry,
        receiver: UiReceiver<ViewRegistry>,
        handles: HashMap<ViewId, RefreshHandle>,
        clipboard: C,
        action_logger: ActionLogger,
    ) -> Self {
        Self {
            state: ApplicationState::new(&registry),
            registry,
            receiver,
            handles,
            selection: SelectionTracker::new(),
            clipboard: ClipboardService::new(clipboard),
            action_logger,
        }
    }

    /// Apply every update the refreshers posted since the last frame.
    pub fn sync(&mut self) -> usize {
        self.receiver.drain(&mut self.registry)
    }

    pub fn update_notifications(&mut self) {
        self.state.remove_expired_notifications();
    }

    fn active_view(&self) -> Option<ViewId> {
        self.state.active_view_id(&self.registry)
    }

    fn workflows(&mut self) -> MonitorWorkflows<'_> {
        MonitorWorkflows::new(&self.registry, &mut self.action_logger, &mut self.state)
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                let result = self.workflows().switch_group(index);
                if let Err(e) = result {
                    self.state.show_error(e.to_string());
                }
            }
            KeyCode::Tab => self.workflows().next_view(),
            KeyCode::BackTab => self.workflows().prev_view(),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1, 0),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1, 0),
            KeyCode::Left | KeyCode::Char('h') => self.move_selection(0, -1),
            KeyCode::Right | KeyCode::Char('l') => self.move_selection(0, 1),
            KeyCode::PageUp => self.move_selection(-PAGE_ROWS, 0),
            KeyCode::PageDown => self.move_selection(PAGE_ROWS, 0),
            KeyCode::Esc => {
                if let Some(view) = self.active_view() {
                    self.selection.deselect(view);
                }
            }
            KeyCode::Char('r') => self.refresh_active(),
            KeyCode::Char('y') | KeyCode::Char('c') => self.copy_active(),
            KeyCode::Char('?') => self.state.show_help = !self.state.show_help,
            _ => {}
        }
    }

    fn refresh_active(&mut self) {
        let Some(view) = self.active_view() else {
            return;
        };
        let result = MonitorWorkflows::new(&self.registry, &mut self.action_logger, &mut self.state)
            .refresh_view(view, &self.handles);
        if let Err(e) = result {
            warn!("Manual refresh failed: {:#}", e);
            self.state.show_error(e.to_string());
        }
    }

    fn copy_active(&mut self) {
        let Some(view) = self.active_view() else {
            return;
        };
        let mut workflows =
            MonitorWorkflows::new(&self.registry, &mut self.action_logger, &mut self.state);
        // Failures are already surfaced as a notification
        let _ = workflows.copy_selection(view, &self.selection, &mut self.clipboard);
    }

    /// Move the highlighted cell, starting at the first data cell when
    /// nothing is selected yet. Row 0 is the header and can be selected.
    fn move_selection(&mut self, d_row: isize, d_col: isize) {
        let Some(view) = self.active_view() else {
            return;
        };
        let Some(buffer) = self.registry.buffer(view) else {
            return;
        };
        let (rows, cols) = buffer.dimensions();
        if rows == 0 || cols == 0 {
            return;
        }

        let next = match self.selection.selection(view) {
            Some(current) => CellRef::new(
                offset_clamped(current.row, d_row, rows),
                offset_clamped(current.col, d_col, cols),
            ),
            None => CellRef::new(if rows > 1 { 1 } else { 0 }, 0),
        };
        self.selection.select(view, next.row, next.col);
    }

    pub fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Group tabs
                Constraint::Length(1), // View tabs
                Constraint::Min(0),    // Table
                Constraint::Length(3), // Status bar
            ])
            .split(f.area());

        self.render_group_tabs(f, chunks[0]);
        self.render_view_tabs(f, chunks[1]);

        match self.active_view() {
            Some(view) => self.render_view(f, chunks[2], view),
            None => {
                let empty = Paragraph::new("This group has no views")
                    .alignment(Alignment::Center)
                    .block(Block::default().borders(Borders::ALL));
                f.render_widget(empty, chunks[2]);
            }
        }

        self.render_status_bar(f, chunks[3]);
        self.render_notifications(f, f.area());

        if self.state.show_help {
            render_help_popup(f, f.area());
        }
    }

    fn render_group_tabs(&self, f: &mut Frame, area: Rect) {
        let titles: Vec<Line> = self
            .registry
            .groups()
            .iter()
            .enumerate()
            .map(|(i, group)| Line::from(format!("{} {}", i + 1, group.title)))
            .collect();

        let tabs = Tabs::new(titles)
            .select(self.state.active_group)
            .block(Block::default().borders(Borders::ALL).title("SQL Monitor"))
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            );
        f.render_widget(tabs, area);
    }

    fn render_view_tabs(&self, f: &mut Frame, area: Rect) {
        let Some(group) = self.registry.groups().get(self.state.active_group) else {
            return;
        };

        let titles: Vec<Line> = group
            .views
            .iter()
            .filter_map(|id| self.registry.view(*id))
            .map(|slot| {
                let style = if slot.buffer.has_error() {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                Line::styled(slot.spec.title.clone(), style)
            })
            .collect();

        let selected = self
            .state
            .active_view
            .get(self.state.active_group)
            .copied()
            .unwrap_or(0);
        let tabs = Tabs::new(titles)
            .select(selected)
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        f.render_widget(tabs, area);
    }

    fn render_view(&mut self, f: &mut Frame, area: Rect, view: ViewId) {
        let Some(slot) = self.registry.view(view) else {
            return;
        };
        let buffer = &slot.buffer;

        let status_style = if buffer.has_error() {
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(Line::from(slot.spec.title.clone()).style(Style::default().add_modifier(Modifier::BOLD)))
            .title(Line::styled(buffer.status_line(), status_style).right_aligned());

        let (rows, cols) = buffer.dimensions();
        if rows == 0 || cols == 0 {
            let placeholder = Paragraph::new(if buffer.has_error() { "No data" } else { "Waiting for first refresh..." })
                .alignment(Alignment::Center)
                .block(block);
            f.render_widget(placeholder, area);
            return;
        }

        let inner_width = area.width.saturating_sub(2);
        // Borders plus the header row
        let visible_rows = area.height.saturating_sub(3) as usize;
        let selection = self.selection.selection(view);

        let viewport = self.state.viewport_mut(view);
        follow_selection(viewport, selection, buffer, inner_width, visible_rows);
        let viewport = *viewport;

        let columns = visible_columns(buffer.column_widths(), viewport.first_col, inner_width);
        let constraints: Vec<Constraint> = columns
            .iter()
            .map(|&col| Constraint::Length(buffer.column_width(col).unwrap_or(0)))
            .collect();

        let cell_style = |row: usize, col: usize| -> Style {
            match selection {
                Some(sel) if sel.row == row && sel.col == col => Style::default()
                    .bg(Color::Gray)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
                Some(sel) if sel.row == row => Style::default().add_modifier(Modifier::BOLD),
                _ => Style::default(),
            }
        };

        let header_cells: Vec<Cell> = columns
            .iter()
            .map(|&col| {
                let width = buffer.column_width(col).unwrap_or(0) as usize;
                let text = buffer.cell(0, col).unwrap_or("");
                Cell::from(format_cell(text, width))
                    .style(cell_style(0, col).add_modifier(Modifier::BOLD))
            })
            .collect();

        let first_row = viewport.top_row + 1;
        let last_row = (first_row + visible_rows).min(rows);
        let body: Vec<Row> = (first_row..last_row)
            .map(|row| {
                let cells: Vec<Cell> = columns
                    .iter()
                    .map(|&col| {
                        let width = buffer.column_width(col).unwrap_or(0) as usize;
                        let text = buffer.cell(row, col).unwrap_or("");
                        Cell::from(format_cell(text, width)).style(cell_style(row, col))
                    })
                    .collect();
                Row::new(cells)
            })
            .collect();

        let table = Table::new(body, constraints)
            .header(Row::new(header_cells).height(1))
            .block(block)
            .column_spacing(0);

        f.render_widget(table, area);
    }

    fn render_status_bar(&self, f: &mut Frame, area: Rect) {
        let status_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(60), // Key help
                Constraint::Percentage(40), // Table position
            ])
            .split(area);

        let help = Paragraph::new("q quit | 1-9 group | Tab view | arrows select | Esc clear | r refresh | y copy | ? help")
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(help, status_chunks[0]);

        let position = match self.active_view() {
            Some(view) => {
                let (rows, cols) = self
                    .registry
                    .buffer(view)
                    .map_or((0, 0), DisplayBuffer::dimensions);
                let rows = rows.saturating_sub(1);
                match self.selection.selection(view) {
                    Some(cell) => format!("{} rows x {} cols | cell {},{}", rows, cols, cell.row, cell.col),
                    None => format!("{} rows x {} cols", rows, cols),
                }
            }
            None => String::new(),
        };
        let position = Paragraph::new(position)
            .alignment(Alignment::Right)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(position, status_chunks[1]);
    }

    fn render_notifications(&self, f: &mut Frame, area: Rect) {
        // Only show the most recent notification to avoid overlap
        let Some(notification) = self.state.notifications.last() else {
            return;
        };

        let notification_width = (area.width as f32 * 0.6) as u16;
        let notification_area = Rect {
            x: (area.width.saturating_sub(notification_width)) / 2,
            y: area.height.saturating_sub(7),
            width: notification_width,
            height: 3.min(area.height),
        };

        let border_color = match notification.notification_type {
            NotificationType::Success => Color::Green,
            NotificationType::Error => Color::Red,
            NotificationType::Info => Color::Blue,
        };

        let available_width = notification_width.saturating_sub(4) as usize;
        let notification_widget = Paragraph::new(truncate_text(&notification.message, available_width))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(border_color).add_modifier(Modifier::BOLD)),
            )
            .style(Style::default().fg(Color::White).bg(Color::Black).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center);

        f.render_widget(Clear, notification_area);
        f.render_widget(notification_widget, notification_area);
    }
}

fn render_help_popup(f: &mut Frame, area: Rect) {
    let lines = [
        "1-9          switch group",
        "Tab / S-Tab  next / previous view",
        "arrows hjkl  move selection",
        "PgUp / PgDn  move selection by a page",
        "Esc          clear selection",
        "r            refresh the view now",
        "y / c        copy the selected cell",
        "q / Ctrl-C   quit",
    ];
    let width = 44.min(area.width);
    let height = (lines.len() as u16 + 2).min(area.height);
    let popup = Rect {
        x: area.width.saturating_sub(width) / 2,
        y: area.height.saturating_sub(height) / 2,
        width,
        height,
    };

    let text: Vec<Line> = lines.iter().map(|l| Line::from(*l)).collect();
    let widget = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Keys"));
    f.render_widget(Clear, popup);
    f.render_widget(widget, popup);
}

fn offset_clamped(value: usize, delta: isize, len: usize) -> usize {
    let max = len.saturating_sub(1) as isize;
    (value as isize + delta).clamp(0, max) as usize
}

/// Columns that fit into `available` cells starting at `first`. At least
/// one column is always returned when any exist.
fn visible_columns(widths: &[u16], first: usize, available: u16) -> Vec<usize> {
    let mut used: u32 = 0;
    let mut columns = Vec::new();
    for (col, width) in widths.iter().enumerate().skip(first) {
        if !columns.is_empty() && used + *width as u32 > available as u32 {
            break;
        }
        used += *width as u32;
        columns.push(col);
    }
    columns
}

/// Scroll `viewport` so the selected cell is on screen and stays within
/// the current buffer.
fn follow_selection(
    viewport: &mut Viewport,
    selection: Option<CellRef>,
    buffer: &DisplayBuffer,
    inner_width: u16,
    visible_rows: usize,
) {
    let (rows, cols) = buffer.dimensions();
    let data_rows = rows.saturating_sub(1);

    if let Some(cell) = selection.filter(|c| c.row < rows && c.col < cols) {
        if cell.row >= 1 && visible_rows > 0 {
            let data_index = cell.row - 1;
            if data_index < viewport.top_row {
                viewport.top_row = data_index;
            } else if data_index >= viewport.top_row + visible_rows {
                viewport.top_row = data_index + 1 - visible_rows;
            }
        }

        if cell.col < viewport.first_col {
            viewport.first_col = cell.col;
        }
        while viewport.first_col < cell.col
            && !visible_columns(buffer.column_widths(), viewport.first_col, inner_width)
                .contains(&cell.col)
        {
            viewport.first_col += 1;
        }
    }

    viewport.top_row = viewport.top_row.min(data_rows.saturating_sub(1));
    viewport.first_col = viewport.first_col.min(cols.saturating_sub(1));
}

/// A cell's text with a leading space, cut to fit `width`.
fn format_cell(text: &str, width: usize) -> String {
    truncate_text(&format!(" {text}"), width.saturating_sub(1))
}

fn truncate_text(text: &str, max_width: usize) -> String {
    if max_width <= 3 {
        return text.chars().take(max_width).collect();
    }

    // Count characters, not bytes, for proper Unicode handling
    let char_count = text.chars().count();
    if char_count <= max_width {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_width.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

/// Plain-text rendering of a view for non-interactive output.
pub fn render_plain(title: &str, buffer: &DisplayBuffer) -> String {
    let mut out = format!("== {} [{}]\n", title, buffer.status_line());
    for row in buffer.rows() {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(col, text)| {
                let width = buffer.column_width(col).unwrap_or(0) as usize;
                format!("{:<width$}", format!(" {text}"))
            })
            .collect();
        out.push_str(line.concat().trim_end());
        out.push('\n');
    }
    out
}
