use std::io;

pub mod state;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    cursor::Show,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::actions::ActionLogger;
use crate::config::MonitorConfig;
use crate::db::{QueryExecutor, SharedSource};
use crate::monitor::{bridge, refresh, ClipboardSink, RefreshLoop, SystemClipboard, TerminalMeasure, ViewRegistry};
use crate::ui::{self, App};

/// The runtime the refreshers live on. Dropping it abandons in-flight
/// blocking queries instead of waiting for them.
struct RefreshRuntime {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl RefreshRuntime {
    fn start() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("sqlmon-refresh")
            .build()
            .context("Failed to start the refresh runtime")?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for RefreshRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Raw mode plus the alternate screen, undone on drop.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let guard = TerminalGuard;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
    }
}

/// Run the interactive monitor until the user quits.
pub fn run(config: &MonitorConfig, source: SharedSource, action_log: &Path) -> Result<()> {
    let runtime = RefreshRuntime::start()?;

    let registry = ViewRegistry::from_config(config);
    let (sender, receiver) = bridge::channel();
    let executor = Arc::new(QueryExecutor::new(source, config.row_shape_policy));
    let (handles, _tasks) = refresh::spawn_all(
        &registry,
        executor,
        Arc::new(TerminalMeasure),
        &sender,
        runtime.handle(),
    );
    drop(sender);

    let action_logger = ActionLogger::new(action_log).unwrap_or_else(|e| {
        warn!("Action log disabled, cannot open {}: {:#}", action_log.display(), e);
        ActionLogger::disabled()
    });
    if let Some(path) = action_logger.log_file_path() {
        info!("Recording user actions to {}", path.display());
    }
    let mut app = App::new(registry, receiver, handles, SystemClipboard::new(), action_logger);

    let guard = TerminalGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    let result = run_app(&mut terminal, &mut app);

    drop(guard);
    drop(runtime);
    info!("Monitor stopped");

    Ok(result?)
}

fn run_app<B: ratatui::backend::Backend, C: ClipboardSink>(
    terminal: &mut Terminal<B>,
    app: &mut App<C>,
) -> io::Result<()> {
    loop {
        app.sync();
        // Clean up expired notifications
        app.update_notifications();

        terminal.draw(|f| app.render(f))?;

        // Use polling with timeout so refresh results and notifications show up
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => break,
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                        _ => app.handle_key(key),
                    }
                }
            }
        }
    }
    Ok(())
}

/// Refresh every view once and render the results as plain text. The
/// flag is false when any view ended in an error.
pub fn run_once(config: &MonitorConfig, source: SharedSource) -> Result<(String, bool)> {
    let mut registry = ViewRegistry::from_config(config);
    if registry.is_empty() {
        return Ok((String::new(), true));
    }
    let runtime = RefreshRuntime::start()?;
    let (sender, mut receiver) = bridge::channel();
    let executor = Arc::new(QueryExecutor::new(source, config.row_shape_policy));
    let measure: refresh::SharedMeasure = Arc::new(TerminalMeasure);

    runtime.handle().block_on(async {
        let mut ticks = JoinSet::new();
        for spec in registry.specs() {
            let refresh = RefreshLoop::new(
                Arc::clone(spec),
                Arc::clone(&executor),
                Arc::clone(&measure),
                sender.clone(),
            );
            ticks.spawn(async move { refresh.tick().await });
        }
        drop(sender);

        while let Some(joined) = ticks.join_next().await {
            if let Err(e) = joined {
                warn!("Refresh task failed: {}", e);
            }
        }
    });
    receiver.drain(&mut registry);
    drop(runtime);

    let mut output = String::new();
    let mut all_ok = true;
    for spec in registry.specs() {
        if let Some(buffer) = registry.buffer(spec.id) {
            all_ok &= !buffer.has_error();
            output.push_str(&ui::render_plain(&format!("{} / {}", spec.group_title, spec.title), buffer));
            output.push('\n');
        }
    }
    Ok((output, all_ok))
}
