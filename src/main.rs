mod actions;
mod app;
mod config;
mod db;
mod monitor;
mod ui;
mod workflows;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::Parser;
use crossterm::{execute, terminal::{disable_raw_mode, LeaveAlternateScreen}};
use tracing::{error, info};

use actions::logger::DEFAULT_ACTION_LOG;

const DEFAULT_LOG_FILE: &str = "sqlmon.log";
const PANIC_LOG_FILE: &str = "sqlmon-panic.log";

#[derive(Parser)]
#[command(name = "sqlmon")]
#[command(about = "A terminal dashboard that keeps SQL query results refreshed on a schedule")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Refresh every view once, print the results and exit
    #[arg(short = 'I', long = "no-interface")]
    no_interface: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Where diagnostic logs are written
    #[arg(long, value_name = "FILE", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Where user actions are recorded
    #[arg(long, value_name = "FILE", default_value = DEFAULT_ACTION_LOG)]
    action_log: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_file, args.verbose);

    // Set up panic handler to log to file
    setup_panic_handler();

    info!("Starting sqlmon");

    let config_path = config::resolve_config_path(args.config.as_deref());
    let config = match config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("❌ Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Loaded {} views in {} groups from {}",
        config.view_count(),
        config.groups.len(),
        config_path.display()
    );

    let source = match db::connect(&config.connection) {
        Ok(source) => source,
        Err(e) => {
            error!("Connection failed: {}", e);
            eprintln!("❌ Error connecting to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.no_interface {
        let (output, all_ok) = app::run_once(&config, source)?;
        print!("{output}");
        if !all_ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    app::run(&config, source, &args.action_log)
}

/// Route tracing output to `path`; the terminal belongs to the UI.
fn init_logging(path: &Path, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let file = OpenOptions::new().create(true).append(true).open(path);
    let result = match file {
        Ok(file) => {
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        Err(e) => {
            eprintln!("⚠️  Cannot open log file {}: {}", path.display(), e);
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    if let Err(e) = result {
        eprintln!("⚠️  Logging disabled: {}", e);
    }
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        // Give the terminal back so the message is readable
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), LeaveAlternateScreen);

        let backtrace = std::backtrace::Backtrace::capture();

        let panic_message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        let location = if let Some(location) = panic_info.location() {
            format!("{}:{}:{}", location.file(), location.line(), location.column())
        } else {
            "Unknown location".to_string()
        };

        let panic_log = format!(
            "🚨 PANIC OCCURRED 🚨\n\
            Time: {}\n\
            Message: {}\n\
            Location: {}\n\
            \n\
            Backtrace:\n{}\n\
            \n\
            ================================\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            panic_message,
            location,
            backtrace
        );

        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(PANIC_LOG_FILE)
        {
            let _ = writeln!(file, "{}", panic_log);
        }

        // Also log to stderr for immediate visibility
        eprintln!("{}", panic_log);
    }));
}
