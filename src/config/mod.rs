use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub mod duration;

pub use duration::{parse_duration, DurationError};

/// Interval used when neither the view, its group nor the global setting
/// provide a usable value.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Postgres,
    #[serde(alias = "duck")]
    DuckDb,
}

/// What to do with result rows whose cell count differs from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum RowShapePolicy {
    /// Silently drop the offending rows (logged with a count).
    #[default]
    #[serde(rename = "drop")]
    DropMismatched,
    /// Fail the whole tick.
    #[serde(rename = "reject")]
    Reject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub driver: Driver,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    pub title: String,
    pub query: String,
    #[serde(rename = "refreshTimeout", alias = "refreshInterval", default)]
    pub refresh_interval: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub title: String,
    #[serde(rename = "tabs", alias = "views", default)]
    pub views: Vec<ViewConfig>,
    #[serde(rename = "refreshTimeout", alias = "refreshInterval", default)]
    pub refresh_interval: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(rename = "areas", alias = "groups", default)]
    pub groups: Vec<GroupConfig>,
    #[serde(rename = "refreshTimeout", alias = "refreshInterval", default)]
    pub refresh_interval: Option<String>,
    #[serde(rename = "defaultConnection", alias = "connection")]
    pub connection: ConnectionConfig,
    #[serde(rename = "rowShapePolicy", default)]
    pub row_shape_policy: RowShapePolicy,
}

impl MonitorConfig {
    pub fn from_json(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig =
            serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut view_count = 0;
        for group in &self.groups {
            for view in &group.views {
                if view.query.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "view '{}' in group '{}' has an empty query",
                        view.title, group.title
                    )));
                }
                view_count += 1;
            }
        }
        if view_count == 0 {
            return Err(ConfigError::Invalid(
                "no views configured; add at least one tab with a query".to_string(),
            ));
        }
        Ok(())
    }

    /// The global default interval, falling back to one minute.
    pub fn default_interval(&self) -> Duration {
        resolve_global(self.refresh_interval.as_deref())
    }

    pub fn view_count(&self) -> usize {
        self.groups.iter().map(|g| g.views.len()).sum()
    }
}

/// Find the configuration file: an explicit path wins, then `config.json`
/// in the working directory, then the per-user config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|dir| dir.join("sqlmon").join(DEFAULT_CONFIG_FILE))
        .filter(|candidate| candidate.exists())
        .unwrap_or(local)
}

pub fn load(path: &Path) -> Result<MonitorConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = MonitorConfig::from_json(path, &contents)?;
    info!(
        "Loaded configuration from {} ({} groups, {} views)",
        path.display(),
        config.groups.len(),
        config.view_count()
    );
    Ok(config)
}

fn resolve_global(raw: Option<&str>) -> Duration {
    parse_or_default(raw.unwrap_or(""), FALLBACK_INTERVAL)
}

fn parse_or_default(raw: &str, default: Duration) -> Duration {
    if raw.trim().is_empty() {
        return default;
    }
    match parse_duration(raw) {
        Ok(duration) => duration,
        Err(e) => {
            warn!("Invalid duration '{}', using default {:?}: {}", raw, default, e);
            default
        }
    }
}

/// Resolve the refresh period of one view: view override, then group, then
/// the global default, then one minute. Always strictly positive.
pub fn effective_interval(
    view: Option<&str>,
    group: Option<&str>,
    global: Option<&str>,
) -> Duration {
    let default = resolve_global(global);

    let chosen = [view, group]
        .into_iter()
        .flatten()
        .find(|raw| !raw.trim().is_empty());

    match chosen {
        Some(raw) => parse_or_default(raw, default),
        None => default,
    }
}
