use std::sync::Mutex;

use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::{Connection, Row};
use postgres::types::Type;
use postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::debug;

use super::{ConnectionError, QueryError, QuerySource, RawResultSet, NULL_SENTINEL};
use crate::config::ConnectionConfig;

/// PostgreSQL through the simple-query protocol, which hands every value
/// back in its text representation.
pub struct PostgresSource {
    client: Mutex<Client>,
    target: String,
}

impl PostgresSource {
    pub fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let target = format!(
            "postgres://{}@{}:{}/{}",
            config.user, config.host, config.port, config.database
        );
        let client = Client::connect(&connection_string(config), NoTls).map_err(|e| {
            ConnectionError::Connect {
                target: target.clone(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            client: Mutex::new(client),
            target,
        })
    }
}

fn connection_string(config: &ConnectionConfig) -> String {
    let mut parts = Vec::new();
    for (key, value) in [
        ("host", &config.host),
        ("port", &config.port),
        ("user", &config.user),
        ("password", &config.password),
        ("dbname", &config.database),
    ] {
        if !value.is_empty() {
            parts.push(format!("{key}={}", quote_conninfo(value)));
        }
    }
    parts.push("sslmode=disable".to_string());
    parts.join(" ")
}

fn quote_conninfo(value: &str) -> String {
    if value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\') {
        let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
        format!("'{escaped}'")
    } else {
        value.to_string()
    }
}

impl QuerySource for PostgresSource {
    fn fetch(&self, sql: &str) -> Result<RawResultSet, QueryError> {
        let mut client = self
            .client
            .lock()
            .map_err(|_| QueryError::Execution("connection lock poisoned".to_string()))?;

        // Text values are rendered per column type. Strings holding several
        // statements cannot be prepared and are shown as sent.
        let types: Vec<Type> = match client.prepare(sql) {
            Ok(statement) => statement.columns().iter().map(|c| c.type_().clone()).collect(),
            Err(e) => {
                debug!("Cannot describe query on {}: {}", self.target, e);
                Vec::new()
            }
        };

        let messages = client
            .simple_query(sql)
            .map_err(|e| QueryError::Execution(e.to_string()))?;
        drop(client);

        let mut result = RawResultSet::default();
        let mut described = false;
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(columns) => {
                    if !described {
                        result.columns = columns.iter().map(|c| c.name().to_string()).collect();
                        described = true;
                    }
                }
                SimpleQueryMessage::Row(row) => {
                    if !described {
                        result.columns =
                            row.columns().iter().map(|c| c.name().to_string()).collect();
                        described = true;
                    }
                    let mut cells = Vec::with_capacity(row.len());
                    for index in 0..row.len() {
                        let value = row
                            .try_get(index)
                            .map_err(|e| QueryError::Decode(e.to_string()))?;
                        cells.push(render_pg_value(types.get(index), value));
                    }
                    result.rows.push(cells);
                }
                // Only the first statement's result set is shown.
                SimpleQueryMessage::CommandComplete(_) => {
                    if described {
                        break;
                    }
                }
                _ => {}
            }
        }

        debug!("{} returned {} rows", self.target, result.rows.len());
        Ok(result)
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

/// Render one simple-query cell. `bytea` arrives hex encoded and is shown
/// as its bytes decoded as UTF-8; booleans arrive as `t`/`f`.
fn render_pg_value(ty: Option<&Type>, raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return NULL_SENTINEL.to_string();
    };
    match ty {
        Some(ty) if *ty == Type::BYTEA => decode_bytea(raw),
        Some(ty) if *ty == Type::BOOL => match raw {
            "t" => "true".to_string(),
            "f" => "false".to_string(),
            other => other.to_string(),
        },
        _ => raw.to_string(),
    }
}

fn decode_bytea(raw: &str) -> String {
    let Some(hex) = raw.strip_prefix("\\x") else {
        return raw.to_string();
    };
    if hex.len() % 2 != 0 {
        return raw.to_string();
    }
    let bytes: Option<Vec<u8>> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect();
    match bytes {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => raw.to_string(),
    }
}

/// DuckDB file or in-memory database.
pub struct DuckDbSource {
    connection: Mutex<Connection>,
    target: String,
}

impl DuckDbSource {
    pub fn open(path: &str) -> Result<Self, ConnectionError> {
        let (connection, target) = if path.is_empty() || path == ":memory:" {
            (Connection::open_in_memory(), "duckdb (in-memory)".to_string())
        } else {
            (Connection::open(path), format!("duckdb ({path})"))
        };

        let connection = connection.map_err(|e| ConnectionError::Connect {
            target: target.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            connection: Mutex::new(connection),
            target,
        })
    }

    /// Run statements that produce no result set, such as fixtures.
    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<(), QueryError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| QueryError::Execution("connection lock poisoned".to_string()))?;
        connection
            .execute_batch(sql)
            .map_err(|e| QueryError::Execution(e.to_string()))
    }
}

impl QuerySource for DuckDbSource {
    fn fetch(&self, sql: &str) -> Result<RawResultSet, QueryError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| QueryError::Execution("connection lock poisoned".to_string()))?;

        let mut stmt = connection
            .prepare(sql)
            .map_err(|e| QueryError::Execution(e.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| QueryError::Execution(e.to_string()))?;

        // Column metadata is only available once the statement has run
        let columns: Vec<String> = match rows.as_ref() {
            Some(stmt) => (0..stmt.column_count())
                .map(|i| {
                    stmt.column_name(i)
                        .map(|name| name.to_string())
                        .unwrap_or_else(|_| format!("column_{i}"))
                })
                .collect(),
            None => Vec::new(),
        };

        let mut result_rows = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| QueryError::Execution(e.to_string()))?
        {
            let mut cells = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                cells.push(format_duck_value(row, index)?);
            }
            result_rows.push(cells);
        }

        Ok(RawResultSet {
            columns,
            rows: result_rows,
        })
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

fn format_duck_value(row: &Row, index: usize) -> Result<String, QueryError> {
    let value = row
        .get_ref(index)
        .map_err(|e| QueryError::Decode(e.to_string()))?;

    let text = match value {
        ValueRef::Null => NULL_SENTINEL.to_string(),
        ValueRef::Boolean(b) => b.to_string(),
        ValueRef::TinyInt(i) => i.to_string(),
        ValueRef::SmallInt(i) => i.to_string(),
        ValueRef::Int(i) => i.to_string(),
        ValueRef::BigInt(i) => i.to_string(),
        ValueRef::HugeInt(i) => i.to_string(),
        ValueRef::UTinyInt(i) => i.to_string(),
        ValueRef::USmallInt(i) => i.to_string(),
        ValueRef::UInt(i) => i.to_string(),
        ValueRef::UBigInt(i) => i.to_string(),
        ValueRef::Float(f) => format_float(f as f64),
        ValueRef::Double(f) => format_float(f),
        ValueRef::Decimal(d) => d.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| days.to_string()),
        ValueRef::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(|ts| ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
                .unwrap_or_else(|| raw.to_string())
        }
        other => format!("{:?}", other.to_owned()),
    };
    Ok(text)
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v.is_sign_positive() { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        v.to_string()
    }
}
