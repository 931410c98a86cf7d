use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode, PgValueFormat};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, Statement, TypeInfo, ValueRef};

use super::{Connector, Session};
use crate::error::{ConnectionError, StatementError};
use crate::models::{ConnectionConfig, ResultSet, SslMode, StatementOutput, Value};
use crate::redact::sanitize_error;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens single `PgConnection`s with a bounded connect timeout.
#[derive(Debug, Clone)]
pub struct PgConnector {
    connect_timeout: Duration,
}

impl Default for PgConnector {
    fn default() -> Self {
        PgConnector {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PgConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(connect_timeout: Duration) -> Self {
        PgConnector { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// Build connect options from a resolved config. Host and user are required here.
fn build_connect_options(config: &ConnectionConfig) -> Result<PgConnectOptions, ConnectionError> {
    let host = config
        .host
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .ok_or(ConnectionError::MissingField("host"))?;
    let user = config
        .user
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or(ConnectionError::MissingField("user"))?;

    let ssl_mode = match config.ssl_mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
    };

    let mut options = PgConnectOptions::new()
        .host(host)
        .port(config.port_or_default())
        .username(user)
        .database(&config.database)
        .ssl_mode(ssl_mode)
        .application_name("sqlrunner")
        // A batch may run the same SQL text before and after DDL that changes
        // its result shape, so nothing is kept between statements.
        .statement_cache_capacity(0);
    if let Some(password) = config.password.as_deref() {
        options = options.password(password);
    }

    // Statements are logged by the executor instead.
    Ok(options.disable_statement_logging())
}

impl PgConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<PgSession, ConnectionError> {
        let options = build_connect_options(config)?;
        info!(
            "Connecting to {}:{}, DB: {}",
            config.host.as_deref().unwrap_or_default(),
            config.port_or_default(),
            config.database
        );

        let conn = match tokio::time::timeout(
            self.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                let message = sanitize_error(&e.to_string(), config.password.as_deref());
                warn!("Database connection failed: {}", message);
                return Err(ConnectionError::Failed(message));
            }
            Err(_) => {
                warn!("Database connection timed out after {:?}", self.connect_timeout);
                return Err(ConnectionError::Timeout(self.connect_timeout));
            }
        };

        info!("Database connection established");
        Ok(PgSession {
            conn,
            password: config.password.clone(),
        })
    }
}

impl Connector for PgConnector {
    fn open<'a>(
        &'a self,
        config: &'a ConnectionConfig,
    ) -> BoxFuture<'a, Result<Box<dyn Session>, ConnectionError>> {
        async move {
            self.connect(config)
                .await
                .map(|session| Box::new(session) as Box<dyn Session>)
        }
        .boxed()
    }
}

pub struct PgSession {
    conn: PgConnection,
    /// Kept only to scrub it out of error messages
    password: Option<String>,
}

impl PgSession {
    fn sanitize(&self, error: &sqlx::Error) -> String {
        let message = error.to_string();
        // Remove the "error returned from database:" prefix that sqlx adds
        let message = message
            .strip_prefix("error returned from database: ")
            .unwrap_or(&message);
        sanitize_error(message, self.password.as_deref())
    }

    async fn apply_search_path(&mut self, schema: &str) -> Result<(), ConnectionError> {
        let sql = search_path_statement(schema);
        info!("Setting search_path: {}", sql);
        (&mut self.conn)
            .execute(sqlx::raw_sql(&sql))
            .await
            .map_err(|e| ConnectionError::SearchPath(self.sanitize(&e)))?;
        Ok(())
    }

    async fn run_statement(&mut self, statement: &str) -> Result<StatementOutput, StatementError> {
        // Describing the statement tells us whether it has a row shape, even
        // when it ends up returning zero rows.
        let columns: Vec<(String, String)> = (&mut self.conn)
            .prepare(statement)
            .await
            .map_err(|e| StatementError::new(statement, self.sanitize(&e)))?
            .columns()
            .iter()
            .map(|col| (col.name().to_string(), col.type_info().name().to_string()))
            .collect();

        // The simple query protocol: no server-side statement outlives this
        // call, and values arrive in their text form.
        if columns.is_empty() {
            let done = (&mut self.conn)
                .execute(sqlx::raw_sql(statement))
                .await
                .map_err(|e| StatementError::new(statement, self.sanitize(&e)))?;
            return Ok(StatementOutput::Done {
                rows_affected: done.rows_affected(),
            });
        }

        let rows = (&mut self.conn)
            .fetch_all(sqlx::raw_sql(statement))
            .await
            .map_err(|e| StatementError::new(statement, self.sanitize(&e)))?;

        // Take the shape from the rows themselves when there are any
        let columns = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|col| (col.name().to_string(), col.type_info().name().to_string()))
                .collect(),
            None => columns,
        };

        let values = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, (_, data_type))| extract_value(row, i, data_type))
                    .collect()
            })
            .collect();

        Ok(StatementOutput::Rows(ResultSet {
            columns: columns.into_iter().map(|(name, _)| name).collect(),
            rows: values,
        }))
    }
}

impl Session for PgSession {
    fn set_search_path<'a>(
        &'a mut self,
        schema: &'a str,
    ) -> BoxFuture<'a, Result<(), ConnectionError>> {
        self.apply_search_path(schema).boxed()
    }

    fn run<'a>(
        &'a mut self,
        statement: &'a str,
    ) -> BoxFuture<'a, Result<StatementOutput, StatementError>> {
        self.run_statement(statement).boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let this = *self;
        async move {
            if let Err(e) = this.conn.close().await {
                warn!("Error while closing database connection: {}", e);
            }
        }
        .boxed()
    }
}

/// Double-quote an identifier, escaping embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema name as it would be written in SQL: plain names fold to lower case
/// like unquoted identifiers, an explicitly quoted name keeps its case, and
/// anything else is quoted.
fn schema_ident(name: &str) -> String {
    if let Some(inner) = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .filter(|n| !n.is_empty())
    {
        return quote_ident(&inner.replace("\"\"", "\""));
    }

    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if plain {
        name.to_ascii_lowercase()
    } else {
        quote_ident(name)
    }
}

/// `SET search_path` for a schema or comma-separated schema list.
pub fn search_path_statement(schema: &str) -> String {
    let list: Vec<String> = schema
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(schema_ident)
        .collect();

    if list.is_empty() {
        "SET search_path TO public".to_string()
    } else {
        format!("SET search_path TO {}", list.join(", "))
    }
}

/// Render an interval the way psql shows it, e.g. `1 year 2 mons 3 days 04:05:06`
fn format_interval(interval: &PgInterval) -> String {
    fn unit(n: i64, name: &str) -> String {
        format!("{} {}{}", n, name, if n.abs() != 1 { "s" } else { "" })
    }

    let mut parts = Vec::new();
    let years = interval.months / 12;
    let months = interval.months % 12;
    if years != 0 {
        parts.push(unit(years.into(), "year"));
    }
    if months != 0 {
        parts.push(unit(months.into(), "mon"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days.into(), "day"));
    }

    if interval.microseconds != 0 {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros_total = interval.microseconds.unsigned_abs();
        let total_secs = micros_total / 1_000_000;
        let micros = micros_total % 1_000_000;
        let clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            total_secs / 3600,
            (total_secs % 3600) / 60,
            total_secs % 60
        );
        if micros != 0 {
            parts.push(format!("{}.{:06}", clock, micros));
        } else {
            parts.push(clock);
        }
    }

    if parts.is_empty() {
        "00:00:00".to_string()
    } else {
        parts.join(" ")
    }
}

fn float_value(n: f64) -> Value {
    if n.is_finite() {
        Value::Float(n)
    } else {
        Value::Text(n.to_string())
    }
}

/// Extract a value from a row at the given index, keeping its native type
fn extract_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let upper_type = type_name.to_uppercase();
    let type_str = upper_type.as_str();

    // Array types start with underscore internally or end with []
    if type_str.starts_with('_') || type_str.ends_with("[]") {
        return extract_array_value(row, index, type_str);
    }

    match type_str {
        "INT2" | "SMALLINT" => {
            if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
                return v.map(|n| Value::Int(n.into())).unwrap_or(Value::Null);
            }
        }
        "INT4" | "INTEGER" | "SERIAL" => {
            if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
                return v.map(|n| Value::Int(n.into())).unwrap_or(Value::Null);
            }
        }
        "INT8" | "BIGINT" | "BIGSERIAL" => {
            if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
                return v.map(Value::Int).unwrap_or(Value::Null);
            }
        }
        "FLOAT4" | "REAL" => {
            if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
                return v.map(|n| float_value(n.into())).unwrap_or(Value::Null);
            }
        }
        "FLOAT8" | "DOUBLE PRECISION" => {
            if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
                return v.map(float_value).unwrap_or(Value::Null);
            }
        }
        "NUMERIC" | "DECIMAL" => {
            if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(index) {
                return v.map(Value::Decimal).unwrap_or(Value::Null);
            }
        }
        "BOOL" | "BOOLEAN" => {
            if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
                return v.map(Value::Bool).unwrap_or(Value::Null);
            }
        }
        "JSON" | "JSONB" => {
            if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(index) {
                return v.map(Value::Json).unwrap_or(Value::Null);
            }
        }
        "UUID" => {
            if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(index) {
                return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
            }
        }
        "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => {
            if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
                return v.map(Value::Timestamp).unwrap_or(Value::Null);
            }
        }
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => {
            if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
                return v.map(Value::TimestampTz).unwrap_or(Value::Null);
            }
        }
        "DATE" => {
            if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
                return v.map(Value::Date).unwrap_or(Value::Null);
            }
        }
        "TIME" | "TIME WITHOUT TIME ZONE" => {
            if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(index) {
                return v.map(Value::Time).unwrap_or(Value::Null);
            }
        }
        "INET" | "CIDR" => {
            if let Ok(v) = row.try_get::<Option<ipnetwork::IpNetwork>, _>(index) {
                return v
                    .map(|ip| {
                        // Single host addresses print without the prefix length
                        let is_single_host = match ip {
                            ipnetwork::IpNetwork::V4(net) => net.prefix() == 32,
                            ipnetwork::IpNetwork::V6(net) => net.prefix() == 128,
                        };
                        if is_single_host && type_str == "INET" {
                            Value::Text(ip.ip().to_string())
                        } else {
                            Value::Text(ip.to_string())
                        }
                    })
                    .unwrap_or(Value::Null);
            }
        }
        "MACADDR" => {
            if let Ok(v) = row.try_get::<Option<mac_address::MacAddress>, _>(index) {
                return v.map(|mac| Value::Text(mac.to_string())).unwrap_or(Value::Null);
            }
        }
        "BYTEA" => {
            if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
                return v
                    .map(|bytes| Value::Text(format!("\\x{}", hex::encode(bytes))))
                    .unwrap_or(Value::Null);
            }
        }
        "OID" => {
            if let Ok(v) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(index) {
                return v.map(|oid| Value::Int(oid.0.into())).unwrap_or(Value::Null);
            }
        }
        "INTERVAL" => {
            if let Ok(v) = row.try_get::<Option<PgInterval>, _>(index) {
                return v
                    .map(|interval| Value::Text(format_interval(&interval)))
                    .unwrap_or(Value::Null);
            }
        }
        // NaN and out-of-range NUMERIC, MONEY, TIMETZ, geometric, range and
        // user-defined types all come through as the server's text form.
        _ => {}
    }

    // Text-like and anything else the driver can hand back as a string
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }

    raw_text_value(row, index, type_str)
}

fn extract_array_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let base_type = type_name.trim_start_matches('_').trim_end_matches("[]");

    fn array<T>(items: Option<Vec<T>>, f: impl Fn(T) -> Value) -> Value {
        items
            .map(|items| Value::Array(items.into_iter().map(f).collect()))
            .unwrap_or(Value::Null)
    }

    match base_type {
        "INT2" | "SMALLINT" => {
            if let Ok(v) = row.try_get::<Option<Vec<i16>>, _>(index) {
                return array(v, |n| Value::Int(n.into()));
            }
        }
        "INT4" | "INTEGER" => {
            if let Ok(v) = row.try_get::<Option<Vec<i32>>, _>(index) {
                return array(v, |n| Value::Int(n.into()));
            }
        }
        "INT8" | "BIGINT" => {
            if let Ok(v) = row.try_get::<Option<Vec<i64>>, _>(index) {
                return array(v, Value::Int);
            }
        }
        "FLOAT4" | "REAL" => {
            if let Ok(v) = row.try_get::<Option<Vec<f32>>, _>(index) {
                return array(v, |n| float_value(n.into()));
            }
        }
        "FLOAT8" | "DOUBLE PRECISION" => {
            if let Ok(v) = row.try_get::<Option<Vec<f64>>, _>(index) {
                return array(v, float_value);
            }
        }
        "BOOL" | "BOOLEAN" => {
            if let Ok(v) = row.try_get::<Option<Vec<bool>>, _>(index) {
                return array(v, Value::Bool);
            }
        }
        "UUID" => {
            if let Ok(v) = row.try_get::<Option<Vec<uuid::Uuid>>, _>(index) {
                return array(v, |u| Value::Text(u.to_string()));
            }
        }
        "JSON" | "JSONB" => {
            if let Ok(v) = row.try_get::<Option<Vec<serde_json::Value>>, _>(index) {
                return array(v, Value::Json);
            }
        }
        _ => {}
    }

    if let Ok(v) = row.try_get::<Option<Vec<String>>, _>(index) {
        return array(v, Value::Text);
    }

    raw_text_value(row, index, type_name)
}

/// Last resort: the server's text representation of the value.
///
/// Binary-format bytes are never reinterpreted as text; such values are
/// reported by type name instead.
fn raw_text_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Column {} could not be read: {}", index, e);
            return Value::Null;
        }
    };
    if raw.is_null() {
        return Value::Null;
    }

    match (raw.format(), raw.as_str()) {
        (PgValueFormat::Text, Ok(s)) => Value::Text(s.to_string()),
        _ => {
            debug!("No text form for column {} of type {}", index, type_name);
            Value::Text(undecodable_marker(type_name))
        }
    }
}

fn undecodable_marker(type_name: &str) -> String {
    format!("<{} value>", type_name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            host: Some("localhost".into()),
            user: Some("app".into()),
            password: Some("pw".into()),
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn search_path_folds_plain_names_like_sql() {
        assert_eq!(search_path_statement("sales"), "SET search_path TO sales");
        assert_eq!(search_path_statement("Sales"), "SET search_path TO sales");
        assert_eq!(
            search_path_statement(" Sales , public "),
            "SET search_path TO sales, public"
        );
        assert_eq!(search_path_statement(" "), "SET search_path TO public");
    }

    #[test]
    fn search_path_quotes_names_that_need_it() {
        assert_eq!(
            search_path_statement("\"Mixed\""),
            "SET search_path TO \"Mixed\""
        );
        assert_eq!(
            search_path_statement("\"$user\", public"),
            "SET search_path TO \"$user\", public"
        );
        assert_eq!(
            search_path_statement("my-schema"),
            "SET search_path TO \"my-schema\""
        );
        assert_eq!(
            search_path_statement("we\"ird"),
            "SET search_path TO \"we\"\"ird\""
        );
        assert_eq!(
            search_path_statement("x; DROP TABLE users"),
            "SET search_path TO \"x; DROP TABLE users\""
        );
    }

    #[test]
    fn intervals_render_like_psql() {
        let interval = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        assert_eq!(format_interval(&interval(0, 1, 0)), "1 day");
        assert_eq!(
            format_interval(&interval(14, 3, 14_706_000_000)),
            "1 year 2 mons 3 days 04:05:06"
        );
        assert_eq!(format_interval(&interval(0, 0, 1_500_000)), "00:00:01.500000");
        assert_eq!(format_interval(&interval(0, -2, -3_600_000_000)), "-2 days -01:00:00");
        assert_eq!(format_interval(&interval(0, 0, 0)), "00:00:00");
    }

    #[test]
    fn undecodable_values_are_named_not_garbled() {
        assert_eq!(undecodable_marker("TSVECTOR"), "<tsvector value>");
    }

    #[test]
    fn connect_options_require_host_and_user() {
        let mut no_host = config();
        no_host.host = None;
        assert!(matches!(
            build_connect_options(&no_host),
            Err(ConnectionError::MissingField("host"))
        ));

        let mut blank_user = config();
        blank_user.user = Some("  ".into());
        assert!(matches!(
            build_connect_options(&blank_user),
            Err(ConnectionError::MissingField("user"))
        ));

        let options = build_connect_options(&config()).unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("postgres"));
    }

    #[test]
    fn default_timeout_is_five_seconds() {
        assert_eq!(PgConnector::new().connect_timeout(), Duration::from_secs(5));
        assert_eq!(
            PgConnector::with_timeout(Duration::from_millis(50)).connect_timeout(),
            Duration::from_millis(50)
        );
    }

    #[tokio::test]
    async fn open_fails_late_on_missing_host() {
        let mut cfg = config();
        cfg.host = None;
        let err = PgConnector::new().open(&cfg).await.err().unwrap();
        assert_eq!(err.to_string(), "missing required connection setting: host");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_error() {
        let cfg = ConnectionConfig {
            // TEST-NET-1, never routable
            host: Some("192.0.2.1".into()),
            port: Some(5432),
            ..config()
        };
        let connector = PgConnector::with_timeout(Duration::from_millis(200));
        let err = connector.open(&cfg).await.err().unwrap();
        assert!(matches!(
            err,
            ConnectionError::Timeout(_) | ConnectionError::Failed(_)
        ));
        assert!(!err.to_string().contains("pw"));
    }
}
