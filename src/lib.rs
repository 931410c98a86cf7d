//! Ad-hoc PostgreSQL query runner core.
//!
//! Resolves per-environment connection settings, opens one connection per
//! submission, runs the `;`-separated statements in order and hands back the
//! last statement's result as an [`ExecutionResult`].

pub mod batch;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod redact;

pub use batch::{clean_submitted_query, QueryBatch};
pub use commands::{
    summarize, table_fullnames, test_connection, QueryExecutor, DEFAULT_QUERY,
    LIST_TABLES_QUERY, LIST_TRIGGERS_QUERY,
};
pub use config::ConfigResolver;
pub use db::history::QueryHistory;
pub use db::{Connector, PgConnector, Session};
pub use error::{ConfigError, ConnectionError, HistoryError, QueryError, StatementError};
pub use models::{
    ConnectionConfig, Environment, ExecutionResult, Record, RedactedConfig, Value,
};
