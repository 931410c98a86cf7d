use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A config source exists but could not be read or parsed.
///
/// Never fatal: the resolver logs it and moves on to the next layer.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse env file {}: {message}", .path.display())]
    EnvFile { path: PathBuf, message: String },

    #[error("failed to parse override file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no writable config directory configured")]
    NoEnvStore,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("missing required connection setting: {0}")]
    MissingField(&'static str),

    #[error("connection timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Failed(String),

    #[error("failed to set search_path: {0}")]
    SearchPath(String),
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct StatementError {
    pub statement: String,
    pub message: String,
}

impl StatementError {
    pub fn new(statement: impl Into<String>, message: impl Into<String>) -> Self {
        StatementError {
            statement: statement.into(),
            message: message.into(),
        }
    }
}

/// Anything that can abort a query batch.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Statement(#[from] StatementError),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
