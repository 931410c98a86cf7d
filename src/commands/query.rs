use std::sync::Arc;

use log::{error, info};

use crate::batch::QueryBatch;
use crate::config::ConfigResolver;
use crate::db::{Connector, PgConnector, Session};
use crate::error::QueryError;
use crate::models::{ConnectionConfig, Environment, ExecutionResult, RedactedConfig};
use crate::normalize::{normalize, normalize_error};
use crate::redact::truncate_for_log;

const LOG_QUERY_CHARS: usize = 500;

/// Runs submitted query batches against the database of an environment.
///
/// Each call resolves config, opens its own connection, runs every statement in
/// order on that connection and closes it again. The result of the last
/// statement wins; earlier result sets are discarded.
pub struct QueryExecutor<C = PgConnector> {
    resolver: Arc<ConfigResolver>,
    connector: C,
}

impl QueryExecutor<PgConnector> {
    pub fn postgres(resolver: Arc<ConfigResolver>) -> Self {
        Self::new(resolver, PgConnector::new())
    }
}

impl<C: Connector> QueryExecutor<C> {
    pub fn new(resolver: Arc<ConfigResolver>, connector: C) -> Self {
        QueryExecutor {
            resolver,
            connector,
        }
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Redacted settings for an environment identifier
    pub fn display_config(&self, env: &str) -> RedactedConfig {
        self.resolver.display_config(Environment::normalize(env))
    }

    /// Execute `raw_query` against the (normalized) environment `env`.
    ///
    /// Never fails: connection and statement errors come back as
    /// [`ExecutionResult::Error`].
    pub async fn execute(&self, raw_query: &str, env: &str) -> ExecutionResult {
        self.execute_in(raw_query, Environment::normalize(env)).await
    }

    pub async fn execute_in(&self, raw_query: &str, env: Environment) -> ExecutionResult {
        info!(
            "Executing query on {}: {}",
            env,
            truncate_for_log(raw_query, LOG_QUERY_CHARS)
        );

        let batch = QueryBatch::parse(raw_query);
        if batch.is_empty() {
            info!("No statements to run");
            return ExecutionResult::nothing_usable();
        }

        let config = self.resolver.resolve(env);
        let result = match self.run_batch(&config, &batch).await {
            Ok(result) => result,
            Err(e) => {
                error!("Query execution failed: {}", e);
                normalize_error(&e)
            }
        };

        info!("{}", summarize(&result));
        result
    }

    async fn run_batch(
        &self,
        config: &ConnectionConfig,
        batch: &QueryBatch,
    ) -> Result<ExecutionResult, QueryError> {
        let mut session = self.connector.open(config).await?;
        // Close on every path; a dropped future still releases via Drop.
        let outcome = run_statements(session.as_mut(), config.active_schema(), batch).await;
        session.close().await;
        outcome
    }
}

async fn run_statements(
    session: &mut dyn Session,
    schema: &str,
    batch: &QueryBatch,
) -> Result<ExecutionResult, QueryError> {
    info!("Setting search_path to schema: {}", schema);
    session.set_search_path(schema).await?;

    let mut final_result = None;
    for statement in batch {
        info!("Running: {}", statement);
        let output = session.run(statement).await?;
        final_result = Some(normalize(Ok(output)));
    }

    Ok(final_result.unwrap_or_else(ExecutionResult::nothing_usable))
}

/// One-line description of a result for logging.
pub fn summarize(result: &ExecutionResult) -> String {
    match result {
        ExecutionResult::Rows { records, .. } => {
            format!("Query returned {} rows.", records.len())
        }
        other => {
            let text = serde_json::to_string(other).unwrap_or_default();
            format!("Result: {}", truncate_for_log(&text, LOG_QUERY_CHARS))
        }
    }
}
