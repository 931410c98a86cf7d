use log::info;

use crate::db::Connector;
use crate::models::{ExecutionResult, Value, NO_TABLES_MESSAGE};

use super::query::QueryExecutor;

/// User tables, excluding the system schemas
pub const LIST_TABLES_QUERY: &str = r#"
    SELECT schemaname, tablename
    FROM pg_catalog.pg_tables
    WHERE schemaname NOT IN ('pg_catalog', 'information_schema');
"#;

pub const LIST_TRIGGERS_QUERY: &str = r#"
SELECT
    event_object_schema AS schema,
    event_object_table AS table,
    trigger_name,
    action_timing AS timing,
    event_manipulation AS event,
    action_orientation AS orientation,
    action_statement AS definition
FROM
    information_schema.triggers
ORDER BY
    event_object_schema,
    event_object_table,
    trigger_name;
"#;

/// Query shown in the editor before anything has been submitted
pub const DEFAULT_QUERY: &str = " SELECT 1; ";

impl<C: Connector> QueryExecutor<C> {
    /// `schema.table` for every user table, in catalog row order.
    /// Errors and status results yield an empty list.
    pub async fn list_table_fullnames(&self, env: &str) -> Vec<String> {
        let result = self.execute(LIST_TABLES_QUERY, env).await;
        table_fullnames(&result)
    }

    /// Table listing for the landing view; an empty catalog becomes a message.
    pub async fn default_tables(&self, env: &str) -> ExecutionResult {
        info!("Listing tables with the default catalog query");
        match self.execute(LIST_TABLES_QUERY, env).await {
            ExecutionResult::Rows { records, .. } if records.is_empty() => {
                ExecutionResult::Message(NO_TABLES_MESSAGE.to_string())
            }
            other => other,
        }
    }

    pub async fn list_triggers(&self, env: &str) -> ExecutionResult {
        self.execute(LIST_TRIGGERS_QUERY, env).await
    }
}

/// Format `schemaname`/`tablename` rows as `schema.table`.
pub fn table_fullnames(result: &ExecutionResult) -> Vec<String> {
    let Some(records) = result.records() else {
        return Vec::new();
    };

    records
        .iter()
        .filter_map(|record| {
            let schema = record.get("schemaname").and_then(Value::as_str)?;
            let table = record.get("tablename").and_then(Value::as_str)?;
            Some(format!("{}.{}", schema, table))
        })
        .collect()
}
