//! Converting driver output into the uniform [`ExecutionResult`] shape.

use crate::error::QueryError;
use crate::models::{ExecutionResult, Record, ResultSet, StatementOutput};

/// Normalize one statement's outcome.
///
/// A result set with zero rows stays an empty record list; only statements
/// without a row shape become the "no result" status.
pub fn normalize(outcome: Result<StatementOutput, QueryError>) -> ExecutionResult {
    match outcome {
        Ok(StatementOutput::Rows(set)) => normalize_rows(set),
        Ok(StatementOutput::Done { .. }) => ExecutionResult::no_result(),
        Err(e) => normalize_error(&e),
    }
}

pub fn normalize_rows(set: ResultSet) -> ExecutionResult {
    let ResultSet { columns, rows } = set;
    let records = rows
        .into_iter()
        .map(|row| Record::new(columns.iter().cloned().zip(row).collect()))
        .collect();
    ExecutionResult::Rows { columns, records }
}

/// The error's display text, which by construction carries no credentials.
pub fn normalize_error(error: &QueryError) -> ExecutionResult {
    ExecutionResult::Error(error.to_string())
}
