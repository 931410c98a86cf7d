//! Turning a raw submitted query into an ordered list of statements.

pub const STATEMENT_SEPARATOR: char = ';';
const LINE_COMMENT: &str = "--";

/// Ordered statements of one submission. Execution order equals split order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryBatch {
    statements: Vec<String>,
}

impl QueryBatch {
    /// Split on `;`, trim each piece and drop the empty ones.
    ///
    /// No SQL awareness: a `;` inside a string literal or a dollar-quoted body
    /// splits too.
    pub fn split(raw: &str) -> Self {
        let statements = raw
            .split(STATEMENT_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        QueryBatch { statements }
    }

    /// [`clean_submitted_query`] followed by [`QueryBatch::split`].
    pub fn parse(raw: &str) -> Self {
        Self::split(&clean_submitted_query(raw))
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl<'a> IntoIterator for &'a QueryBatch {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

/// Drop blank lines and whole-line `--` comments, keeping other lines verbatim.
pub fn clean_submitted_query(query: &str) -> String {
    query
        .lines()
        .filter(|line| {
            let stripped = line.trim();
            !stripped.is_empty() && !stripped.starts_with(LINE_COMMENT)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
