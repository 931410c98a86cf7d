use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::HistoryError;
use crate::models::HistoryEntry;

pub const DEFAULT_HISTORY_FILE: &str = "data/query_history.json";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Newest-first query history kept in a JSON file.
#[derive(Debug, Clone)]
pub struct QueryHistory {
    path: PathBuf,
    limit: usize,
}

impl Default for QueryHistory {
    fn default() -> Self {
        QueryHistory::new(DEFAULT_HISTORY_FILE)
    }
}

impl QueryHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        QueryHistory {
            path: path.into(),
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, newest first. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Record `query` at the top unless an entry with the same trimmed text exists.
    ///
    /// Returns whether anything was written.
    pub fn save(&self, query: &str) -> Result<bool, HistoryError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(false);
        }

        let mut history = self.load()?;
        if history.iter().any(|entry| entry.query.trim() == query) {
            debug!("Query already in history, not saving");
            return Ok(false);
        }

        history.insert(
            0,
            HistoryEntry {
                timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
                query: query.to_string(),
            },
        );
        history.truncate(self.limit);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&history)?)?;
        info!("Saved query to history ({} entries)", history.len());
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), HistoryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_in(dir: &tempfile::TempDir) -> QueryHistory {
        QueryHistory::new(dir.path().join("data").join("query_history.json"))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(history_in(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn newest_first_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir);

        assert!(history.save("SELECT 1").unwrap());
        assert!(history.save("  SELECT 2  ").unwrap());
        assert!(!history.save("SELECT 1\n").unwrap());
        assert!(!history.save("   ").unwrap());

        let entries = history.load().unwrap();
        let queries: Vec<&str> = entries.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["SELECT 2", "SELECT 1"]);
        assert_eq!(entries[0].timestamp.len(), "2024-01-01T00:00:00".len());
    }

    #[test]
    fn length_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir).with_limit(3);
        for i in 0..5 {
            history.save(&format!("SELECT {}", i)).unwrap();
        }
        let queries: Vec<String> = history.load().unwrap().into_iter().map(|e| e.query).collect();
        assert_eq!(queries, vec!["SELECT 4", "SELECT 3", "SELECT 2"]);
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let history = history_in(&dir);
        std::fs::create_dir_all(history.path().parent().unwrap()).unwrap();
        std::fs::write(history.path(), "not json").unwrap();
        assert!(matches!(history.load(), Err(HistoryError::Parse(_))));

        history.clear().unwrap();
        assert!(history.load().unwrap().is_empty());
    }
}
