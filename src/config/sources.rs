use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::ConfigError;
use crate::models::Environment;

pub const OVERRIDE_FILE_NAME: &str = "db_config.json";

/// Values contributed by one source. `None` means "this source did not set it".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub schema: Option<String>,
    pub ssl_mode: Option<String>,
}

impl ConfigLayer {
    /// Build a layer from `DB_*` style keys. Unknown keys are ignored.
    pub fn from_env_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut layer = ConfigLayer::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "DB_HOST" => &mut layer.host,
                "DB_PORT" => &mut layer.port,
                "DB_NAME" => &mut layer.database,
                "DB_USER" => &mut layer.user,
                "DB_PASSWORD" => &mut layer.password,
                "DB_SCHEMA" => &mut layer.schema,
                "DB_SSLMODE" => &mut layer.ssl_mode,
                _ => continue,
            };
            *slot = Some(value.into());
        }
        layer
    }

    /// Names of the fields carrying a non-empty value
    pub fn present_fields(&self) -> Vec<&'static str> {
        let fields = [
            ("host", &self.host),
            ("port", &self.port),
            ("name", &self.database),
            ("user", &self.user),
            ("password", &self.password),
            ("schema", &self.schema),
            ("sslmode", &self.ssl_mode),
        ];
        fields
            .into_iter()
            .filter(|(_, v)| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false))
            .map(|(name, _)| name)
            .collect()
    }
}

/// One layer of connection settings. The resolver applies sources in list order.
pub trait ConfigSource: Send + Sync {
    /// Short label used in log lines
    fn name(&self) -> String;

    /// `Ok(None)` when the source does not exist for `env`.
    fn load(&self, env: Environment) -> Result<Option<ConfigLayer>, ConfigError>;
}

/// `DB_*` variables, either from the live process environment or a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct EnvVarsSource {
    vars: Option<HashMap<String, String>>,
}

impl EnvVarsSource {
    pub fn process() -> Self {
        EnvVarsSource { vars: None }
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        EnvVarsSource {
            vars: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl ConfigSource for EnvVarsSource {
    fn name(&self) -> String {
        "process environment".to_string()
    }

    fn load(&self, _env: Environment) -> Result<Option<ConfigLayer>, ConfigError> {
        let layer = match &self.vars {
            Some(vars) => ConfigLayer::from_env_pairs(vars.iter().map(|(k, v)| (k, v.clone()))),
            None => ConfigLayer::from_env_pairs(std::env::vars()),
        };
        Ok(Some(layer))
    }
}

/// `.env.<environment>` files in a config directory.
#[derive(Debug, Clone)]
pub struct EnvFileSource {
    dir: PathBuf,
}

impl EnvFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        EnvFileSource { dir: dir.into() }
    }

    pub fn path_for(&self, env: Environment) -> PathBuf {
        self.dir.join(env.env_file_name())
    }
}

impl ConfigSource for EnvFileSource {
    fn name(&self) -> String {
        format!("env file in {}", self.dir.display())
    }

    fn load(&self, env: Environment) -> Result<Option<ConfigLayer>, ConfigError> {
        let path = self.path_for(env);
        if !path.exists() {
            warn!("Config file {} not found", path.display());
            return Ok(None);
        }

        let layer = ConfigLayer::from_env_pairs(read_env_file(&path)?);
        debug!("Read {}: {}", path.display(), layer.present_fields().join(", "));
        Ok(Some(layer))
    }
}

fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let describe = |e: dotenvy::Error| match e {
        // The offending line may hold a secret; report only where it is.
        dotenvy::Error::LineParse(_, index) => format!("invalid syntax at offset {}", index),
        other => other.to_string(),
    };

    let iter = dotenvy::from_path_iter(path).map_err(|e| ConfigError::EnvFile {
        path: path.to_path_buf(),
        message: describe(e),
    })?;

    iter.collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::EnvFile {
            path: path.to_path_buf(),
            message: describe(e),
        })
}

/// Optional JSON object applied after every other source.
#[derive(Debug, Clone)]
pub struct JsonOverrideSource {
    path: PathBuf,
}

impl JsonOverrideSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonOverrideSource { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(OVERRIDE_FILE_NAME))
    }
}

impl ConfigSource for JsonOverrideSource {
    fn name(&self) -> String {
        format!("override file {}", self.path.display())
    }

    fn load(&self, _env: Environment) -> Result<Option<ConfigLayer>, ConfigError> {
        if !self.path.exists() {
            debug!("No override file at {}", self.path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let object: HashMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: self.path.clone(),
                source,
            })?;

        let mut layer = ConfigLayer::default();
        for (key, value) in object {
            let slot = match key.as_str() {
                "host" => &mut layer.host,
                "port" => &mut layer.port,
                "name" | "database" => &mut layer.database,
                "user" => &mut layer.user,
                "password" => &mut layer.password,
                "schema" => &mut layer.schema,
                "sslmode" => &mut layer.ssl_mode,
                _ => continue,
            };
            *slot = match value {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            };
        }
        Ok(Some(layer))
    }
}

/// Plain form of an environment's settings file, as edited on the config page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFileSettings {
    pub host: String,
    pub port: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub schema: String,
}

impl EnvFileSettings {
    fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in [
            ("DB_HOST", &self.host),
            ("DB_PORT", &self.port),
            ("DB_NAME", &self.name),
            ("DB_USER", &self.user),
            ("DB_PASSWORD", &self.password),
            ("DB_SCHEMA", &self.schema),
        ] {
            if key == "DB_SCHEMA" && value.is_empty() {
                continue;
            }
            out.push_str(&format!("{}={}\n", key, quote_env_value(value)));
        }
        out
    }
}

fn quote_env_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' | '\r' => {}
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Writes and deletes `.env.<environment>` files.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    source: EnvFileSource,
}

impl EnvFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        EnvFileStore {
            source: EnvFileSource::new(dir),
        }
    }

    pub fn path_for(&self, env: Environment) -> PathBuf {
        self.source.path_for(env)
    }

    pub fn write(&self, env: Environment, settings: &EnvFileSettings) -> Result<PathBuf, ConfigError> {
        let path = self.path_for(env);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, settings.render()).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Returns `false` when there was no file to delete.
    pub fn delete(&self, env: Environment) -> Result<bool, ConfigError> {
        let path = self.path_for(env);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ConfigError::Write { path, source }),
        }
    }

    /// Current file contents in editable form; empty fields when absent or unreadable.
    pub fn read(&self, env: Environment) -> EnvFileSettings {
        let layer = match self.source.load(env) {
            Ok(Some(layer)) => layer,
            Ok(None) => return EnvFileSettings::default(),
            Err(e) => {
                warn!("{}", e);
                return EnvFileSettings::default();
            }
        };
        EnvFileSettings {
            host: layer.host.unwrap_or_default(),
            port: layer.port.unwrap_or_default(),
            name: layer.database.unwrap_or_default(),
            user: layer.user.unwrap_or_default(),
            password: layer.password.unwrap_or_default(),
            schema: layer.schema.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_ignore_unknown_keys() {
        let layer = ConfigLayer::from_env_pairs([
            ("DB_HOST", "db"),
            ("PATH", "/usr/bin"),
            ("DB_PORT", "5433"),
        ]);
        assert_eq!(layer.host.as_deref(), Some("db"));
        assert_eq!(layer.port.as_deref(), Some("5433"));
        assert_eq!(layer.present_fields(), vec!["host", "port"]);
    }

    #[test]
    fn missing_files_contribute_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EnvFileSource::new(dir.path()).load(Environment::Prod).unwrap().is_none());
        assert!(JsonOverrideSource::in_dir(dir.path()).load(Environment::Prod).unwrap().is_none());
    }

    #[test]
    fn env_file_is_read_per_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env.test"), "DB_HOST=test-db\nDB_USER=tester\n").unwrap();
        std::fs::write(dir.path().join(".env.prod"), "DB_HOST=prod-db\n").unwrap();

        let source = EnvFileSource::new(dir.path());
        let layer = source.load(Environment::Test).unwrap().unwrap();
        assert_eq!(layer.host.as_deref(), Some("test-db"));
        assert_eq!(layer.user.as_deref(), Some("tester"));
        assert!(source.load(Environment::Dev).unwrap().is_none());
    }

    #[test]
    fn json_override_accepts_numbers_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(OVERRIDE_FILE_NAME),
            r#"{"port": 6000, "database": "analytics", "schema": "", "extra": true}"#,
        )
        .unwrap();

        let layer = JsonOverrideSource::in_dir(dir.path())
            .load(Environment::Dev)
            .unwrap()
            .unwrap();
        assert_eq!(layer.port.as_deref(), Some("6000"));
        assert_eq!(layer.database.as_deref(), Some("analytics"));
        assert_eq!(layer.present_fields(), vec!["port", "name"]);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OVERRIDE_FILE_NAME), "{ not json").unwrap();
        let err = JsonOverrideSource::in_dir(dir.path())
            .load(Environment::Dev)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn malformed_env_file_error_hides_the_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env.dev"), "DB_HOST=db\nDB_PASSWORD='hunter2\n").unwrap();

        let err = EnvFileSource::new(dir.path())
            .load(Environment::Dev)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile { .. }));
        assert!(!err.to_string().contains("hunter2"), "{}", err);
    }

    #[test]
    fn store_writes_files_the_source_can_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvFileStore::new(dir.path().join("conf"));
        let settings = EnvFileSettings {
            host: "db.example".into(),
            port: "5432".into(),
            name: "app".into(),
            user: "svc".into(),
            password: "p@ss \"word\" $HOME".into(),
            schema: String::new(),
        };

        let path = store.write(Environment::Custom, &settings).unwrap();
        assert!(path.ends_with(".env.custom"));
        assert_eq!(store.read(Environment::Custom), settings);

        assert!(store.delete(Environment::Custom).unwrap());
        assert!(!store.delete(Environment::Custom).unwrap());
        assert_eq!(store.read(Environment::Custom), EnvFileSettings::default());
    }
}
