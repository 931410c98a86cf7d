use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};

use super::sources::{
    ConfigLayer, ConfigSource, EnvFileSettings, EnvFileSource, EnvFileStore, EnvVarsSource,
    JsonOverrideSource,
};
use crate::error::ConfigError;
use crate::models::{ConnectionConfig, Environment, RedactedConfig, SslMode};

/// Resolves per-environment connection settings from an ordered list of sources.
///
/// Results are memoized per environment for the lifetime of the resolver. Files
/// edited after the first lookup are not seen until [`ConfigResolver::invalidate`]
/// or [`ConfigResolver::clear`] is called.
pub struct ConfigResolver {
    sources: Vec<Box<dyn ConfigSource>>,
    cache: RwLock<HashMap<Environment, Arc<ConnectionConfig>>>,
    env_store: Option<EnvFileStore>,
}

impl ConfigResolver {
    /// Sources apply in order; later non-empty values win over earlier ones.
    pub fn new(sources: Vec<Box<dyn ConfigSource>>) -> Self {
        ConfigResolver {
            sources,
            cache: RwLock::new(HashMap::new()),
            env_store: None,
        }
    }

    /// Standard layering: process environment, then `.env.<env>` in `dir`,
    /// then `dir/db_config.json`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut resolver = Self::new(vec![
            Box::new(EnvVarsSource::process()),
            Box::new(EnvFileSource::new(dir)),
            Box::new(JsonOverrideSource::in_dir(dir)),
        ]);
        resolver.env_store = Some(EnvFileStore::new(dir));
        resolver
    }

    pub fn with_env_store(mut self, store: EnvFileStore) -> Self {
        self.env_store = Some(store);
        self
    }

    /// Cached settings for `env`, resolving them on first use.
    pub fn resolve(&self, env: Environment) -> Arc<ConnectionConfig> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(config) = cache.get(&env) {
                return Arc::clone(config);
            }
        }

        // Two callers racing on a miss both resolve; the first insert wins.
        let resolved = Arc::new(self.resolve_uncached(env));
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(env).or_insert(resolved))
    }

    /// Normalize a raw identifier, then [`ConfigResolver::resolve`].
    pub fn resolve_str(&self, env: &str) -> Arc<ConnectionConfig> {
        self.resolve(Environment::normalize(env))
    }

    /// Non-sensitive view for display
    pub fn display_config(&self, env: Environment) -> RedactedConfig {
        self.resolve(env).redacted()
    }

    pub fn invalidate(&self, env: Environment) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.remove(&env).is_some() {
            info!("Dropped cached DB config for {}", env);
        }
    }

    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.clear();
    }

    /// Write the settings file for `env` and drop its cached config.
    pub fn save_env_file(
        &self,
        env: Environment,
        settings: &EnvFileSettings,
    ) -> Result<PathBuf, ConfigError> {
        let store = self.env_store.as_ref().ok_or(ConfigError::NoEnvStore)?;
        let path = store.write(env, settings)?;
        info!("Saved configuration {}", path.display());
        self.invalidate(env);
        Ok(path)
    }

    /// Delete the settings file for `env`. Returns `false` if none existed.
    pub fn delete_env_file(&self, env: Environment) -> Result<bool, ConfigError> {
        let store = self.env_store.as_ref().ok_or(ConfigError::NoEnvStore)?;
        let deleted = store.delete(env)?;
        if deleted {
            warn!("Deleted configuration {}", store.path_for(env).display());
        }
        self.invalidate(env);
        Ok(deleted)
    }

    fn resolve_uncached(&self, env: Environment) -> ConnectionConfig {
        let mut config = ConnectionConfig::default();

        for source in &self.sources {
            match source.load(env) {
                Ok(Some(layer)) => {
                    let applied = apply_layer(&mut config, &layer);
                    if !applied.is_empty() {
                        info!(
                            "DB config for {} from {}: {}",
                            env,
                            source.name(),
                            applied.join(", ")
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring {} for {}: {}", source.name(), env, e),
            }
        }

        info!("DB config loaded for {}: {}", env, config.redacted());
        config
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("ConfigResolver")
            .field("sources", &names)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Overlay the non-empty values of `layer`. Returns the names of applied fields.
fn apply_layer(config: &mut ConnectionConfig, layer: &ConfigLayer) -> Vec<&'static str> {
    let mut applied = Vec::new();

    if let Some(host) = non_empty(&layer.host) {
        config.host = Some(host.to_string());
        applied.push("host");
    }
    if let Some(port) = non_empty(&layer.port) {
        match port.parse::<u16>() {
            Ok(port) => {
                config.port = Some(port);
                applied.push("port");
            }
            Err(_) => warn!("Ignoring invalid DB port {:?}", port),
        }
    }
    if let Some(database) = non_empty(&layer.database) {
        config.database = database.to_string();
        applied.push("name");
    }
    if let Some(user) = non_empty(&layer.user) {
        config.user = Some(user.to_string());
        applied.push("user");
    }
    // Passwords are taken verbatim; surrounding spaces may be significant.
    if let Some(password) = layer.password.as_deref().filter(|p| !p.is_empty()) {
        config.password = Some(password.to_string());
        applied.push("password");
    }
    if let Some(schema) = non_empty(&layer.schema) {
        config.schema = schema.to_string();
        applied.push("schema");
    }
    if let Some(mode) = non_empty(&layer.ssl_mode) {
        match SslMode::parse(mode) {
            Some(mode) => {
                config.ssl_mode = mode;
                applied.push("sslmode");
            }
            None => warn!("Ignoring unknown sslmode {:?}", mode),
        }
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        layer: ConfigLayer,
        reads: Arc<AtomicUsize>,
    }

    impl ConfigSource for CountingSource {
        fn name(&self) -> String {
            "counting".to_string()
        }

        fn load(&self, _env: Environment) -> Result<Option<ConfigLayer>, ConfigError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.layer.clone()))
        }
    }

    struct BrokenSource;

    impl ConfigSource for BrokenSource {
        fn name(&self) -> String {
            "broken".to_string()
        }

        fn load(&self, _env: Environment) -> Result<Option<ConfigLayer>, ConfigError> {
            Err(ConfigError::EnvFile {
                path: PathBuf::from(".env.dev"),
                message: "invalid syntax at offset 3".into(),
            })
        }
    }

    fn counting(layer: ConfigLayer) -> (Box<dyn ConfigSource>, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let source: Box<dyn ConfigSource> = Box::new(CountingSource {
            layer,
            reads: Arc::clone(&reads),
        });
        (source, reads)
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let resolver = ConfigResolver::new(vec![]);
        let config = resolver.resolve(Environment::Dev);
        assert_eq!(config.host, None);
        assert_eq!(config.user, None);
        assert_eq!(config.database, "postgres");
        assert_eq!(config.schema, "public");
    }

    #[test]
    fn second_resolve_hits_the_cache() {
        let (source, reads) = counting(ConfigLayer {
            host: Some("db".into()),
            ..ConfigLayer::default()
        });
        let resolver = ConfigResolver::new(vec![source]);

        let first = resolver.resolve(Environment::Prod);
        let second = resolver.resolve_str("prod");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        resolver.resolve(Environment::Test);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_forces_a_fresh_read() {
        let (source, reads) = counting(ConfigLayer::default());
        let resolver = ConfigResolver::new(vec![source]);

        let first = resolver.resolve(Environment::Dev);
        resolver.invalidate(Environment::Dev);
        let second = resolver.resolve(Environment::Dev);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        resolver.clear();
        resolver.resolve(Environment::Dev);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn file_env_and_override_layers_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env.dev"), "DB_HOST=file-host\nDB_USER=file-user\n").unwrap();

        let vars = EnvVarsSource::from_vars([("DB_PORT", "5433"), ("DB_PASSWORD", "from-env")]);
        let resolver = ConfigResolver::new(vec![
            Box::new(vars.clone()),
            Box::new(EnvFileSource::new(dir.path())),
        ]);
        let merged = resolver.resolve(Environment::Dev);
        assert_eq!(merged.host.as_deref(), Some("file-host"));
        assert_eq!(merged.user.as_deref(), Some("file-user"));
        assert_eq!(merged.port, Some(5433));
        assert_eq!(merged.password.as_deref(), Some("from-env"));

        std::fs::write(dir.path().join("db_config.json"), r#"{"port": "7000", "host": ""}"#).unwrap();
        let resolver = ConfigResolver::new(vec![
            Box::new(vars),
            Box::new(EnvFileSource::new(dir.path())),
            Box::new(JsonOverrideSource::in_dir(dir.path())),
        ]);
        let overridden = resolver.resolve(Environment::Dev);
        assert_eq!(overridden.port, Some(7000));
        assert_eq!(overridden.host.as_deref(), Some("file-host"));
    }

    #[test]
    fn broken_source_contributes_nothing() {
        let vars = EnvVarsSource::from_vars([("DB_HOST", "env-host"), ("DB_PORT", "not-a-port")]);
        let resolver = ConfigResolver::new(vec![Box::new(vars), Box::new(BrokenSource)]);
        let config = resolver.resolve(Environment::Dev);
        assert_eq!(config.host.as_deref(), Some("env-host"));
        assert_eq!(config.port, None);
    }

    #[test]
    fn display_config_is_redacted() {
        let vars = EnvVarsSource::from_vars([("DB_PASSWORD", "topsecret"), ("DB_SCHEMA", "sales")]);
        let resolver = ConfigResolver::new(vec![Box::new(vars)]);
        let view = resolver.display_config(Environment::Custom);
        assert_eq!(view.password, "****");
        assert_eq!(view.schema, "sales");
        assert!(!format!("{:?}", view).contains("topsecret"));
    }

    #[test]
    fn saving_an_env_file_invalidates_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ConfigResolver::new(vec![Box::new(EnvFileSource::new(dir.path()))])
            .with_env_store(EnvFileStore::new(dir.path()));
        assert_eq!(resolver.resolve(Environment::Test).host, None);

        let settings = EnvFileSettings {
            host: "fresh-host".into(),
            user: "me".into(),
            ..EnvFileSettings::default()
        };
        resolver.save_env_file(Environment::Test, &settings).unwrap();
        assert_eq!(resolver.resolve(Environment::Test).host.as_deref(), Some("fresh-host"));

        assert!(resolver.delete_env_file(Environment::Test).unwrap());
        assert_eq!(resolver.resolve(Environment::Test).host, None);
    }

    #[test]
    fn saving_without_a_store_fails() {
        let resolver = ConfigResolver::new(vec![]);
        let err = resolver
            .save_env_file(Environment::Dev, &EnvFileSettings::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoEnvStore));
    }

    #[test]
    fn concurrent_first_lookups_share_one_config() {
        const CALLERS: usize = 8;
        let (source, reads) = counting(ConfigLayer {
            host: Some("shared".into()),
            ..ConfigLayer::default()
        });
        let resolver = ConfigResolver::new(vec![source]);
        let barrier = std::sync::Barrier::new(CALLERS);

        let configs: Vec<Arc<ConnectionConfig>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        resolver.resolve(Environment::Prod)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let cached = resolver.resolve(Environment::Prod);
        assert_eq!(cached.host.as_deref(), Some("shared"));
        for config in &configs {
            assert!(Arc::ptr_eq(config, &cached));
        }
        let reads = reads.load(Ordering::SeqCst);
        assert!((1..=CALLERS).contains(&reads), "{} reads", reads);
    }
}
