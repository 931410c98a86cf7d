use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE: &str = "postgres";
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_PORT: u16 = 5432;

const PASSWORD_MASK: &str = "****";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl SslMode {
    pub fn parse(value: &str) -> Option<SslMode> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disable" => Some(SslMode::Disable),
            "prefer" => Some(SslMode::Prefer),
            "require" => Some(SslMode::Require),
            _ => None,
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslMode::Disable => write!(f, "disable"),
            SslMode::Prefer => write!(f, "prefer"),
            SslMode::Require => write!(f, "require"),
        }
    }
}

/// Fully layered connection settings for one environment.
///
/// Host, port, user and password may be missing after resolution; that only
/// surfaces once a connection is attempted.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub schema: String,
    pub ssl_mode: SslMode,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: None,
            port: None,
            database: DEFAULT_DATABASE.to_string(),
            user: None,
            password: None,
            schema: DEFAULT_SCHEMA.to_string(),
            ssl_mode: SslMode::default(),
        }
    }
}

impl ConnectionConfig {
    /// Schema to put on the search path, falling back to `public` when blank.
    pub fn active_schema(&self) -> &str {
        let schema = self.schema.trim();
        if schema.is_empty() {
            DEFAULT_SCHEMA
        } else {
            schema
        }
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig::from(self)
    }
}

// Hand-written so the password never ends up in a `{:?}` log line.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| PASSWORD_MASK))
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Display-safe projection of a [`ConnectionConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactedConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: String,
    pub user: Option<String>,
    pub schema: String,
    pub sslmode: SslMode,
    /// `"****"` when a password is configured, empty otherwise
    pub password: String,
}

impl From<&ConnectionConfig> for RedactedConfig {
    fn from(config: &ConnectionConfig) -> Self {
        let password_set = config
            .password
            .as_deref()
            .map(|p| !p.is_empty())
            .unwrap_or(false);

        RedactedConfig {
            host: config.host.clone(),
            port: config.port,
            name: config.database.clone(),
            user: config.user.clone(),
            schema: config.active_schema().to_string(),
            sslmode: config.ssl_mode,
            password: if password_set {
                PASSWORD_MASK.to_string()
            } else {
                String::new()
            },
        }
    }
}

impl std::fmt::Display for RedactedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "host={} port={} name={} user={} password={} schema={} sslmode={}",
            self.host.as_deref().unwrap_or("-"),
            self.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            self.name,
            self.user.as_deref().unwrap_or("-"),
            if self.password.is_empty() { "-" } else { &self.password },
            self.schema,
            self.sslmode
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConnectionResult {
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}
