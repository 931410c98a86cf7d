use serde::{Deserialize, Serialize};

/// Deployment context selecting which connection settings apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
    Test,
    Custom,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Dev,
        Environment::Prod,
        Environment::Test,
        Environment::Custom,
    ];

    /// Map any input onto a known environment. Unrecognized input falls back to `Dev`.
    pub fn normalize(input: &str) -> Environment {
        match input.trim().to_ascii_lowercase().as_str() {
            "dev" => Environment::Dev,
            "prod" => Environment::Prod,
            "test" => Environment::Test,
            "custom" => Environment::Custom,
            _ => Environment::Dev,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
            Environment::Test => "test",
            Environment::Custom => "custom",
        }
    }

    /// Name of the settings file for this environment, e.g. `.env.prod`
    pub fn env_file_name(&self) -> String {
        format!(".env.{}", self.as_str())
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Environment {
    fn from(input: &str) -> Self {
        Environment::normalize(input)
    }
}
