//! Layered, per-environment connection settings.

pub mod resolver;
pub mod sources;

pub use resolver::ConfigResolver;
pub use sources::{
    ConfigLayer, ConfigSource, EnvFileSettings, EnvFileSource, EnvFileStore, EnvVarsSource,
    JsonOverrideSource, OVERRIDE_FILE_NAME,
};
