//! Process-level settings, layered from defaults, an optional `.env` file and
//! `HUTFORMER__*` environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Directory checkpoints are written to and read from.
    /// If not set, callers pass explicit paths.
    pub checkpoint_dir: Option<PathBuf>,

    /// Seed for parameter initialization when the model config does not set one.
    pub seed: u64,

    /// Log the per-component parameter table at info level after construction.
    pub log_parameter_report: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestingSettings {
    /// Indicates if running in continuous integration environment.
    /// Typically set by CI systems (e.g., GitHub Actions).
    pub ci: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub runtime: RuntimeSettings,

    /// Testing/Development settings
    pub testing: TestingSettings,
}

impl Settings {
    /// Create a new Settings instance from environment variables and config files.
    /// Environment variables are prefixed with "HUTFORMER", e.g. `HUTFORMER__RUNTIME__SEED=7`.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("HUTFORMER").separator("__").try_parsing(true))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("runtime.checkpoint_dir", None::<String>)?
            .set_default("runtime.seed", 0)?
            .set_default("runtime.log_parameter_report", false)?
            .set_default("testing.ci", false)?
            // Add configuration from .env file if it exists
            .add_source(File::with_name(".env").required(false))
            .add_source(env)
            .build()?;

        settings.try_deserialize()
    }

    /// Path for a named checkpoint inside `checkpoint_dir`, if one is configured.
    pub fn checkpoint_path(&self, name: &str) -> Option<PathBuf> {
        self.runtime.checkpoint_dir.as_ref().map(|dir| dir.join(name))
    }
}

/// Global settings instance
static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Get the global settings instance, initializing it if necessary.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        Settings::new().unwrap_or_else(|err| {
            log::warn!("falling back to default settings: {}", err);
            Settings::default()
        })
    })
}
