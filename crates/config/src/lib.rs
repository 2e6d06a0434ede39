//! Configuration for the msid submission store.
//!
//! Configuration is layered with [`figment`], each layer overriding the one
//! before it:
//!
//! 1. Built-in defaults ([`Config::default()`]).
//! 2. An optional file: TOML, or YAML/JSON when the extension says so.
//! 3. Environment variables prefixed with `MSID_`, with nested keys separated
//!    by a double underscore (e.g. `MSID_SUBMIT__MAX_ATTEMPTS=5`).
//!
//! ```toml
//! [database]
//! path = "/var/lib/msid/msid.sqlite"
//! max_connections = 5
//! busy_timeout_ms = 1500
//!
//! [submit]
//! max_attempts = 3
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use tracing::instrument;

const ENV_PREFIX: &str = "MSID_";
const DATABASE_FILENAME: &str = "msid.sqlite";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 1500;
const DEFAULT_MAX_ATTEMPTS: NonZeroU32 = NonZeroU32::new(3).unwrap();

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub submit: SubmitConfig,
}

/// Where the submission database lives and how the pool talks to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. The special value `:memory:` opens a
    /// private in-memory database.
    pub path: PathBuf,
    pub max_connections: u32,
    /// How long a connection waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = ProjectDirs::from("", "", "msid")
            .map(|dirs| dirs.data_dir().join(DATABASE_FILENAME))
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILENAME));
        Self {
            path,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}
impl DatabaseConfig {
    /// Configuration for a private in-memory database.
    pub fn in_memory() -> Self {
        Self { path: PathBuf::from(":memory:"), ..Self::default() }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }
}

/// Behaviour of batch submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Total number of times a batch is attempted (including the first) when
    /// concurrent writers keep winning the insert race. There is no backoff
    /// between attempts.
    pub max_attempts: NonZeroU32,
}
impl Default for SubmitConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

impl Config {
    /// Build the layered [`Figment`] without extracting it.
    ///
    /// Useful for callers that want to merge their own providers on top.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Toml::file(file)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration from defaults, an optional file and
    /// the environment.
    #[instrument(level = "debug")]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(file))
    }

    /// Extract and validate configuration from an already-built [`Figment`].
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(
            database = %config.database.path.display(),
            max_attempts = config.submit.max_attempts.get(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            exn::bail!(ErrorKind::Invalid("database.max_connections must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        config_file(".toml", contents)
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.submit.max_attempts.get(), 3);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.busy_timeout_ms, 1500);
        assert!(config.database.path.ends_with(DATABASE_FILENAME));
    }

    #[test]
    fn test_in_memory() {
        assert!(DatabaseConfig::in_memory().is_in_memory());
        assert!(!DatabaseConfig::default().is_in_memory());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
                [database]
                path = "/tmp/elsewhere.sqlite"

                [submit]
                max_attempts = 7
            "#,
        );
        let config = Config::from_figment(
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(file.path())),
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/elsewhere.sqlite"));
        assert_eq!(config.submit.max_attempts.get(), 7);
        // Untouched keys keep their defaults.
        assert_eq!(config.database.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[rstest]
    #[case(".yaml", "submit:\n  max_attempts: 4\n")]
    #[case(".yml", "submit:\n  max_attempts: 4\n")]
    #[case(".json", r#"{"submit": {"max_attempts": 4}}"#)]
    #[case(".toml", "[submit]\nmax_attempts = 4\n")]
    fn test_file_format_follows_extension(#[case] suffix: &str, #[case] contents: &str) {
        let file = config_file(suffix, contents);
        let config = Config::from_figment(Config::figment(Some(file.path()))).unwrap();
        assert_eq!(config.submit.max_attempts.get(), 4);
    }

    #[rstest]
    #[case("[submit]\nmax_attempts = 0\n")]
    #[case("[submit]\nmax_attempts = \"lots\"\n")]
    #[case("[database]\nmax_connections = -1\n")]
    fn test_rejects_malformed_values(#[case] contents: &str) {
        let file = toml_file(contents);
        let err = Config::from_figment(
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(file.path())),
        )
        .unwrap_err();
        assert_eq!(*err, ErrorKind::Load);
    }

    #[test]
    fn test_rejects_zero_connections() {
        let file = toml_file("[database]\nmax_connections = 0\n");
        let err = Config::from_figment(
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(file.path())),
        )
        .unwrap_err();
        assert!(matches!(*err, ErrorKind::Invalid(_)));
    }
}
