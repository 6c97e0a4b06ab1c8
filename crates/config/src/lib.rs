//! Configuration for the artifact catalog.
//!
//! Values are layered, lowest precedence first:
//! 1. built-in defaults,
//! 2. an optional configuration file (TOML, YAML or JSON, chosen by extension),
//! 3. `GORJUN_`-prefixed environment variables, with `__` separating nested
//!    keys (e.g. `GORJUN_AUTH__TOKEN_TTL_MINUTES=30`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "GORJUN_";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_TOKEN_TTL_MINUTES: u64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

/// Location and pool sizing of the embedded metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Root directory holding blobs named by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer tokens older than this are no longer honoured.
    pub token_ttl_minutes: u64,
}

fn data_dir() -> PathBuf {
    match ProjectDirs::from("io", "subutai", "gorjun") {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        None => {
            tracing::debug!("No home directory found; falling back to the working directory");
            std::env::current_dir().unwrap_or_default()
        },
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("catalog.db"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: data_dir().join("files") }
    }
}
impl Default for AuthConfig {
    fn default() -> Self {
        Self { token_ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_minutes.saturating_mul(60))
    }
}

impl Config {
    /// Load configuration from defaults, an optional file, and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(file)?)
    }

    /// Build the layered provider without extracting it.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => exn::bail!(ErrorKind::Format(file.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(
            database = %config.database.path.display(),
            storage = %config.storage.path.display(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            exn::bail!(ErrorKind::Invalid("database.max_connections must be at least 1".to_string()));
        }
        if !self.storage.path.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "storage.path must be absolute, got `{}`",
                self.storage.path.display()
            )));
        }
        if self.auth.token_ttl_minutes == 0 {
            exn::bail!(ErrorKind::Invalid("auth.token_ttl_minutes must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.auth.token_ttl(), Duration::from_secs(3600));
        assert!(config.database.path.ends_with("catalog.db"));
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            let root = jail.directory().join("blobs");
            jail.create_file(
                "gorjun.toml",
                &format!(
                    r#"
                        [storage]
                        path = "{}"
                        [auth]
                        token_ttl_minutes = 15
                    "#,
                    root.display()
                ),
            )?;
            let config = Config::load(Some(Path::new("gorjun.toml"))).map_err(|e| format!("{e:?}"))?;
            assert_eq!(config.storage.path, root);
            assert_eq!(config.auth.token_ttl_minutes, 15);
            assert_eq!(config.database.max_connections, 5);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("gorjun.yaml", "auth:\n  token_ttl_minutes: 15\n")?;
            jail.set_env("GORJUN_AUTH__TOKEN_TTL_MINUTES", "90");
            jail.set_env("GORJUN_DATABASE__MAX_CONNECTIONS", "2");
            jail.set_env("GORJUN_STORAGE__PATH", "/srv/gorjun/files");
            let config = Config::load(Some(Path::new("gorjun.yaml"))).map_err(|e| format!("{e:?}"))?;
            assert_eq!(config.auth.token_ttl_minutes, 90);
            assert_eq!(config.database.max_connections, 2);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_extension() {
        let result = Config::load(Some(Path::new("gorjun.ini")));
        assert!(matches!(&*result.unwrap_err(), ErrorKind::Format(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        let result = Config::load(Some(&missing));
        assert!(matches!(&*result.unwrap_err(), ErrorKind::Load));
    }

    #[rstest]
    #[case(0, "/srv/files", 60)]
    #[case(5, "relative/files", 60)]
    #[case(5, "/srv/files", 0)]
    fn test_validation_rejects(#[case] connections: u32, #[case] storage: &str, #[case] ttl: u64) {
        let mut config = Config::default();
        config.database.max_connections = connections;
        config.storage.path = PathBuf::from(storage);
        config.auth.token_ttl_minutes = ttl;
        let result = config.validate();
        assert!(matches!(&*result.unwrap_err(), ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_validation_accepts() {
        let mut config = Config::default();
        config.storage.path = PathBuf::from("/srv/files");
        assert!(config.validate().is_ok());
    }
}
