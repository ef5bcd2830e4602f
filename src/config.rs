//! Configuration loading.
//!
//! migro reads a TOML file (`migro.toml` by default):
//!
//! ```toml
//! migration_dir = "db/migrations"
//!
//! [database]
//! driver = "postgres"
//! host = "localhost"
//! port = 5432
//! username = "app"
//! password = "secret"
//! name = "app"
//!
//! [drift]
//! apply_retries = 3
//! rollback_retries = 5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigroError, MigroResult};

/// File names looked up in the working directory, in order.
pub const LOCAL_CONFIG_FILES: [&str; 2] = ["migro.toml", ".migro.toml"];

/// Credentials left at their template values.
const TEMPLATE_VALUES: [&str; 3] = ["your_username", "your_password", "your_database"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigroConfig {
    pub migration_dir: PathBuf,
    /// Query directory for the code generator; defaults to `<migration_dir>/queries`.
    pub query_dir: Option<PathBuf>,
    pub database: DatabaseConfig,
    pub runner: RunnerConfig,
    pub generator: GeneratorConfig,
    pub drift: DriftConfig,
}

impl Default for MigroConfig {
    fn default() -> Self {
        Self {
            migration_dir: PathBuf::from("db/migrations"),
            query_dir: None,
            database: DatabaseConfig::default(),
            runner: RunnerConfig::default(),
            generator: GeneratorConfig::default(),
            drift: DriftConfig::default(),
        }
    }
}

/// Database connection settings. `url` wins over the discrete fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
    pub sslmode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            driver: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            username: String::new(),
            password: String::new(),
            name: String::new(),
            sslmode: "disable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub binary: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: "goose".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub binary: String,
    /// Generator config file name, relative to the migration directory.
    pub config_file: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            binary: "sqlc".to_string(),
            config_file: "sqlc.yaml".to_string(),
        }
    }
}

/// Retry ceilings for drift reconciliation loops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub apply_retries: usize,
    pub rollback_retries: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            apply_retries: 3,
            rollback_retries: 5,
        }
    }
}

impl MigroConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> MigroResult<Self> {
        toml::from_str(content).map_err(|e| MigroError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> MigroResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MigroError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| MigroError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Locations searched when no explicit path is given.
    pub fn search_paths(cwd: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = LOCAL_CONFIG_FILES.iter().map(|f| cwd.join(f)).collect();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("migro").join("config.toml"));
        }
        paths
    }

    /// Load from `explicit` if given, otherwise from the first search path
    /// that exists. Returns the config and the file it came from.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> MigroResult<(Self, PathBuf)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, path.to_path_buf()));
        }

        let candidates = Self::search_paths(cwd);
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Ok((Self::from_file(path)?, path.clone()))
            }
            None => {
                let searched: Vec<String> =
                    candidates.iter().map(|p| p.display().to_string()).collect();
                Err(MigroError::Config(format!(
                    "no configuration found; create migro.toml or pass --config (searched: {})",
                    searched.join(", ")
                )))
            }
        }
    }

    /// Override the connection URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database.url = Some(url.into());
        self
    }

    pub fn query_dir(&self) -> PathBuf {
        self.query_dir
            .clone()
            .unwrap_or_else(|| self.migration_dir.join("queries"))
    }

    /// Connection string for the runner and the probes.
    pub fn connection_string(&self) -> MigroResult<String> {
        let db = &self.database;
        if let Some(url) = db.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.trim().to_string());
        }

        for (field, value) in [
            ("username", &db.username),
            ("password", &db.password),
            ("name", &db.name),
        ] {
            if TEMPLATE_VALUES.contains(&value.as_str()) {
                return Err(MigroError::Config(format!(
                    "[database].{} still holds the placeholder '{}'; fill in real credentials",
                    field, value
                )));
            }
        }
        if db.username.is_empty() || db.name.is_empty() {
            return Err(MigroError::Config(
                "[database] needs either url, or username and name".to_string(),
            ));
        }

        Ok(format!(
            "{}://{}:{}@{}:{}/{}?sslmode={}",
            db.driver, db.username, db.password, db.host, db.port, db.name, db.sslmode
        ))
    }
}
