//! Pipeline configuration.
//!
//! Settings come from a TOML file (`elt.toml` by default) and are then
//! overridden by environment variables, which is how CI injects secrets.
//! A `.env` file in the working directory is loaded first if present.
//!
//! | Variable | Field |
//! |---|---|
//! | `ELT_DB_HOST` | `database.host` |
//! | `ELT_DB_PORT` | `database.port` |
//! | `ELT_DB_NAME` | `database.name` |
//! | `ELT_DB_USER` | `database.user` |
//! | `ELT_DB_PASSWORD` | `database.password` |
//! | `ELT_RAW_SCHEMA` / `ELT_DEV_SCHEMA` / `ELT_PROD_SCHEMA` | `schemas.*` |
//! | `ELT_STATE_BUCKET` | `state.bucket` |
//! | `ELT_STATE_PREFIX` | `state.prefix` |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extract: ExtractConfig,
    pub database: DatabaseConfig,
    pub schemas: SchemaConfig,
    pub state: StateConfig,
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Explicit tickers, added to whatever `sectors` selects.
    pub symbols: Vec<String>,
    /// Catalog sectors to extract. Empty together with `symbols` means all.
    pub sectors: Vec<String>,
    pub start_date: NaiveDate,
    /// Table inside the raw schema.
    pub raw_table: String,
    /// Optional catalog TOML replacing the built-in one.
    pub catalog: Option<PathBuf>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            sectors: Vec::new(),
            start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
            raw_table: "commodity_prices".into(),
            catalog: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    /// Never written back out; supply via `ELT_DB_PASSWORD`.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            name: "commodities".into(),
            user: "postgres".into(),
            password: None,
            connect_timeout_secs: 10,
        }
    }
}

/// Schema per stage: extraction lands in `raw`, pull requests build into
/// `dev`, main-branch pushes build into `prod`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub raw: String,
    pub dev: String,
    pub prod: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            raw: "raw".into(),
            dev: "dev".into(),
            prod: "prod".into(),
        }
    }
}

/// Where the dbt manifest lives between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// S3 bucket. Required unless `local_store` is set.
    pub bucket: Option<String>,
    /// Key prefix inside the bucket, without leading or trailing slash.
    pub prefix: String,
    /// Use a local directory as the object store instead of S3.
    pub local_store: Option<PathBuf>,
    /// Where a pulled manifest is placed for `--state`.
    pub state_dir: PathBuf,
    /// Object-store CLI executable.
    pub aws_bin: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: "dbt/state".into(),
            local_store: None,
            state_dir: PathBuf::from("state"),
            aws_bin: "aws".into(),
        }
    }
}

impl StateConfig {
    /// Object key of the manifest.
    pub fn manifest_key(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            "manifest.json".to_string()
        } else {
            format!("{prefix}/manifest.json")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub dbt_bin: String,
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub threads: Option<u32>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            dbt_bin: "dbt".into(),
            project_dir: PathBuf::from("transform"),
            profiles_dir: PathBuf::from("transform"),
            threads: None,
        }
    }
}

impl TransformConfig {
    /// dbt writes `manifest.json` here after every build.
    pub fn target_dir(&self) -> PathBuf {
        self.project_dir.join("target")
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Effective settings as TOML. The database password is never included.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load the file if it exists (defaults otherwise), apply `.env` and the
    /// process environment, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        if let Ok(env_file) = dotenv::dotenv() {
            tracing::debug!(path = %env_file.display(), "loaded .env");
        }

        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables read through `lookup`.
    /// Empty values are ignored so an unset CI variable cannot blank a field.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ELT_DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("ELT_DB_PORT") {
            self.database.port = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "ELT_DB_PORT".into(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("ELT_DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = get("ELT_DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("ELT_DB_PASSWORD") {
            self.database.password = Some(v);
        }
        if let Some(v) = get("ELT_RAW_SCHEMA") {
            self.schemas.raw = v;
        }
        if let Some(v) = get("ELT_DEV_SCHEMA") {
            self.schemas.dev = v;
        }
        if let Some(v) = get("ELT_PROD_SCHEMA") {
            self.schemas.prod = v;
        }
        if let Some(v) = get("ELT_STATE_BUCKET") {
            self.state.bucket = Some(v);
        }
        if let Some(v) = get("ELT_STATE_PREFIX") {
            self.state.prefix = v;
        }
        Ok(())
    }

    /// Report every problem at once rather than the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        for (field, value) in [
            ("schemas.raw", &self.schemas.raw),
            ("schemas.dev", &self.schemas.dev),
            ("schemas.prod", &self.schemas.prod),
            ("extract.raw_table", &self.extract.raw_table),
        ] {
            if !is_identifier(value) {
                problems.push(format!("{field} '{value}' is not a plain SQL identifier"));
            }
        }

        if self.schemas.raw == self.schemas.dev
            || self.schemas.raw == self.schemas.prod
            || self.schemas.dev == self.schemas.prod
        {
            problems.push("schemas.raw, schemas.dev and schemas.prod must differ".into());
        }

        if self.database.port == 0 {
            problems.push("database.port must be non-zero".into());
        }

        if let Some(bucket) = &self.state.bucket {
            if bucket.starts_with("s3://") || bucket.contains('/') {
                problems.push(format!("state.bucket '{bucket}' must be a bare bucket name"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}
