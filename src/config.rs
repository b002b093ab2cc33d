//! Configuration resolution for the capped logger
//!
//! The effective configuration is built in two steps:
//! 1. `resolve_config()` picks the first existing source and extracts the
//!    section for the current environment (promoting a nested
//!    `capped_logger` subsection when present)
//! 2. `LoggerConfig::effective()` merges that map over the built-in
//!    defaults, which depend on whether the environment is production

use crate::error::{LogError, Result};
use crate::severity::Severity;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

pub const MB: u64 = 1 << 20;
pub const PRODUCTION_COLLECTION_SIZE: u64 = 256 * MB;
pub const DEFAULT_COLLECTION_SIZE: u64 = 128 * MB;
pub const PRODUCTION_NUM_OBJECTS: u64 = 10_000_000;
pub const DEFAULT_NUM_OBJECTS: u64 = 10_000_000;

/// Candidate configuration files, in lookup order
pub const CONFIGURATION_FILES: [&str; 3] = ["capped_logger.yml", "capped_logger.toml", "database.yml"];

/// Key of the nested subsection promoted out of an environment section
pub const SUBSECTION_KEY: &str = "capped_logger";

/// Deployment environment name (e.g. "development", "production")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn production() -> Self {
        Self::new("production")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_production(&self) -> bool {
        self.0 == "production"
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new("development")
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Effective writer configuration, immutable once resolved
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggerConfig {
    /// Byte ceiling of the capped collection
    pub cap_data_size: u64,

    /// Document-count ceiling of the capped collection
    pub cap_object_num: u64,

    /// Wait for the store to acknowledge each insert (default: false)
    #[serde(default)]
    pub safe_insert: bool,

    /// Fold every message of a unit of work into one record (default: true)
    #[serde(default = "default_true")]
    pub combine_request: bool,

    /// Also persist each message as its own record (default: false)
    #[serde(default)]
    pub individual_lines: bool,

    /// Skip the fallback file sink while the backend is connected (default: false)
    #[serde(default)]
    pub disable_file_logging: bool,

    /// Overrides the derived application name
    #[serde(default)]
    pub application_name: Option<String>,

    /// Capped collection name (default: "<environment>_log")
    pub collection: String,

    /// SQLite database URL (default: "sqlite:./log/<environment>_log.db")
    pub database_url: String,

    /// Minimum severity persisted (default: DEBUG)
    #[serde(default, deserialize_with = "deserialize_severity")]
    pub level: Severity,
}

fn default_true() -> bool {
    true
}

fn deserialize_severity<'de, D>(deserializer: D) -> std::result::Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl LoggerConfig {
    /// Built-in defaults for an environment, as a JSON object
    pub fn defaults(env: &Environment) -> Map<String, Value> {
        let (size, num) = if env.is_production() {
            (PRODUCTION_COLLECTION_SIZE, PRODUCTION_NUM_OBJECTS)
        } else {
            (DEFAULT_COLLECTION_SIZE, DEFAULT_NUM_OBJECTS)
        };

        let mut defaults = Map::new();
        defaults.insert("cap_data_size".to_string(), Value::from(size));
        defaults.insert("cap_object_num".to_string(), Value::from(num));
        defaults.insert("collection".to_string(), Value::from(format!("{}_log", env)));
        defaults.insert(
            "database_url".to_string(),
            Value::from(format!("sqlite:./log/{}_log.db", env)),
        );
        defaults.insert("level".to_string(), Value::from(Severity::Debug.as_str()));
        defaults
    }

    /// Merge `resolved` over the environment defaults (resolved keys win)
    pub fn effective(env: &Environment, resolved: Value) -> Result<Self> {
        let mut merged = Self::defaults(env);

        match resolved {
            Value::Object(map) => merged.extend(map),
            Value::Null => {}
            other => {
                return Err(LogError::Configuration(format!(
                    "expected a mapping for environment '{}', found {}",
                    env, other
                )))
            }
        }

        let cfg: LoggerConfig = serde_json::from_value(Value::Object(merged))?;
        validate_config(&cfg)?;
        Ok(cfg)
    }
}

fn validate_config(cfg: &LoggerConfig) -> Result<()> {
    if cfg.cap_data_size == 0 {
        return Err(LogError::Configuration("cap_data_size must be greater than zero".to_string()));
    }

    if cfg.cap_object_num == 0 {
        return Err(LogError::Configuration("cap_object_num must be greater than zero".to_string()));
    }

    if i64::try_from(cfg.cap_data_size).is_err() || i64::try_from(cfg.cap_object_num).is_err() {
        return Err(LogError::Configuration(format!(
            "capped collection bounds cannot exceed {}",
            i64::MAX
        )));
    }

    if cfg.collection.is_empty() {
        return Err(LogError::Configuration("collection name cannot be empty".to_string()));
    }

    Ok(())
}

/// A supplier of a parsed configuration document
pub trait ConfigSource: Send + Sync {
    /// Human-readable source name, used in logs
    fn name(&self) -> String;

    /// The parsed document, or `None` when the source does not exist
    fn load(&self) -> Result<Option<Value>>;
}

/// Configuration file read through the `config` crate (YAML, TOML or JSON by extension)
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Option<Value>> {
        if !self.path.is_file() {
            return Ok(None);
        }

        let parsed = config::Config::builder()
            .add_source(config::File::from(self.path.as_path()))
            .build()?;

        let value: Value = parsed.try_deserialize()?;
        Ok(Some(value))
    }
}

/// Already-parsed configuration document
#[derive(Debug, Clone)]
pub struct MapSource {
    name: String,
    value: Option<Value>,
}

impl MapSource {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }

    /// A source that reports itself as missing
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl ConfigSource for MapSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn load(&self) -> Result<Option<Value>> {
        Ok(self.value.clone())
    }
}

/// Candidate files under `config_dir`, in lookup order
pub fn default_sources(config_dir: &Path) -> Vec<Box<dyn ConfigSource>> {
    CONFIGURATION_FILES
        .iter()
        .map(|name| Box::new(FileSource::new(config_dir.join(name))) as Box<dyn ConfigSource>)
        .collect()
}

/// Environment-scoped section of the first existing source
///
/// Returns an empty object when no source exists or the first one has no
/// section for `env`.
pub fn resolve_config(sources: &[Box<dyn ConfigSource>], env: &Environment) -> Result<Value> {
    for source in sources {
        let Some(document) = source.load()? else {
            continue;
        };

        tracing::debug!(source = %source.name(), env = %env, "Resolved logger configuration source");

        let section = match document {
            Value::Object(mut map) => map.remove(env.as_str()).unwrap_or(Value::Null),
            Value::Null => Value::Null,
            _ => {
                return Err(LogError::Configuration(format!(
                    "{} is not a mapping of environments",
                    source.name()
                )))
            }
        };

        return Ok(match section {
            Value::Object(mut map) => match map.remove(SUBSECTION_KEY) {
                Some(sub) => sub,
                None => Value::Object(map),
            },
            Value::Null => Value::Object(Map::new()),
            other => other,
        });
    }

    Ok(Value::Object(Map::new()))
}

/// Derive an application name from a deployment root path
///
/// Timestamped release directories (`/srv/app/releases/20110304132847`)
/// resolve to the directory two levels up.
pub fn application_name_from_path(root: &Path) -> Option<String> {
    let parts: Vec<String> = root
        .to_string_lossy()
        .split('/')
        .map(str::to_string)
        .collect();

    let last = parts.last()?;
    if last.is_empty() {
        return None;
    }

    if parts.len() >= 4 && last.starts_with(|c: char| c.is_ascii_digit()) {
        Some(parts[parts.len() - 3].clone())
    } else {
        Some(last.clone())
    }
}
