//! `tessera.toml` configuration

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::store::RetryPolicy;

pub const CONFIG_FILE: &str = "tessera.toml";

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TesseraConfig {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Extra decorator allow-list entries: `name = "preserve"`.
    #[serde(default)]
    pub decorators: BTreeMap<String, String>,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Which files get indexed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    /// Directories module paths are computed from, relative to the root.
    #[serde(default = "default_source_roots")]
    pub source_roots: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Keep `changed` markers after a cycle, for auditing.
    #[serde(default)]
    pub retain_changed: bool,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationConfig {
    /// Emit a warning for every call site left unresolved.
    #[serde(default)]
    pub report_unresolved_calls: bool,
    #[serde(default)]
    pub unknown_decorators: UnknownDecoratorPolicy,
    #[serde(default = "default_true")]
    pub check_literal_types: bool,
}

/// What the arity check does when a target carries a decorator that is not
/// on the allow-list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownDecoratorPolicy {
    #[default]
    Skip,
    Check,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_include() -> Vec<String> {
    vec!["**/*.py".to_string()]
}

fn default_exclude() -> Vec<String> {
    vec![
        ".tessera/**".to_string(),
        "**/__pycache__/**".to_string(),
        ".venv/**".to_string(),
        "venv/**".to_string(),
    ]
}

fn default_source_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_channel_capacity() -> usize {
    256
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: default_exclude(),
            source_roots: default_source_roots(),
            respect_gitignore: true,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            retain_changed: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            report_unresolved_calls: false,
            unknown_decorators: UnknownDecoratorPolicy::Skip,
            check_literal_types: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl TesseraConfig {
    /// Load `tessera.toml` from `root`. A missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: TesseraConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.channel_capacity == 0 {
            return Err(ConfigError::Value {
                key: "watch.channel_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.store.retry_attempts == 0 {
            return Err(ConfigError::Value {
                key: "store.retry_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.index.source_roots.is_empty() {
            return Err(ConfigError::Value {
                key: "index.source_roots".to_string(),
                reason: "at least one source root is required".to_string(),
            });
        }
        self.decorator_effects().map(|_| ())
    }

    /// Parsed `[decorators]` entries.
    pub fn decorator_effects(&self) -> Result<Vec<(String, DecoratorEffect)>, ConfigError> {
        self.decorators
            .iter()
            .map(|(name, effect)| {
                effect
                    .parse::<DecoratorEffect>()
                    .map(|e| (name.clone(), e))
                    .map_err(|reason| ConfigError::Value {
                        key: format!("decorators.{}", name),
                        reason,
                    })
            })
            .collect()
    }
}

/// How a decorator changes the call signature of what it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoratorEffect {
    /// Signature unchanged.
    Preserve,
    /// The wrapper supplies the first `n` arguments itself.
    DropLeading(u32),
    /// Signature unknowable; arity is not checked.
    Opaque,
}

impl FromStr for DecoratorEffect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "preserve" => Ok(DecoratorEffect::Preserve),
            "opaque" => Ok(DecoratorEffect::Opaque),
            other => match other.strip_prefix("drop_leading:") {
                Some(n) => n
                    .trim()
                    .parse()
                    .map(DecoratorEffect::DropLeading)
                    .map_err(|_| format!("bad drop_leading count in {:?}", other)),
                None => Err(format!(
                    "expected preserve, opaque or drop_leading:N, got {:?}",
                    other
                )),
            },
        }
    }
}

impl fmt::Display for DecoratorEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoratorEffect::Preserve => f.write_str("preserve"),
            DecoratorEffect::Opaque => f.write_str("opaque"),
            DecoratorEffect::DropLeading(n) => write!(f, "drop_leading:{}", n),
        }
    }
}
