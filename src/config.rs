//! Engine configuration loaded from `.taskgraph/config.yaml`.

use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration file name within the .taskgraph directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Default hierarchy depth bound (root = depth 0).
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Default iteration cap for ancestor walks.
pub const DEFAULT_ANCESTOR_WALK_CAP: usize = 10;

/// Tunables for the graph engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Deepest level a task may sit at.
    pub max_depth: usize,

    /// Hard cap on parent hops; exceeding it means the store is corrupt.
    pub ancestor_walk_cap: usize,

    /// Attempts for a write that hits a locked database.
    pub max_write_attempts: u32,

    /// Base backoff between write attempts, multiplied by the attempt number.
    pub retry_backoff_ms: u64,

    /// SQLite busy handler timeout per statement.
    pub busy_timeout_ms: u64,

    /// Idle connections kept by a store.
    pub pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            ancestor_walk_cap: DEFAULT_ANCESTOR_WALK_CAP,
            max_write_attempts: 3,
            retry_backoff_ms: 20,
            busy_timeout_ms: 250,
            pool_size: 4,
        }
    }
}

impl Config {
    /// Load from `<dir>/config.yaml`, falling back to defaults when absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_yaml(&raw).with_context(|| format!("Invalid config in {}", path.display()))?;
        log::debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty file deserializes to unit, not a mapping
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(raw).context("Failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            bail!("max_depth must be at least 1");
        }
        if self.ancestor_walk_cap <= self.max_depth {
            bail!(
                "ancestor_walk_cap ({}) must exceed max_depth ({})",
                self.ancestor_walk_cap,
                self.max_depth
            );
        }
        if self.max_write_attempts == 0 {
            bail!("max_write_attempts must be at least 1");
        }
        if self.pool_size == 0 {
            bail!("pool_size must be at least 1");
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms * u64::from(attempt))
    }

    /// The traversal limits handed to the graph managers.
    pub fn limits(&self) -> Limits {
        Limits {
            max_depth: self.max_depth,
            walk_cap: self.ancestor_walk_cap,
        }
    }
}

/// Traversal bounds shared by the hierarchy and dependency managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_depth: usize,
    pub walk_cap: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Config::default().limits()
    }
}
