//! Filesystem roots and build defaults.
//!
//! Resolution order, later wins:
//!
//! 1. Defaults derived from `CELLAR_HOME` (or `~/.cellar`).
//! 2. `<home>/config.toml`, when [`Config::load`] is used.
//! 3. `CELLAR_PREFIX`, `CELLAR_CELLAR`, `CELLAR_LOGS`, `CELLAR_CACHE`.
//!
//! ```toml
//! [paths]
//! prefix = "/opt/cellar"
//! logs = "/var/log/cellar"
//!
//! [build]
//! verbose = false
//! timeout_secs = 3600
//! jobs = 8
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use dirs::home_dir;
use serde::Deserialize;
use thiserror::Error;

use crate::layout::Layout;
use crate::lock::LockManager;
use crate::options::BuildOptions;
use crate::pin::PinRegistry;

/// Name of the optional config file inside the cellar home.
pub const CONFIG_FILE: &str = "config.toml";

/// Errors resolving the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither `CELLAR_HOME` nor a user home directory is available.
    #[error("Could not determine home directory. Set CELLAR_HOME to override.")]
    NoHome,
}

/// Returns the cellar home directory, or None if the user's home cannot be resolved.
pub fn try_cellar_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("CELLAR_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".cellar"))
}

/// Build settings that seed [`BuildOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildDefaults {
    /// Tee build output to the console.
    #[serde(default)]
    pub verbose: bool,
    /// Kill a build step after this many seconds. Unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Parallel make jobs. Unset means one per logical CPU.
    #[serde(default)]
    pub jobs: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    paths: PathOverrides,
    #[serde(default)]
    build: BuildDefaults,
}

#[derive(Debug, Default, Deserialize)]
struct PathOverrides {
    prefix: Option<PathBuf>,
    cellar: Option<PathBuf>,
    logs: Option<PathBuf>,
    cache: Option<PathBuf>,
    pins: Option<PathBuf>,
}

/// Every root the engine reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base directory for everything below.
    pub home: PathBuf,
    /// Install prefix: `opt/`, `etc/`, `var/` live here.
    pub prefix: PathBuf,
    /// Versioned kegs: `<cellar>/<name>/<version>`.
    pub cellar: PathBuf,
    /// Build logs: `<logs>/<name>/NN.<command>`.
    pub logs: PathBuf,
    /// Per-formula lock files.
    pub locks: PathBuf,
    /// Pin records.
    pub pins: PathBuf,
    /// Build defaults.
    pub build: BuildDefaults,
}

impl Config {
    /// A config with every root derived from `home`. Reads no environment.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let mut config = Self {
            prefix: home.clone(),
            cellar: PathBuf::new(),
            logs: home.join("Logs"),
            locks: home.join("cache").join("locks"),
            pins: home.join("var").join("pinned"),
            build: BuildDefaults::default(),
            home,
        };
        config.cellar = config.prefix.join("Cellar");
        config
    }

    /// Resolve roots from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHome`] if no home directory can be found.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = try_cellar_home().ok_or(ConfigError::NoHome)?;
        let mut config = Self::with_home(home);
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Resolve roots from the environment and `<home>/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be found, or the config
    /// file exists but cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let home = try_cellar_home().ok_or(ConfigError::NoHome)?;
        let mut config = Self::with_home(home);

        let path = config.home.join(CONFIG_FILE);
        if path.exists() {
            config
                .apply_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)?;

        if let Some(prefix) = file.paths.prefix {
            self.set_prefix(prefix);
        }
        if let Some(cellar) = file.paths.cellar {
            self.cellar = cellar;
        }
        if let Some(logs) = file.paths.logs {
            self.logs = logs;
        }
        if let Some(cache) = file.paths.cache {
            self.locks = cache.join("locks");
        }
        if let Some(pins) = file.paths.pins {
            self.pins = pins;
        }
        self.build = file.build;
        Ok(())
    }

    /// Apply `CELLAR_*` overrides from a key lookup.
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(prefix) = get("CELLAR_PREFIX") {
            self.set_prefix(PathBuf::from(prefix));
        }
        if let Some(cellar) = get("CELLAR_CELLAR") {
            self.cellar = PathBuf::from(cellar);
        }
        if let Some(logs) = get("CELLAR_LOGS") {
            self.logs = PathBuf::from(logs);
        }
        if let Some(cache) = get("CELLAR_CACHE") {
            self.locks = PathBuf::from(cache).join("locks");
        }
    }

    // The cellar follows the prefix unless it was placed elsewhere explicitly.
    fn set_prefix(&mut self, prefix: PathBuf) {
        if self.cellar == self.prefix.join("Cellar") {
            self.cellar = prefix.join("Cellar");
        }
        self.prefix = prefix;
    }

    /// Path layout over this config's prefix and cellar.
    pub fn layout(&self) -> Layout {
        Layout::new(&self.prefix, &self.cellar)
    }

    /// Lock manager rooted at this config's lock directory.
    pub fn lock_manager(&self) -> LockManager {
        LockManager::new(&self.locks)
    }

    /// Pin registry rooted at this config's pin directory.
    pub fn pin_registry(&self) -> PinRegistry {
        PinRegistry::new(&self.pins)
    }

    /// Fresh build options seeded from `[build]`.
    pub fn build_options(&self) -> BuildOptions {
        let mut options = BuildOptions::new();
        options.verbose = self.build.verbose;
        options.timeout = self.build.timeout_secs.map(Duration::from_secs);
        if let Some(jobs) = self.build.jobs {
            options.jobs = jobs.max(1);
        }
        options
    }
}
