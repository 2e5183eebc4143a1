//! Layered configuration resolution.
//!
//! Layers are merged lowest first; tables merge key by key and everything
//! else (including arrays) is replaced by the higher layer:
//!
//! 1. **Defaults** - [`ConductorConfig::default`]
//! 2. **User** - `<config_dir>/conductor/config.toml`
//! 3. **Project** - `<project>/.conductor/config.toml`
//! 4. **Preset** - `[presets.<name>]` from the merged files, or
//!    `<project>/.conductor/presets/<name>.toml`
//! 5. **Environment** - `CONDUCTOR_OFFLINE`
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor::config::ConfigLoader;
//!
//! let loader = ConfigLoader::new(project_dir).with_preset("quick");
//! let config = loader.load()?;
//! for source in loader.sources() { println!("{source}"); }
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use toml::{Table, Value};
use tracing::{debug, info};

use super::{validation, ConductorConfig, OFFLINE_ENV};
use crate::error::{ConductorError, Result};

/// Directory holding project configuration.
pub const CONFIG_DIR: &str = ".conductor";
/// Configuration file name at the user and project levels.
pub const CONFIG_FILE: &str = "config.toml";
/// Directory of preset files under [`CONFIG_DIR`].
pub const PRESET_DIR: &str = "presets";

/// Where a configuration layer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLevel {
    Default,
    User,
    Project,
    Preset,
    Environment,
}

impl fmt::Display for ConfigLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::User => "user",
            Self::Project => "project",
            Self::Preset => "preset",
            Self::Environment => "environment",
        };
        f.write_str(s)
    }
}

/// One applied layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub level: ConfigLevel,
    /// File the layer was read from, if any.
    pub path: Option<PathBuf>,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", self.level, path.display()),
            None => write!(f, "{}", self.level),
        }
    }
}

/// Resolves [`ConductorConfig`] from its layers.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    user_file: Option<PathBuf>,
    preset: Option<String>,
    offline_env: Option<String>,
    sources: Vec<ConfigSource>,
}

impl ConfigLoader {
    /// Loader for `project_dir` using the platform user config directory and
    /// the process environment.
    #[must_use]
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            user_file: dirs::config_dir().map(|d| d.join("conductor").join(CONFIG_FILE)),
            preset: None,
            offline_env: std::env::var(OFFLINE_ENV).ok(),
            sources: Vec::new(),
        }
    }

    /// Override (or with `None`, skip) the user-level file.
    #[must_use]
    pub fn with_user_file(mut self, path: Option<PathBuf>) -> Self {
        self.user_file = path;
        self
    }

    #[must_use]
    pub fn with_preset(mut self, name: impl Into<String>) -> Self {
        self.preset = Some(name.into());
        self
    }

    /// Override the `CONDUCTOR_OFFLINE` value instead of reading the environment.
    #[must_use]
    pub fn with_offline_env(mut self, value: Option<String>) -> Self {
        self.offline_env = value;
        self
    }

    #[must_use]
    pub fn project_file(&self) -> PathBuf {
        self.project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Layers applied by the last [`load`](Self::load).
    #[must_use]
    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// Resolve and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Config`] for unreadable files or a missing
    /// preset, [`ConductorError::Toml`] for a file that does not match the
    /// schema, and [`ConductorError::InvalidConfig`] from validation.
    pub fn load(&mut self) -> Result<ConductorConfig> {
        self.sources.clear();

        let mut merged = Value::try_from(ConductorConfig::default())
            .map_err(|e| ConductorError::config(format!("cannot encode defaults: {e}")))?;
        self.sources.push(ConfigSource {
            level: ConfigLevel::Default,
            path: None,
        });

        if let Some(user_file) = self.user_file.clone() {
            self.apply_file(&mut merged, ConfigLevel::User, &user_file)?;
        }
        let project_file = self.project_file();
        self.apply_file(&mut merged, ConfigLevel::Project, &project_file)?;

        if let Some(name) = self.preset.clone() {
            let (preset, path) = self.find_preset(&merged, &name)?;
            info!("Loading preset {name}");
            deep_merge(&mut merged, Value::Table(preset_overlay(preset)));
            self.sources.push(ConfigSource {
                level: ConfigLevel::Preset,
                path,
            });
        }

        let mut config: ConductorConfig = merged.try_into()?;

        if self.offline_env.as_deref().is_some_and(is_truthy) {
            config.isolation.offline = true;
            self.sources.push(ConfigSource {
                level: ConfigLevel::Environment,
                path: None,
            });
        }

        validation::validate(&config)?;
        Ok(config)
    }

    fn apply_file(&mut self, merged: &mut Value, level: ConfigLevel, path: &Path) -> Result<()> {
        let Some(table) = read_table(path)? else {
            return Ok(());
        };
        debug!("Applying {level} config from {}", path.display());
        deep_merge(merged, Value::Table(table));
        self.sources.push(ConfigSource {
            level,
            path: Some(path.to_path_buf()),
        });
        Ok(())
    }

    fn find_preset(&self, merged: &Value, name: &str) -> Result<(Table, Option<PathBuf>)> {
        if let Some(table) = merged
            .get("presets")
            .and_then(|p| p.get(name))
            .and_then(Value::as_table)
        {
            return Ok((table.clone(), None));
        }

        let file = self
            .project_dir
            .join(CONFIG_DIR)
            .join(PRESET_DIR)
            .join(format!("{name}.toml"));
        match read_table(&file)? {
            Some(table) => Ok((table, Some(file))),
            None => Err(ConductorError::config(format!("preset '{name}' not found"))),
        }
    }
}

/// A preset's `mode` key selects `default_mode`.
fn preset_overlay(mut preset: Table) -> Table {
    if let Some(mode) = preset.remove("mode") {
        preset.insert("default_mode".to_string(), mode);
    }
    preset
}

fn read_table(path: &Path) -> Result<Option<Table>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConductorError::config_with_path(
                format!("cannot read config: {e}"),
                path.to_path_buf(),
            ))
        }
    };
    toml::from_str::<Table>(&contents).map(Some).map_err(|e| {
        ConductorError::config_with_path(format!("invalid TOML: {e}"), path.to_path_buf())
    })
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Merge `overlay` into `base`: tables recursively, everything else replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
