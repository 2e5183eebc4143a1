//! Configuration for conductor.
//!
//! [`ConductorConfig`] gathers every component's settings. It is resolved by
//! [`ConfigLoader`] from layered TOML files, validated, and then handed to
//! the orchestrator; components never read configuration files themselves.
//!
//! ```toml
//! default_mode = "full"
//! tick_ms = 500
//!
//! [guardian]
//! max_iterations = 40
//!
//! [generator]
//! command = ["my-agent", "--stdin"]
//!
//! [presets.quick]
//! mode = "fast"
//! guardian = { max_time_minutes = 10.0 }
//! ```

pub mod resolution;
pub mod validation;

pub use resolution::{ConfigLevel, ConfigLoader, ConfigSource, CONFIG_DIR, CONFIG_FILE};
pub use validation::{preflight, validate};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collaborators::{ContextConfig, GeneratorConfig, VerifyConfig};
use crate::guardian::GuardianConfig;
use crate::isolation::IsolationConfig;
use crate::orchestrator::state::ComplexityMode;
use crate::task::{BistConfig, TaskConfig};

/// Environment variable that forces offline isolation.
pub const OFFLINE_ENV: &str = "CONDUCTOR_OFFLINE";

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Mode used when a run does not name one.
    pub default_mode: ComplexityMode,
    /// Debugging passes allowed before the run fails.
    pub max_retries: u32,
    /// Pause between loop passes, in milliseconds.
    pub tick_ms: u64,
    /// How long planning waits for the operator.
    pub approval_timeout_secs: u64,
    /// Programs that must be on `PATH` before a run starts.
    pub required_tools: Vec<String>,
    /// State directory, relative to the project.
    pub state_dir: PathBuf,
    /// Log directory, relative to the project.
    pub log_dir: PathBuf,
    pub guardian: GuardianConfig,
    pub task: TaskConfig,
    pub bist: BistConfig,
    pub isolation: IsolationConfig,
    pub generator: GeneratorConfig,
    pub verify: VerifyConfig,
    pub context: ContextConfig,
    /// Named overlays selected with `--preset`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub presets: BTreeMap<String, toml::Table>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            default_mode: ComplexityMode::Streamlined,
            max_retries: 3,
            tick_ms: 2000,
            approval_timeout_secs: 300,
            required_tools: vec!["git".to_string()],
            state_dir: PathBuf::from("state"),
            log_dir: PathBuf::from("logs"),
            guardian: GuardianConfig::default(),
            task: TaskConfig::default(),
            bist: BistConfig::default(),
            isolation: IsolationConfig::default(),
            generator: GeneratorConfig::default(),
            verify: VerifyConfig::default(),
            context: ContextConfig::default(),
            presets: BTreeMap::new(),
        }
    }
}

impl ConductorConfig {
    /// Resolve configuration for `project_dir` with the standard layers.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a file cannot be parsed, the preset
    /// does not exist, or validation fails.
    pub fn load(project_dir: &Path, preset: Option<&str>) -> crate::error::Result<Self> {
        let mut loader = ConfigLoader::new(project_dir);
        if let Some(name) = preset {
            loader = loader.with_preset(name);
        }
        loader.load()
    }

    /// Absolute state directory for `project_dir`.
    #[must_use]
    pub fn state_dir(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.state_dir)
    }

    /// Absolute log directory for `project_dir`.
    #[must_use]
    pub fn log_dir(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.log_dir)
    }

    /// Render as TOML, for `conductor config show`.
    pub fn to_toml(&self) -> crate::error::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::error::ConductorError::config(format!("cannot render config: {e}")))
    }
}

fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}
