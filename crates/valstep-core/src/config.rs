//! Configuration for valstep-runner.
//!
//! Loaded from YAML; every field has a default so an empty file (or no file
//! at all) gives a working configuration:
//! ```yaml
//! tool:
//!   path: ValStep
//! timeouts:
//!   response_ms: 500
//!   exchange_ms: 2000
//! limits:
//!   max_output_bytes: 2097152
//! capture:
//!   dir: .valstep-errors
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValStepConfig {
    /// How to launch ValStep.
    #[serde(default)]
    pub tool: ToolConfig,

    /// Deadlines applied to the ValStep process.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Output limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Where failed evaluations are stored.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Enable verbose output.
    #[serde(default)]
    pub verbose: bool,
}

impl ValStepConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        Self::parse_yaml(&content)
    }

    /// Parses configuration from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not a mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Checks the configuration, returning warnings for questionable values.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        if self.tool.path.trim().is_empty() {
            return Err(ConfigError::MissingToolPath);
        }

        let mut warnings = Vec::new();
        if self.timeouts.response_ms == 0 {
            warnings.push(ConfigWarning::ZeroTimeout {
                field: "timeouts.response_ms",
            });
        }
        if self.timeouts.exchange_ms == 0 {
            warnings.push(ConfigWarning::ZeroTimeout {
                field: "timeouts.exchange_ms",
            });
        }
        if self.limits.max_output_bytes == 0 {
            warnings.push(ConfigWarning::ZeroOutputLimit);
        }
        Ok(warnings)
    }
}

/// How to launch ValStep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Executable, used as given.
    #[serde(default = "default_tool_path")]
    pub path: String,

    /// Arguments placed before ValStep's own positional arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process (defaults to the current one).
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_tool_path() -> String {
    "ValStep".to_string()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            path: default_tool_path(),
            args: Vec::new(),
            cwd: None,
        }
    }
}

/// Deadlines applied to the ValStep process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per happening group in interactive mode.
    #[serde(default = "default_response_ms")]
    pub response_ms: u64,

    /// Whole run in batch-file and exchange modes.
    #[serde(default = "default_exchange_ms")]
    pub exchange_ms: u64,
}

fn default_response_ms() -> u64 {
    500
}

fn default_exchange_ms() -> u64 {
    2000
}

impl TimeoutConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_ms: default_response_ms(),
            exchange_ms: default_exchange_ms(),
        }
    }
}

/// Output limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Ceiling on stdout bytes read in batch-file and exchange modes.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_max_output_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Where failed evaluations are stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Root directory for reproduction cases. Capture is off when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Configuration warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deadline of zero fails every run immediately.
    ZeroTimeout { field: &'static str },
    /// An output ceiling of zero fails every batch/exchange run.
    ZeroOutputLimit,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ZeroTimeout { field } => {
                write!(f, "Warning: {field} is 0, every run will time out")
            }
            ConfigWarning::ZeroOutputLimit => {
                write!(f, "Warning: limits.max_output_bytes is 0, no output will be accepted")
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("tool.path must name the ValStep executable")]
    MissingToolPath,
}
