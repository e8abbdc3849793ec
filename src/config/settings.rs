use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FRAMEWORK_MODULE: &str = "testkit.framework.yaml";
pub const DEFAULT_FINAL_REPORT_TAG: &str = "<test-run";
pub const DEFAULT_HOST_SHUTDOWN_GRACE_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    #[default]
    InProcess,
    Isolated,
}

impl std::fmt::Display for IsolationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationStrategy::InProcess => write!(f, "in_process"),
            IsolationStrategy::Isolated => write!(f, "isolated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub isolation: IsolationStrategy,
    /// File name of the framework descriptor expected next to every target.
    pub framework_module: String,
    /// Prefix that marks the terminal message of a run.
    pub final_report_tag: String,
    pub result_timeout_ms: Option<u64>,
    pub host_shutdown_grace_ms: u64,
    pub host_env: BTreeMap<String, String>,
    pub log_path: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationStrategy::default(),
            framework_module: DEFAULT_FRAMEWORK_MODULE.to_string(),
            final_report_tag: DEFAULT_FINAL_REPORT_TAG.to_string(),
            result_timeout_ms: None,
            host_shutdown_grace_ms: DEFAULT_HOST_SHUTDOWN_GRACE_MS,
            host_env: BTreeMap::new(),
            log_path: None,
        }
    }
}

impl DriverConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let module = self.framework_module.trim();
        if module.is_empty() {
            return Err(ConfigError::Validation(
                "`framework_module` must be non-empty".to_string(),
            ));
        }
        let mut components = Path::new(module).components();
        let bare = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        );
        if !bare {
            return Err(ConfigError::Validation(format!(
                "`framework_module` must be a bare file name, got `{module}`"
            )));
        }

        if self.final_report_tag.trim().is_empty() {
            return Err(ConfigError::Validation(
                "`final_report_tag` must be non-empty".to_string(),
            ));
        }

        if self.result_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "`result_timeout_ms` must be greater than zero when set".to_string(),
            ));
        }

        for key in self.host_env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(ConfigError::Validation(format!(
                    "`host_env` key `{key}` is not a valid environment variable name"
                )));
            }
        }
        Ok(())
    }

    pub fn with_isolation(mut self, isolation: IsolationStrategy) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn result_timeout(&self) -> Option<Duration> {
        self.result_timeout_ms.map(Duration::from_millis)
    }

    pub fn host_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.host_shutdown_grace_ms)
    }
}
