use super::ModuleLoadError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of the companion framework module that sits beside a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkDescriptor {
    pub framework: String,
    /// Fully-qualified controller type name.
    pub controller: String,
    #[serde(default)]
    pub api_version: Option<u32>,
    /// Isolation host executable, relative to the descriptor's directory.
    #[serde(default)]
    pub host: Option<PathBuf>,
    #[serde(default)]
    pub host_args: Vec<String>,
}

impl FrameworkDescriptor {
    pub fn from_path(path: &Path) -> Result<Self, ModuleLoadError> {
        let raw = fs::read_to_string(path).map_err(|source| ModuleLoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let descriptor: Self =
            serde_yaml::from_str(&raw).map_err(|source| ModuleLoadError::Descriptor {
                path: path.display().to_string(),
                source,
            })?;
        descriptor.validate(path)?;
        Ok(descriptor)
    }

    fn validate(&self, path: &Path) -> Result<(), ModuleLoadError> {
        let invalid = |reason: &str| ModuleLoadError::InvalidDescriptor {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        if self.framework.trim().is_empty() {
            return Err(invalid("`framework` must be non-empty"));
        }
        if self.controller.trim().is_empty() {
            return Err(invalid("`controller` must be non-empty"));
        }
        if let Some(host) = &self.host {
            if host.as_os_str().is_empty() {
                return Err(invalid("`host` must be non-empty when set"));
            }
        }
        Ok(())
    }

    pub fn host_path(&self, framework_dir: &Path) -> Option<PathBuf> {
        self.host.as_ref().map(|host| {
            if host.is_absolute() {
                host.clone()
            } else {
                framework_dir.join(host)
            }
        })
    }
}
