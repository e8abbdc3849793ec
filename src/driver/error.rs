use crate::dispatch::ActionKind;
use crate::modules::{ModuleLoadError, PathResolutionError};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid module location: {0}")]
    PathResolution(#[from] PathResolutionError),
    #[error("failed to load test module: {0}")]
    ModuleLoad(ModuleLoadError),
    #[error(
        "framework `{framework}` is not compatible with this driver ({reason}); \
         run these tests with the runner that ships with that framework version"
    )]
    FrameworkIncompatible { framework: String, reason: String },
    #[error("cannot {operation} while the driver is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("test framework failed during {action}: {message}")]
    ControllerFailure { action: ActionKind, message: String },
    #[error("isolation host exited before {action} completed")]
    HostDisconnected { action: ActionKind },
    #[error("no result for {action} within {timeout_ms}ms")]
    ResultTimeout { action: ActionKind, timeout_ms: u64 },
    #[error("malformed {action} result `{message}`")]
    MalformedResult { action: ActionKind, message: String },
    #[error("framework finished {action} without a result")]
    MissingResult { action: ActionKind },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<ModuleLoadError> for DriverError {
    fn from(err: ModuleLoadError) -> Self {
        match err {
            ModuleLoadError::Location(inner) => DriverError::PathResolution(inner),
            other => DriverError::ModuleLoad(other),
        }
    }
}

impl DriverError {
    pub fn is_incompatible(&self) -> bool {
        matches!(self, DriverError::FrameworkIncompatible { .. })
    }
}
