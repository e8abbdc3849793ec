use super::{Action, ActionKind};
use crate::callback::ActionReporter;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub type Settings = BTreeMap<String, serde_json::Value>;

/// Construction arguments handed to a controller exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerArgs {
    pub target_path: PathBuf,
    pub id_prefix: String,
    pub settings: Settings,
}

impl ControllerArgs {
    pub fn new(target_path: impl Into<PathBuf>, id: &str, settings: Settings) -> Self {
        Self {
            target_path: target_path.into(),
            id_prefix: id_prefix(id),
            settings,
        }
    }

    /// Applies the driver prefix to a test identifier.
    pub fn test_id(&self, id: &str) -> String {
        format!("{}{}", self.id_prefix, id)
    }
}

pub fn id_prefix(id: &str) -> String {
    if id.is_empty() {
        String::new()
    } else {
        format!("{id}-")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerFault {
    #[error("controller does not implement action `{0}`")]
    UnknownAction(ActionKind),
    #[error("controller contract mismatch: {0}")]
    ContractMismatch(String),
    #[error("{0}")]
    Failed(String),
}

/// The framework-owned object that executes lifecycle actions.
///
/// `invoke` may be entered concurrently: a `StopRun` arrives on another
/// thread while a `Run` is still executing.
pub trait TestController: Send + Sync {
    fn invoke(&self, action: &Action, reporter: &dyn ActionReporter)
        -> Result<(), ControllerFault>;
}

pub type ControllerFactory =
    Arc<dyn Fn(&ControllerArgs) -> Result<Arc<dyn TestController>, ControllerFault> + Send + Sync>;

/// Controller types available to the in-process strategy, keyed by their
/// fully-qualified name.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    factories: BTreeMap<String, ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&ControllerArgs) -> Result<Arc<dyn TestController>, ControllerFault>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ControllerArgs) -> Result<Arc<dyn TestController>, ControllerFault>
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, factory);
        self
    }

    pub fn resolve(&self, type_name: &str) -> Option<ControllerFactory> {
        self.factories.get(type_name).cloned()
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
