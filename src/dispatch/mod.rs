pub mod action;
pub mod in_process;
pub mod isolated;
pub mod protocol;
pub mod registry;

pub use action::{Action, ActionKind};
pub use in_process::InProcessExecutor;
pub use isolated::IsolatedExecutor;
pub use registry::{
    id_prefix, ControllerArgs, ControllerFactory, ControllerFault, ControllerRegistry, Settings,
    TestController,
};

use crate::callback::ActionReporter;
use crate::config::{DriverConfig, IsolationStrategy};
use crate::driver::DriverError;
use crate::modules::LoadedModules;
use crate::shared::DriverLogger;

/// Runs actions against a controller living behind some isolation boundary.
pub trait ActionExecutor: Send + Sync {
    fn strategy(&self) -> IsolationStrategy;

    fn framework(&self) -> &str;

    /// Hands `action` to the controller and returns once it has been
    /// accepted. Messages reach `reporter`; the caller reads the terminal
    /// result from its handler.
    fn dispatch(&self, action: &Action, reporter: &dyn ActionReporter) -> Result<(), DriverError>;

    /// Delivers `action` without waiting for anything it reports.
    fn signal(&self, action: &Action) -> Result<(), DriverError>;
}

pub fn create_executor(
    modules: &LoadedModules,
    args: &ControllerArgs,
    registry: &ControllerRegistry,
    config: &DriverConfig,
    log: &DriverLogger,
) -> Result<Box<dyn ActionExecutor>, DriverError> {
    match config.isolation {
        IsolationStrategy::InProcess => Ok(Box::new(InProcessExecutor::create(
            &modules.framework,
            args,
            registry,
            log.clone(),
        )?)),
        IsolationStrategy::Isolated => Ok(Box::new(IsolatedExecutor::create(
            &modules.framework,
            args,
            config,
            log.clone(),
        )?)),
    }
}

pub(crate) fn incompatible(
    framework: &str,
    reason: impl Into<String>,
    log: &DriverLogger,
) -> DriverError {
    let reason = reason.into();
    log.error(
        "dispatch.incompatible",
        &format!("framework `{framework}`: {reason}"),
    );
    DriverError::FrameworkIncompatible {
        framework: framework.to_string(),
        reason,
    }
}

/// Maps a controller fault to the driver error taxonomy. Missing actions
/// and contract mismatches mean the framework speaks a different contract.
pub(crate) fn fault_error(
    framework: &str,
    action: ActionKind,
    fault: ControllerFault,
    log: &DriverLogger,
) -> DriverError {
    match fault {
        ControllerFault::UnknownAction(missing) => {
            log.error(
                "dispatch.lookup_failed",
                &format!("framework `{framework}` has no `{missing}` action"),
            );
            incompatible(framework, format!("no `{missing}` action"), log)
        }
        ControllerFault::ContractMismatch(reason) => incompatible(framework, reason, log),
        ControllerFault::Failed(message) => DriverError::ControllerFailure { action, message },
    }
}
