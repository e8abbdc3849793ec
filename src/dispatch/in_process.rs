use super::{
    fault_error, incompatible, Action, ActionExecutor, ActionKind, ControllerArgs,
    ControllerRegistry, TestController,
};
use crate::callback::{ActionReporter, CallbackHandler};
use crate::config::IsolationStrategy;
use crate::driver::DriverError;
use crate::modules::FrameworkModule;
use crate::shared::DriverLogger;
use std::sync::Arc;

/// Executes actions by calling the controller directly on the caller's
/// thread.
pub struct InProcessExecutor {
    framework: String,
    controller: Arc<dyn TestController>,
    log: DriverLogger,
}

impl InProcessExecutor {
    pub fn create(
        framework: &FrameworkModule,
        args: &ControllerArgs,
        registry: &ControllerRegistry,
        log: DriverLogger,
    ) -> Result<Self, DriverError> {
        let name = framework.name();
        let type_name = framework.descriptor.controller.as_str();

        let Some(factory) = registry.resolve(type_name) else {
            log.error(
                "dispatch.lookup_failed",
                &format!(
                    "controller type `{type_name}` is not registered (known: {})",
                    registry.type_names().join(", ")
                ),
            );
            return Err(incompatible(
                name,
                format!("controller type `{type_name}` not found"),
                &log,
            ));
        };

        let controller =
            factory(args).map_err(|fault| fault_error(name, ActionKind::Load, fault, &log))?;

        log.info(
            "dispatch.controller_created",
            &format!("in-process controller `{type_name}` for {}", args.target_path.display()),
        );
        Ok(Self {
            framework: name.to_string(),
            controller,
            log,
        })
    }
}

impl ActionExecutor for InProcessExecutor {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::InProcess
    }

    fn framework(&self) -> &str {
        &self.framework
    }

    fn dispatch(&self, action: &Action, reporter: &dyn ActionReporter) -> Result<(), DriverError> {
        self.controller
            .invoke(action, reporter)
            .map_err(|fault| fault_error(&self.framework, action.kind(), fault, &self.log))
    }

    fn signal(&self, action: &Action) -> Result<(), DriverError> {
        let disposable = CallbackHandler::new(self.log.clone());
        self.dispatch(action, &disposable)
    }
}
