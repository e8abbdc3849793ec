pub mod error;

pub use error::DriverError;

use crate::callback::{CallbackHandler, RunCallbackHandler, TestEventListener};
use crate::config::{DriverConfig, IsolationStrategy};
use crate::dispatch::{
    create_executor, id_prefix, Action, ActionExecutor, ActionKind, ControllerArgs,
    ControllerRegistry, Settings,
};
use crate::modules::load_modules;
use crate::shared::{DriverLogger, JsonlLogSink, LogSink, NullLogSink};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Unloaded,
    Loaded,
}

impl DriverPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverPhase::Unloaded => "unloaded",
            DriverPhase::Loaded => "loaded",
        }
    }
}

impl std::fmt::Display for DriverPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum DriverState {
    Unloaded,
    Loaded(Box<dyn ActionExecutor>),
}

/// Drives one test module through load, count, explore, run and stop.
///
/// `load` needs exclusive access; everything else takes `&self`, so a
/// `stop_run` can be issued from another thread while `run` is blocked.
/// Callers are expected to serialize the remaining operations themselves.
pub struct Driver {
    id: String,
    config: DriverConfig,
    registry: ControllerRegistry,
    log: DriverLogger,
    state: DriverState,
}

impl Driver {
    pub fn new(
        id: impl Into<String>,
        config: DriverConfig,
        registry: ControllerRegistry,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let id = id.into();
        Self {
            log: DriverLogger::new(id.clone(), sink),
            id,
            config,
            registry,
            state: DriverState::Unloaded,
        }
    }

    /// Logs to `config.log_path` when one is set, otherwise nowhere.
    pub fn from_config(
        id: impl Into<String>,
        config: DriverConfig,
        registry: ControllerRegistry,
    ) -> Self {
        let sink: Arc<dyn LogSink> = match &config.log_path {
            Some(path) => Arc::new(JsonlLogSink::new(path)),
            None => Arc::new(NullLogSink),
        };
        Self::new(id, config, registry, sink)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_prefix(&self) -> String {
        id_prefix(&self.id)
    }

    pub fn phase(&self) -> DriverPhase {
        match self.state {
            DriverState::Unloaded => DriverPhase::Unloaded,
            DriverState::Loaded(_) => DriverPhase::Loaded,
        }
    }

    pub fn strategy(&self) -> IsolationStrategy {
        match &self.state {
            DriverState::Loaded(executor) => executor.strategy(),
            DriverState::Unloaded => self.config.isolation,
        }
    }

    pub fn framework(&self) -> Option<&str> {
        match &self.state {
            DriverState::Loaded(executor) => Some(executor.framework()),
            DriverState::Unloaded => None,
        }
    }

    /// Loads the module at `location` and returns the framework's load
    /// report. On failure the driver stays unloaded.
    pub fn load(&mut self, location: &str, settings: Settings) -> Result<String, DriverError> {
        if let DriverState::Loaded(_) = self.state {
            return Err(DriverError::InvalidState {
                operation: "load",
                state: DriverPhase::Loaded.as_str(),
            });
        }

        self.log.info("driver.load", &format!("loading {location}"));
        match self.try_load(location, settings) {
            Ok((executor, report)) => {
                self.log.info(
                    "driver.loaded",
                    &format!(
                        "{location} loaded with framework `{}` ({})",
                        executor.framework(),
                        executor.strategy()
                    ),
                );
                self.state = DriverState::Loaded(executor);
                Ok(report)
            }
            Err(err) => {
                self.log.error("driver.load_failed", &err.to_string());
                Err(err)
            }
        }
    }

    fn try_load(
        &self,
        location: &str,
        settings: Settings,
    ) -> Result<(Box<dyn ActionExecutor>, String), DriverError> {
        let modules = load_modules(location, &self.config.framework_module)?;
        let args = ControllerArgs::new(modules.target.path.clone(), &self.id, settings);
        let executor = create_executor(&modules, &args, &self.registry, &self.config, &self.log)?;
        let report = self.request(executor.as_ref(), Action::Load)?;
        Ok((executor, report))
    }

    fn executor(&self, operation: &'static str) -> Result<&dyn ActionExecutor, DriverError> {
        match &self.state {
            DriverState::Loaded(executor) => Ok(executor.as_ref()),
            DriverState::Unloaded => Err(DriverError::InvalidState {
                operation,
                state: DriverPhase::Unloaded.as_str(),
            }),
        }
    }

    fn request(&self, executor: &dyn ActionExecutor, action: Action) -> Result<String, DriverError> {
        let handler = CallbackHandler::new(self.log.clone());
        executor.dispatch(&action, &handler)?;
        self.terminal(action.kind(), handler.wait(self.config.result_timeout()))
    }

    fn terminal(&self, action: ActionKind, result: Option<String>) -> Result<String, DriverError> {
        result.ok_or_else(|| DriverError::ResultTimeout {
            action,
            timeout_ms: self.config.result_timeout_ms.unwrap_or_default(),
        })
    }

    /// Counts the tests selected by `filter`. A controller that finishes
    /// without reporting anything counts as zero.
    pub fn count_test_cases(&self, filter: &str) -> Result<usize, DriverError> {
        let executor = self.executor("count test cases")?;
        let handler = CallbackHandler::new(self.log.clone());
        executor.dispatch(
            &Action::Count {
                filter: filter.to_string(),
            },
            &handler,
        )?;
        let Some(message) = handler.result() else {
            self.log
                .debug("driver.count_absent", "count finished without a result");
            return Ok(0);
        };
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed
            .parse::<usize>()
            .map_err(|_| DriverError::MalformedResult {
                action: ActionKind::Count,
                message,
            })
    }

    pub fn explore(&self, filter: &str) -> Result<String, DriverError> {
        let executor = self.executor("explore tests")?;
        self.request(
            executor,
            Action::Explore {
                filter: filter.to_string(),
            },
        )
    }

    /// Runs the tests selected by `filter`. Every message the framework
    /// emits reaches `listener` before this returns the final result.
    pub fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &str,
    ) -> Result<String, DriverError> {
        let executor = self.executor("run tests")?;
        let handler =
            RunCallbackHandler::new(listener, &self.config.final_report_tag, self.log.clone());
        let action = Action::Run {
            filter: filter.to_string(),
        };

        let result = executor
            .dispatch(&action, &handler)
            .and_then(|()| self.terminal(ActionKind::Run, handler.wait(self.config.result_timeout())));
        handler.finish();
        result
    }

    /// Asks the framework to stop the current run. Does not wait for the run
    /// to finish; a forced stop may leave that run without a result.
    pub fn stop_run(&self, force: bool) -> Result<(), DriverError> {
        let executor = self.executor("stop a run")?;
        self.log
            .info("driver.stop_run", &format!("stop requested (force: {force})"));
        executor.signal(&Action::StopRun { force })
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("strategy", &self.strategy())
            .finish_non_exhaustive()
    }
}
