pub mod run_handler;
pub mod terminal_slot;

pub use run_handler::RunCallbackHandler;
pub use terminal_slot::TerminalSlot;

use crate::shared::DriverLogger;
use std::time::Duration;

/// Where a controller sends the messages an action produces.
pub trait ActionReporter: Send + Sync {
    fn report(&self, message: &str);

    /// True once the terminal message of the action has been received.
    fn is_complete(&self) -> bool;
}

/// Receives live progress fragments while a run is in flight.
pub trait TestEventListener: Send + Sync {
    fn on_test_event(&self, fragment: &str);
}

/// Handler for actions that produce a single message. The first message
/// received is the result.
#[derive(Debug)]
pub struct CallbackHandler {
    slot: TerminalSlot,
    log: DriverLogger,
}

impl CallbackHandler {
    pub fn new(log: DriverLogger) -> Self {
        Self {
            slot: TerminalSlot::new(),
            log,
        }
    }

    pub fn result(&self) -> Option<String> {
        self.slot.peek()
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Option<String> {
        self.slot.wait(timeout)
    }
}

impl ActionReporter for CallbackHandler {
    fn report(&self, message: &str) {
        if !self.slot.fill(message) {
            self.log.warn(
                "callback.extra_terminal",
                "ignored a second result message for a single-result action",
            );
        }
    }

    fn is_complete(&self) -> bool {
        self.slot.is_filled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::MemoryLogSink;
    use std::sync::Arc;

    #[test]
    fn plain_handler_keeps_first_message_and_logs_extras() {
        let sink = Arc::new(MemoryLogSink::new());
        let handler = CallbackHandler::new(DriverLogger::new("d", sink.clone()));
        assert!(!handler.is_complete());

        handler.report("<test-suite/>");
        handler.report("<ignored/>");

        assert!(handler.is_complete());
        assert_eq!(handler.result().as_deref(), Some("<test-suite/>"));
        assert_eq!(handler.wait(None).as_deref(), Some("<test-suite/>"));
        assert_eq!(sink.events(), vec!["callback.extra_terminal".to_string()]);
    }
}
