use super::{ActionReporter, TerminalSlot, TestEventListener};
use crate::shared::DriverLogger;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handler for the Run action.
///
/// Every message goes to the listener, in receipt order, through a queue
/// drained by a dedicated forwarder thread, so `report` never waits on the
/// listener. A message starting with the final tag also fills the terminal
/// slot.
pub struct RunCallbackHandler {
    final_tag: String,
    slot: TerminalSlot,
    queue: Mutex<Option<Sender<String>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    log: DriverLogger,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunCallbackHandler {
    pub fn new(
        listener: Arc<dyn TestEventListener>,
        final_tag: impl Into<String>,
        log: DriverLogger,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<String>();
        let forwarder = thread::spawn(move || {
            for fragment in rx {
                listener.on_test_event(&fragment);
            }
        });

        Self {
            final_tag: final_tag.into(),
            slot: TerminalSlot::new(),
            queue: Mutex::new(Some(tx)),
            forwarder: Mutex::new(Some(forwarder)),
            log,
        }
    }

    /// Leading whitespace and an XML declaration are skipped before the
    /// tag is matched.
    pub fn is_final(&self, message: &str) -> bool {
        let body = message.trim_start();
        let body = match body.strip_prefix("<?xml") {
            Some(rest) => rest
                .split_once("?>")
                .map_or(rest, |(_, after)| after.trim_start()),
            None => body,
        };
        body.starts_with(&self.final_tag)
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Option<String> {
        self.slot.wait(timeout)
    }

    /// Closes the listener queue and waits until the forwarder has handed
    /// every queued fragment to the listener.
    pub fn finish(&self) {
        drop(relock(&self.queue).take());
        let forwarder = relock(&self.forwarder).take();
        if let Some(handle) = forwarder {
            if handle.join().is_err() {
                self.log
                    .error("callback.listener_panicked", "test event listener panicked");
            }
        }
    }
}

impl ActionReporter for RunCallbackHandler {
    fn report(&self, message: &str) {
        {
            let queue = relock(&self.queue);
            match queue.as_ref() {
                Some(tx) => {
                    if tx.send(message.to_string()).is_err() {
                        self.log.warn(
                            "callback.listener_gone",
                            "listener forwarder stopped; progress message dropped",
                        );
                    }
                }
                None => {
                    self.log.warn(
                        "callback.late_message",
                        "progress message arrived after the run finished; dropped",
                    );
                    return;
                }
            }
        }

        if self.is_final(message) && !self.slot.fill(message) {
            self.log.warn(
                "callback.extra_terminal",
                "ignored a second final message for the same run",
            );
        }
    }

    fn is_complete(&self) -> bool {
        self.slot.is_filled()
    }
}

impl Drop for RunCallbackHandler {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for RunCallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCallbackHandler")
            .field("final_tag", &self.final_tag)
            .field("complete", &self.slot.is_filled())
            .finish_non_exhaustive()
    }
}
