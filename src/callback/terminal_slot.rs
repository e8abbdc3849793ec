use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Single-shot result slot. The first `fill` wins; readers block until it
/// happens.
#[derive(Debug, Default)]
pub struct TerminalSlot {
    state: Mutex<Option<String>>,
    ready: Condvar,
}

impl TerminalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when the slot already held a message.
    pub fn fill(&self, message: &str) -> bool {
        let mut state = self.lock();
        if state.is_some() {
            return false;
        }
        *state = Some(message.to_string());
        drop(state);
        self.ready.notify_all();
        true
    }

    pub fn is_filled(&self) -> bool {
        self.lock().is_some()
    }

    pub fn peek(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Blocks until the slot is filled. `None` means the timeout elapsed.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<String> {
        let mut state = self.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(message) = state.as_ref() {
                return Some(message.clone());
            }
            match deadline {
                None => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (next, _) = self
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_fill_wins() {
        let slot = TerminalSlot::new();
        assert!(slot.fill("one"));
        assert!(!slot.fill("two"));
        assert_eq!(slot.peek().as_deref(), Some("one"));
    }

    #[test]
    fn wait_blocks_until_another_thread_fills() {
        let slot = Arc::new(TerminalSlot::new());
        let writer = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.fill("<done/>");
        });
        assert_eq!(slot.wait(None).as_deref(), Some("<done/>"));
        handle.join().expect("join writer");
    }

    #[test]
    fn wait_gives_up_after_timeout() {
        let slot = TerminalSlot::new();
        assert_eq!(slot.wait(Some(Duration::from_millis(10))), None);
    }
}
