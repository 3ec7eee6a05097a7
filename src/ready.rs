//! Generation-numbered readiness latch
//!
//! Readers block here until the cache has completed a successful list.
//! Every transition back to ready bumps the generation, which lets an
//! in-flight watch registration detect that the cache reinitialized
//! between its gate pass and its registry insertion.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::errors::CacheError;
use crate::Result;

#[derive(Debug, Clone, Copy)]
struct ReadyState {
    ready: bool,
    stopped: bool,
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct ReadyGate {
    state: Mutex<ReadyState>,
    notify: Notify,
}

impl ReadyGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ReadyState {
                ready: false,
                stopped: false,
                generation: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Non-blocking snapshot.
    pub(crate) fn check(&self) -> bool {
        let state = self.state.lock();
        state.ready && !state.stopped
    }

    pub(crate) fn check_and_read_generation(&self) -> (bool, u64) {
        let state = self.state.lock();
        (state.ready && !state.stopped, state.generation)
    }

    /// Block until ready. Fails once the gate is permanently stopped.
    pub(crate) async fn wait(&self) -> Result<()> {
        self.wait_and_read_generation().await.map(|_| ())
    }

    /// Block until ready, returning the generation observed.
    pub(crate) async fn wait_and_read_generation(&self) -> Result<u64> {
        loop {
            // Arm the notification before checking so a set() between the
            // check and the await cannot be lost.
            let notified = self.notify.notified();
            {
                let state = self.state.lock();
                if state.stopped {
                    return Err(CacheError::ServiceUnavailable(
                        "cache is stopped".to_string(),
                    )
                    .into());
                }
                if state.ready {
                    return Ok(state.generation);
                }
            }
            notified.await;
        }
    }

    /// Transition the gate. Becoming ready bumps the generation and wakes
    /// every waiter; becoming unready is silent.
    pub(crate) fn set(
        &self,
        ready: bool,
    ) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        if ready && !state.ready {
            state.generation += 1;
            state.ready = true;
            drop(state);
            self.notify.notify_waiters();
        } else if !ready {
            state.ready = false;
        }
    }

    /// Permanent stop; all current and future waits fail.
    pub(crate) fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.ready = false;
        drop(state);
        self.notify.notify_waiters();
    }
}
