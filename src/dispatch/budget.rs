use std::time::Duration;

use parking_lot::Mutex;

/// Running allowance of wall-clock time the dispatcher may spend blocked on
/// slow watchers.
///
/// Dispatches with no blocked watchers replenish the budget; dispatches
/// that had to block consume it and return whatever the timer did not use.
/// An empty budget means blocked watchers are closed immediately.
pub(crate) struct TimeBudget {
    state: Mutex<BudgetState>,
}

struct BudgetState {
    available: Duration,
    cap: Duration,
    refresh: Duration,
}

impl TimeBudget {
    pub(crate) fn new(
        cap: Duration,
        refresh: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                available: cap,
                cap,
                refresh,
            }),
        }
    }

    /// Take the whole current allowance.
    pub(crate) fn take_available(&self) -> Duration {
        let mut state = self.state.lock();
        std::mem::take(&mut state.available)
    }

    /// Return the unspent part of a taken allowance.
    pub(crate) fn return_unused(
        &self,
        unused: Duration,
    ) {
        let mut state = self.state.lock();
        state.available = (state.available + unused).min(state.cap);
    }

    /// Credit one idle dispatch.
    pub(crate) fn replenish(&self) {
        let mut state = self.state.lock();
        state.available = (state.available + state.refresh).min(state.cap);
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> Duration {
        self.state.lock().available
    }
}
