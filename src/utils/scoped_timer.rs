use tokio::time::Instant;
use tokio::time::Duration;
use tracing::debug;

/// Measures a scope's wall-clock duration and emits it as structured
/// timing fields when dropped. Debug aid only.
pub(crate) struct ScopedTimer {
    task: &'static str,
    started: Instant,
}

impl ScopedTimer {
    pub(crate) fn new(task: &'static str) -> Self {
        Self {
            task,
            started: Instant::now(),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        debug!(
            target: "d_cache::timing",
            task = self.task,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Scope finished"
        );
    }
}
