use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use super::cacher::CacherInner;
use super::watcher::CacheWatcher;
use crate::constants::BOOKMARK_TICK;
use crate::constants::BOOKMARK_TICK_JITTER;
use crate::event::CacheEvent;
use crate::event::EventType;
use crate::metrics;
use crate::utils::jitter;

impl CacherInner {
    /// The single consumer loop over the watch cache's outbound channel.
    ///
    /// Object events fan out to the interested watchers; bookmarks arriving
    /// from the storage layer are consumed for revision bookkeeping only.
    /// The loop synthesises its own bookmark on a jittered ~1s tick once it
    /// has processed at least one real event.
    pub(crate) async fn dispatch_events(
        self: Arc<Self>,
        mut incoming: mpsc::Receiver<Arc<CacheEvent>>,
    ) {
        debug!(resource = %self.resource, "Dispatcher started");
        let mut last_processed_rv = 0u64;
        let tick = tokio::time::sleep(jitter(BOOKMARK_TICK, BOOKMARK_TICK_JITTER));
        tokio::pin!(tick);

        loop {
            tokio::select! {
                _ = self.stop_token.cancelled() => break,

                maybe = incoming.recv() => {
                    let Some(event) = maybe else { break };
                    self.watch_cache.record_incoming_depth();
                    if event.event_type != EventType::Bookmark {
                        self.dispatch_event(&event).await;
                    }
                    last_processed_rv = event.resource_version;
                    metrics::EVENTS_PROCESSED
                        .with_label_values(&[&self.resource])
                        .inc();
                }

                _ = &mut tick => {
                    tick.as_mut().reset(Instant::now() + jitter(BOOKMARK_TICK, BOOKMARK_TICK_JITTER));
                    // No bookmark promises before the first real event; the
                    // buckets are still drained so they cannot accumulate.
                    if last_processed_rv == 0 {
                        let _ = self.bookmark_watchers.pop_expired();
                        continue;
                    }
                    let bookmark = Arc::new(CacheEvent::bookmark(last_processed_rv));
                    self.dispatch_event(&bookmark).await;
                }
            }
        }
        debug!(resource = %self.resource, "Dispatcher stopped");
    }

    /// Deliver one event: a non-blocking pass first, then one budgeted
    /// blocking pass where every still-blocked watcher races a shared
    /// deadline. Watchers that miss the deadline are force-closed.
    pub(crate) async fn dispatch_event(
        &self,
        event: &Arc<CacheEvent>,
    ) {
        let targets = self.start_dispatching(event);

        if event.event_type == EventType::Bookmark {
            // Bookmarks are never delivered via blocking send; a watcher
            // with a full buffer misses this one.
            for watcher in &targets {
                watcher.nonblocking_add(event);
            }
        } else {
            let mut blocked: Vec<Arc<CacheWatcher>> = Vec::new();
            for watcher in &targets {
                if !watcher.nonblocking_add(event) {
                    blocked.push(watcher.clone());
                }
            }

            if blocked.is_empty() {
                self.budget.replenish();
            } else {
                let timeout = self.budget.take_available();
                let started = Instant::now();
                let deadline = started + timeout;
                for watcher in blocked {
                    if !watcher.add_with_deadline(event, deadline).await {
                        warn!(
                            resource = %self.resource,
                            rv = event.resource_version,
                            "Forcing slow watcher to close"
                        );
                        metrics::TERMINATED_WATCHERS
                            .with_label_values(&[&self.resource, "true"])
                            .inc();
                        watcher.force_close();
                        watcher.call_forget(false);
                    }
                }
                self.budget
                    .return_unused(timeout.saturating_sub(started.elapsed()));
            }
        }

        self.finish_dispatching();
    }

    /// Select the watchers potentially interested in the event and mark
    /// dispatching as in flight. Trigger values are computed outside the
    /// lock; only this task touches the event at this point.
    fn start_dispatching(
        &self,
        event: &Arc<CacheEvent>,
    ) -> Vec<Arc<CacheWatcher>> {
        let trigger_values = self.trigger_values(event);

        let mut state = self.state.lock();
        state.dispatching = true;
        let mut buffer = Vec::new();

        if event.event_type == EventType::Bookmark {
            for watcher in self.bookmark_watchers.pop_expired() {
                if watcher.is_stopped() {
                    continue;
                }
                buffer.push(watcher.clone());
                state.expired_bookmarks.push(watcher);
            }
            return buffer;
        }

        state
            .watchers
            .collect_scoped(&event.namespace, &event.name, &mut buffer);
        state
            .watchers
            .collect_values(trigger_values.as_deref(), &mut buffer);
        buffer
    }

    /// Run the stops deferred during dispatch and re-queue the watchers
    /// that just received their scheduled bookmark.
    fn finish_dispatching(&self) {
        let mut state = self.state.lock();
        state.dispatching = false;
        for watcher in std::mem::take(&mut state.to_stop) {
            watcher.stop();
        }
        for watcher in std::mem::take(&mut state.expired_bookmarks) {
            if !watcher.is_stopped() {
                self.bookmark_watchers.add_watcher(&watcher);
            }
        }
    }
}
