use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::cache::CacheInterval;
use crate::constants::DEADLINE_BOOKMARK_MARGIN;
use crate::constants::WATCH_OUTPUT_BUFFER;
use crate::errors::CacheError;
use crate::event::CacheEvent;
use crate::event::EventType;
use crate::event::WatchEvent;
use crate::metrics;
use crate::object::AttrFilter;

/// Removes the watcher from the registry. Captured at registration so the
/// watcher needs no knowledge of the registry shape; the flag selects
/// whether the input buffer is drained before the client channel closes.
pub(crate) type ForgetFn = Arc<dyn Fn(bool) + Send + Sync>;

/// How long a draining watcher may spend pushing each leftover event to a
/// client that has stopped reading.
const DRAIN_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// One registered watch: the dispatcher-facing bounded input channel plus
/// the state its processing task needs to filter, relabel, and terminate.
pub(crate) struct CacheWatcher {
    input_tx: mpsc::Sender<Arc<CacheEvent>>,
    input_rx: Mutex<Option<mpsc::Receiver<Arc<CacheEvent>>>>,
    filter: AttrFilter,
    deadline: Option<Instant>,
    allow_bookmarks: bool,
    bookmark_after: AtomicU64,
    drain: AtomicBool,
    forced: AtomicBool,
    stopped: AtomicBool,
    done: CancellationToken,
    forget: Mutex<Option<ForgetFn>>,
    identifier: String,
    resource: String,
}

impl CacheWatcher {
    /// Constructing a watcher neither blocks nor makes it visible to the
    /// dispatcher; registration does that separately, under the lock.
    pub(crate) fn new(
        buffer_size: usize,
        filter: AttrFilter,
        deadline: Option<Instant>,
        allow_bookmarks: bool,
        identifier: String,
        resource: String,
    ) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(buffer_size);
        Arc::new(Self {
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            filter,
            deadline,
            allow_bookmarks,
            bookmark_after: AtomicU64::new(0),
            drain: AtomicBool::new(false),
            forced: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            done: CancellationToken::new(),
            forget: Mutex::new(None),
            identifier,
            resource,
        })
    }

    pub(crate) fn set_forget(
        &self,
        forget: ForgetFn,
    ) {
        *self.forget.lock() = Some(forget);
    }

    pub(crate) fn set_bookmark_after(
        &self,
        rv: u64,
    ) {
        self.bookmark_after.store(rv, Ordering::Relaxed);
    }

    pub(crate) fn set_drain(
        &self,
        drain: bool,
    ) {
        self.drain.store(drain, Ordering::Relaxed);
    }

    pub(crate) fn allow_bookmarks(&self) -> bool {
        self.allow_bookmarks
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Mark stopped and wake the processing task. Idempotent.
    pub(crate) fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.done.cancel();
        }
    }

    /// Stop with the forced-close marker; the task delivers an in-band
    /// error before closing.
    pub(crate) fn force_close(&self) {
        self.forced.store(true, Ordering::Relaxed);
        self.stop();
    }

    pub(crate) fn call_forget(
        &self,
        drain: bool,
    ) {
        let forget = self.forget.lock().clone();
        if let Some(forget) = forget {
            forget(drain);
        } else {
            // Never registered; just stop the task.
            self.set_drain(drain);
            self.stop();
        }
    }

    /// Non-blocking delivery attempt from the dispatcher's first pass.
    pub(crate) fn nonblocking_add(
        &self,
        event: &Arc<CacheEvent>,
    ) -> bool {
        self.input_tx.try_send(event.clone()).is_ok()
    }

    /// Budgeted delivery racing the dispatcher's shared deadline. A send
    /// that cannot complete in time reports failure; the dispatcher then
    /// force-closes this watcher.
    pub(crate) async fn add_with_deadline(
        &self,
        event: &Arc<CacheEvent>,
        deadline: Instant,
    ) -> bool {
        matches!(
            tokio::time::timeout_at(deadline, self.input_tx.send(event.clone())).await,
            Ok(Ok(()))
        )
    }

    /// When this watcher should receive its next proactive bookmark: the
    /// earlier of `now + frequency` and a point just before its deadline.
    pub(crate) fn next_bookmark_time(
        &self,
        now: Instant,
        frequency: Duration,
    ) -> Option<Instant> {
        if !self.allow_bookmarks {
            return None;
        }
        let mut next = now + frequency;
        if let Some(deadline) = self.deadline {
            let before_deadline = deadline
                .checked_sub(DEADLINE_BOOKMARK_MARGIN)
                .unwrap_or(deadline);
            next = next.min(before_deadline.max(now));
        }
        Some(next)
    }

    /// Drain the catch-up interval, then serve the live channel until the
    /// watcher terminates. Closes the client channel exactly once, by
    /// dropping the only sender on exit.
    pub(crate) async fn run(
        self: Arc<Self>,
        output: mpsc::Sender<WatchEvent>,
        mut interval: CacheInterval,
        start_rv: u64,
        send_initial_bookmark: bool,
    ) {
        let snapshot_rv = interval.resource_version();
        let mut last_delivered = start_rv;

        // Catch-up phase: interval events are delivered as filtered,
        // without the monotone check. Synthetic initial events all carry
        // the snapshot revision.
        while let Some(event) = interval.next() {
            if self.done.is_cancelled() {
                return;
            }
            last_delivered = last_delivered.max(event.resource_version);
            if let Some(watch_event) = self.convert(&event) {
                if output.send(watch_event).await.is_err() {
                    self.call_forget(false);
                    return;
                }
            }
        }
        last_delivered = last_delivered.max(snapshot_rv);

        if send_initial_bookmark
            && output
                .send(WatchEvent::Bookmark {
                    resource_version: last_delivered,
                })
                .await
                .is_err()
        {
            self.call_forget(false);
            return;
        }

        let mut input = match self.input_rx.lock().take() {
            Some(rx) => rx,
            None => return,
        };

        let deadline_expired = {
            let deadline = self.deadline;
            async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            }
        };
        tokio::pin!(deadline_expired);

        loop {
            tokio::select! {
                biased;

                _ = self.done.cancelled() => {
                    if self.drain.load(Ordering::Relaxed) {
                        self.drain_input(&mut input, &output, &mut last_delivered).await;
                    }
                    if self.forced.load(Ordering::Relaxed) {
                        // Queue the error behind whatever the client has not
                        // drained yet; if the client is gone the send fails
                        // and the channel simply closes.
                        let _ = output
                            .send(WatchEvent::Error(CacheError::ForcedClose(format!(
                                "watcher could not keep up ({})",
                                self.identifier
                            ))))
                            .await;
                    }
                    trace!(watcher = %self.identifier, "Watcher terminated");
                    return;
                }

                _ = &mut deadline_expired => {
                    // Best-effort final bookmark right before the cut.
                    if self.allow_bookmarks {
                        let _ = output.try_send(WatchEvent::Bookmark {
                            resource_version: last_delivered,
                        });
                    }
                    debug!(watcher = %self.identifier, "Watcher deadline reached");
                    self.call_forget(false);
                    return;
                }

                maybe = input.recv() => {
                    let Some(event) = maybe else { return };
                    if !self.deliver(&event, &output, &mut last_delivered).await {
                        self.call_forget(false);
                        return;
                    }
                }
            }
        }
    }

    /// Live-phase delivery with the monotone check. Returns false when the
    /// client side is gone.
    async fn deliver(
        &self,
        event: &Arc<CacheEvent>,
        output: &mpsc::Sender<WatchEvent>,
        last_delivered: &mut u64,
    ) -> bool {
        match event.event_type {
            // Bookmarks may repeat the last delivered revision but never
            // regress below it.
            EventType::Bookmark => {
                if event.resource_version < *last_delivered {
                    return true;
                }
            }
            _ => {
                if event.resource_version <= *last_delivered {
                    return true;
                }
            }
        }
        let Some(watch_event) = self.convert(event) else {
            // Filtered out, but observed: later events must still be newer.
            if event.event_type != EventType::Bookmark {
                *last_delivered = event.resource_version;
            }
            return true;
        };
        *last_delivered = event.resource_version;
        if watch_event.is_bookmark() {
            metrics::BOOKMARKS_SENT.with_label_values(&[&self.resource]).inc();
        }
        output.send(watch_event).await.is_ok()
    }

    async fn drain_input(
        &self,
        input: &mut mpsc::Receiver<Arc<CacheEvent>>,
        output: &mpsc::Sender<WatchEvent>,
        last_delivered: &mut u64,
    ) {
        while let Ok(event) = input.try_recv() {
            if event.resource_version <= *last_delivered {
                continue;
            }
            if let Some(watch_event) = self.convert(&event) {
                *last_delivered = event.resource_version;
                if output
                    .send_timeout(watch_event, DRAIN_SEND_TIMEOUT)
                    .await
                    .is_err()
                {
                    return;
                }
            } else {
                *last_delivered = event.resource_version;
            }
        }
    }

    fn convert(
        &self,
        event: &Arc<CacheEvent>,
    ) -> Option<WatchEvent> {
        convert_event(
            &self.filter,
            self.allow_bookmarks,
            self.bookmark_after.load(Ordering::Relaxed),
            event,
        )
    }
}

/// Filter an assimilated event for one watcher and relabel modifications
/// whose filter membership changed:
/// newly matching updates surface as `Added`, updates that stop matching
/// surface as `Deleted` carrying the previous object at the event revision.
pub(crate) fn convert_event(
    filter: &AttrFilter,
    allow_bookmarks: bool,
    bookmark_after: u64,
    event: &CacheEvent,
) -> Option<WatchEvent> {
    if event.event_type == EventType::Bookmark {
        if !allow_bookmarks || event.resource_version < bookmark_after {
            return None;
        }
        return Some(WatchEvent::Bookmark {
            resource_version: event.resource_version,
        });
    }

    let matched_cur = filter(&event.key, &event.attrs.labels, &event.attrs.fields);
    let matched_prev = event
        .prev_attrs
        .as_ref()
        .map(|attrs| filter(&event.key, &attrs.labels, &attrs.fields))
        .unwrap_or(false);

    let delivered = || event.object.at_resource_version(event.resource_version);
    let delivered_prev = || {
        event
            .prev_object
            .as_ref()
            .map(|prev| prev.at_resource_version(event.resource_version))
            .unwrap_or_else(delivered)
    };

    match event.event_type {
        EventType::Added if matched_cur => Some(WatchEvent::Added(delivered())),
        EventType::Modified => match (matched_prev, matched_cur) {
            (true, true) => Some(WatchEvent::Modified(delivered())),
            (false, true) => Some(WatchEvent::Added(delivered())),
            (true, false) => Some(WatchEvent::Deleted(delivered_prev())),
            (false, false) => None,
        },
        EventType::Deleted if matched_prev => Some(WatchEvent::Deleted(delivered_prev())),
        _ => None,
    }
}

/// Client handle for an accepted watch.
///
/// Events arrive on a bounded channel; dropping the handle (or calling
/// [`WatchHandle::stop`]) unregisters the watcher.
pub struct WatchHandle {
    events: mpsc::Receiver<WatchEvent>,
    watcher: Option<Arc<CacheWatcher>>,
}

impl WatchHandle {
    pub(crate) fn new(
        events: mpsc::Receiver<WatchEvent>,
        watcher: Arc<CacheWatcher>,
    ) -> Self {
        Self {
            events,
            watcher: Some(watcher),
        }
    }

    /// A handle owning only a channel: delegated watches and the
    /// error/immediate-close wire forms.
    pub(crate) fn detached(events: mpsc::Receiver<WatchEvent>) -> Self {
        Self {
            events,
            watcher: None,
        }
    }

    /// Post-acceptance failure wire form: one `Error` event, then closed.
    pub(crate) fn from_error(error: CacheError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(WatchEvent::Error(error));
        Self::detached(rx)
    }

    /// A handle that is already closed, for registrations aborted by a
    /// readiness generation change.
    pub(crate) fn closed() -> Self {
        let (_tx, rx) = mpsc::channel(WATCH_OUTPUT_BUFFER);
        Self::detached(rx)
    }

    /// Next event; `None` once the watch has terminated.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    pub fn receiver_mut(&mut self) -> &mut mpsc::Receiver<WatchEvent> {
        &mut self.events
    }

    pub fn stop(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.call_forget(false);
        }
    }

    /// Adapt the handle into a `Stream` of events. The watch is still
    /// unregistered when the stream is dropped.
    pub fn into_stream(mut self) -> WatchEventStream {
        let events = std::mem::replace(&mut self.events, mpsc::channel(1).1);
        WatchEventStream {
            events: tokio_stream::wrappers::ReceiverStream::new(events),
            watcher: self.watcher.take(),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `Stream` adaptor over a watch handle.
pub struct WatchEventStream {
    events: tokio_stream::wrappers::ReceiverStream<WatchEvent>,
    watcher: Option<Arc<CacheWatcher>>,
}

impl tokio_stream::Stream for WatchEventStream {
    type Item = WatchEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        tokio_stream::Stream::poll_next(std::pin::Pin::new(&mut self.events), cx)
    }
}

impl Drop for WatchEventStream {
    fn drop(&mut self) {
        if let Some(watcher) = &self.watcher {
            watcher.call_forget(false);
        }
    }
}
