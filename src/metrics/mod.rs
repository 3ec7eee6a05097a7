//! Prometheus metrics for the cache
//!
//! All vectors are labelled by resource so several cache instances can
//! share one process. Metric sinks are ambient by convention; nothing in
//! the hot path depends on them being scraped.


use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    /// Successful (re-)initializations of the watch cache.
    pub static ref INITIALIZATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_initializations_total", "Watch cache initializations"),
        &["resource"]
    )
    .expect("metric can not be created");

    /// Events consumed from the watch cache's outbound channel.
    pub static ref EVENTS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_events_processed_total", "Events processed by the dispatcher"),
        &["resource"]
    )
    .expect("metric can not be created");

    /// Current depth of the watch cache -> dispatcher channel.
    pub static ref INCOMING_QUEUE_DEPTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("cache_incoming_queue_depth", "Events queued for dispatch"),
        &["resource"]
    )
    .expect("metric can not be created");

    /// Watchers terminated, split by whether the dispatcher forced the close.
    pub static ref TERMINATED_WATCHERS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_terminated_watchers_total", "Watchers terminated"),
        &["resource", "forced"]
    )
    .expect("metric can not be created");

    /// Bookmark events delivered to watch clients.
    pub static ref BOOKMARKS_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_bookmarks_sent_total", "Bookmark events delivered"),
        &["resource"]
    )
    .expect("metric can not be created");

    /// Lists served from the cache, labelled by the index used ("" = full scan).
    pub static ref LIST_CACHE_COUNT: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_list_total", "List requests served from the cache"),
        &["resource", "index"]
    )
    .expect("metric can not be created");

    pub static ref CACHE_REGISTRY: Registry =
        Registry::new_custom(Some("d_cache".to_string()), None).expect("registry can be created");
}

pub fn register_cache_metrics(registry: &Registry) {
    registry
        .register(Box::new(INITIALIZATIONS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(EVENTS_PROCESSED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(INCOMING_QUEUE_DEPTH.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(TERMINATED_WATCHERS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(BOOKMARKS_SENT.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LIST_CACHE_COUNT.clone()))
        .expect("collector can be registered");
}

/// Text exposition of the cache registry, for embedding into whatever
/// metrics endpoint the host process serves.
pub fn gather_text(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!("could not encode cache metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
