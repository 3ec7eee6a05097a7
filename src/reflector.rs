//! Reflector: the single writer populating the watch cache
//!
//! One long-running task per cache: a paginated list of the resource
//! prefix replaces the cache contents (flipping readiness on), then a
//! continuous watch from the list revision feeds every observed change
//! into the cache in revision order. Any disconnect flips readiness off,
//! terminates the registered watchers, and re-lists after a backoff.

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::dispatch::cacher::CacherInner;
use crate::errors::StorageError;
use crate::event::EventType;
use crate::object::Object;
use crate::object::Predicate;
use crate::storage::ListOptions;
use crate::storage::WatchOptions;
use crate::Result;

pub(crate) async fn run(inner: Arc<CacherInner>) {
    let initial_backoff = inner.config.relist_backoff_initial();
    let max_backoff = inner.config.relist_backoff_max();
    let mut backoff = initial_backoff;

    loop {
        if inner.stop_token.is_cancelled() {
            return;
        }
        // Watchers from a previous cache generation cannot continue across
        // the re-list boundary.
        inner.terminate_all_watchers();

        let mut listed = false;
        let result = list_and_watch(&inner, &mut listed).await;
        if inner.ready.check() {
            inner.ready.set(false);
            inner.terminate_all_watchers();
        }
        match result {
            Ok(()) => return, // stop requested
            Err(e) => {
                warn!(resource = %inner.resource, error = %e, "Reflector disconnected; will re-list");
            }
        }

        backoff = if listed { initial_backoff } else { (backoff * 2).min(max_backoff) };
        tokio::select! {
            _ = inner.stop_token.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// One reflector cycle: paginated list, Replace, then watch until the
/// stream breaks. Returns Ok only when a stop was requested.
async fn list_and_watch(
    inner: &Arc<CacherInner>,
    listed: &mut bool,
) -> Result<()> {
    let (items, list_rv) = list_all(inner).await?;
    info!(
        resource = %inner.resource,
        rv = list_rv,
        objects = items.len(),
        "Reflector listed"
    );
    inner.watch_cache.replace(items, list_rv);
    *listed = true;

    let mut watch = inner
        .store
        .watch(
            &inner.resource_prefix,
            WatchOptions {
                resource_version: list_rv.to_string(),
                predicate: Predicate::everything(),
                progress_notify: true,
                ..Default::default()
            },
        )
        .await?;

    loop {
        tokio::select! {
            _ = inner.stop_token.cancelled() => {
                watch.stop();
                return Ok(());
            }
            maybe = watch.events.recv() => {
                match maybe {
                    Some(Ok(event)) => {
                        let rv = event.resource_version();
                        match event.event_type {
                            EventType::Bookmark => {
                                inner.watch_cache.update_resource_version(rv).await?;
                            }
                            _ => {
                                debug!(
                                    resource = %inner.resource,
                                    rv,
                                    key = %event.object.key,
                                    "Reflector observed change"
                                );
                                inner.watch_cache.assimilate(event).await?;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(resource = %inner.resource, error = %e, "Watch stream error");
                        return Err(e.into());
                    }
                    None => {
                        return Err(StorageError::Disconnected(
                            "watch stream ended".to_string(),
                        )
                        .into());
                    }
                }
            }
        }
    }
}

/// Paginated full list of the resource prefix.
async fn list_all(inner: &Arc<CacherInner>) -> Result<(Vec<Object>, u64)> {
    let _timer = crate::utils::ScopedTimer::new("reflector.list");
    let mut items = Vec::new();
    let mut continue_token = None;
    let mut list_rv = 0;
    loop {
        let page = inner
            .store
            .get_list(
                &inner.resource_prefix,
                ListOptions {
                    limit: inner.config.list_page_size,
                    continue_token: continue_token.take(),
                    ..Default::default()
                },
            )
            .await?;
        items.extend(page.items);
        list_rv = page.resource_version;
        match page.continue_token {
            Some(token) => continue_token = Some(token),
            None => break,
        }
        tokio::task::yield_now().await;
    }
    Ok((items, list_rv))
}
