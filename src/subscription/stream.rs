// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! STREAM subscriptions
//!
//! Every inner subscription runs in its own task, so events for one
//! `(request, subscription)` pair leave in the order they were observed.
//! SAMPLE entries tick at their sample interval; ON_CHANGE entries poll at the
//! engine minimum with suppression forced on.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::config::{EntryConfig, StreamMode, HEARTBEAT_DISABLED};
use super::{Base, SubscriptionContext};
use crate::error::Result;
use crate::notify::Event;

/// Shortest tick a loop will run at; `interval_at` rejects zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Concrete mode for TARGET_DEFINED entries. Stable for a given path.
pub fn resolve_target_defined(_path: &str) -> StreamMode {
    StreamMode::Sample
}

/// Sampling loop of one inner subscription
pub(crate) struct EntryLoop {
    request_id: u64,
    subscription_id: u64,
    path: String,
    period: Duration,
    suppress: bool,
    heartbeat: Option<Duration>,
    ctx: SubscriptionContext,
}

impl EntryLoop {
    pub(crate) fn new(request_id: u64, entry: &EntryConfig, ctx: SubscriptionContext) -> Self {
        let on_change = entry.mode == Some(StreamMode::OnChange);
        let period = if on_change {
            ctx.min_interval
        } else {
            entry
                .sample_interval
                .map(Duration::from_nanos)
                .unwrap_or(ctx.min_interval * 2)
        };
        if period < MIN_PERIOD {
            log::warn!(
                "Sampling period {:?} of request {} subscription {} raised to {:?}",
                period,
                request_id,
                entry.id,
                MIN_PERIOD
            );
        }
        let period = period.max(MIN_PERIOD);
        let heartbeat = match entry.heartbeat_interval.unwrap_or(HEARTBEAT_DISABLED) {
            HEARTBEAT_DISABLED => None,
            ns => Some(Duration::from_nanos(ns)),
        };
        Self {
            request_id,
            subscription_id: entry.id,
            path: entry.path.clone(),
            period,
            suppress: on_change || entry.suppress_redundant.unwrap_or(false),
            heartbeat,
            ctx,
        }
    }

    /// Tick until cancelled, then drop this subscription's cached leaves.
    pub(crate) async fn run(self, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = self.sample_and_notify() => {}
                    }
                }
            }
        }

        self.ctx
            .store
            .remove_subscription(self.request_id, self.subscription_id);
        log::debug!(
            "Sampling loop for request {} subscription {} stopped",
            self.request_id,
            self.subscription_id
        );
    }

    fn should_notify(&self, path: &str, value: &Value, now: Instant) -> bool {
        if !self.suppress {
            return true;
        }
        match self
            .ctx
            .store
            .get(self.request_id, self.subscription_id, path)
        {
            Ok(prev) => {
                prev.value != *value
                    || self
                        .heartbeat
                        .map_or(false, |hb| now.duration_since(prev.update_time) >= hb)
            }
            // created since the last sample
            Err(_) => true,
        }
    }

    /// One tick: fetch, emit what changed, emit DELETE for what vanished.
    ///
    /// A failed read skips the tick and leaves the cache untouched.
    pub(crate) async fn sample_and_notify(&self) {
        let leaves = match self.ctx.resolver.fetch_and_flatten(&self.path).await {
            Ok(leaves) => leaves,
            Err(e) => {
                log::error!(
                    "Failed to sample request {} subscription {} ({}): {}",
                    self.request_id,
                    self.subscription_id,
                    if e.is_transient() { "skipping tick" } else { "unexpected error" },
                    e
                );
                return;
            }
        };

        let store = &self.ctx.store;
        let previous: BTreeSet<String> = store
            .list(self.request_id, self.subscription_id)
            .into_iter()
            .collect();
        let now = Instant::now();

        for (path, value) in &leaves {
            if !self.should_notify(path, value, now) {
                continue;
            }
            store.set(self.request_id, self.subscription_id, path, value.clone());
            match Event::update(self.request_id, self.subscription_id, path, value) {
                Ok(event) => self.ctx.emitter.emit_logged(event).await,
                Err(e) => log::error!("Cannot encode value of {}: {}", path, e),
            }
        }

        for path in previous.iter().filter(|p| !leaves.contains_key(*p)) {
            let _ = store.delete(self.request_id, self.subscription_id, path);
            self.ctx
                .emitter
                .emit_logged(Event::delete(self.request_id, self.subscription_id, path))
                .await;
        }
    }
}

/// STREAM request: one sampling task per inner subscription
pub struct StreamSubscription {
    pub(crate) base: Base,
    token: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamSubscription {
    pub(crate) fn new(base: Base) -> Self {
        Self {
            base,
            token: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn start(&self) -> Result<()> {
        self.base.snapshot(!self.base.config.updates_only, false).await?;
        self.base.sync_response().await;

        let token = CancellationToken::new();
        let handles: Vec<JoinHandle<()>> = self
            .base
            .config
            .subscriptions
            .iter()
            .map(|entry| {
                let entry_loop = EntryLoop::new(self.base.id(), entry, self.base.ctx.clone());
                tokio::spawn(entry_loop.run(token.clone()))
            })
            .collect();
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
        Ok(())
    }

    /// Cancel the loops and wait for them, bounded by the stop timeout.
    pub(crate) async fn stop(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let stop_timeout = self.base.ctx.stop_timeout;
        for mut handle in handles {
            if tokio::time::timeout(stop_timeout, &mut handle).await.is_err() {
                log::warn!(
                    "Sampling loop of request {} did not stop within {:?}, aborting it",
                    self.base.id(),
                    stop_timeout
                );
                handle.abort();
            }
        }
        self.base.release();
    }

    pub(crate) fn running_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}
