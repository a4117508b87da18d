// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Subscribe requests and their lifecycle
//!
//! A [`Subscription`] is one of three variants:
//!
//! - **ONCE**: snapshot, SYNC_RESPONSE, nothing more
//! - **POLL**: snapshot, SYNC_RESPONSE, then another snapshot on every `poll()`
//! - **STREAM**: snapshot, SYNC_RESPONSE, then one sampling loop per inner
//!   subscription (see [`stream`])
//!
//! Status moves `NEW -> VALIDATED -> RUNNING -> STOPPED`. A stopped
//! subscription can be started again, which is how a reverted delete is
//! undone.

pub mod config;
pub mod stream;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::error::{Result, TelemetryError};
use crate::notify::{Event, NotificationEmitter};
use crate::path::{Leaves, PathResolver};
use crate::store::TelemetryStore;

pub use config::{
    EntryConfig, EntryState, OperationalView, RequestConfig, RequestMode, RequestState, Status,
    StreamMode, SubscriptionState,
};
pub use stream::{resolve_target_defined, StreamSubscription};

/// Collaborators shared by every subscription
#[derive(Clone)]
pub struct SubscriptionContext {
    pub resolver: Arc<PathResolver>,
    pub store: Arc<TelemetryStore>,
    pub emitter: NotificationEmitter,
    /// Engine minimum interval
    pub min_interval: Duration,
    /// Bound on waiting for sampling loops in `stop()`
    pub stop_timeout: Duration,
}

impl SubscriptionContext {
    pub fn min_interval_ns(&self) -> u64 {
        u64::try_from(self.min_interval.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// State common to all variants
pub(crate) struct Base {
    pub(crate) config: RequestConfig,
    pub(crate) ctx: SubscriptionContext,
    status: Mutex<Status>,
}

impl Base {
    fn new(config: RequestConfig, ctx: SubscriptionContext) -> Self {
        Self {
            config,
            ctx,
            status: Mutex::new(Status::New),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.config.id
    }

    fn status(&self) -> Status {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: Status) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Fetch every inner path, record the leaves and optionally emit them.
    ///
    /// All reads complete before the cache is touched, so a failed read
    /// leaves no trace. With `report_deletes`, cached leaves that are gone are
    /// removed and reported after the updates of their subscription.
    pub(crate) async fn snapshot(&self, emit_updates: bool, report_deletes: bool) -> Result<()> {
        let mut fetched: Vec<(u64, Leaves)> = Vec::with_capacity(self.config.subscriptions.len());
        for entry in &self.config.subscriptions {
            fetched.push((entry.id, self.ctx.resolver.fetch_and_flatten(&entry.path).await?));
        }

        let rid = self.id();
        let store = &self.ctx.store;
        for (sid, leaves) in fetched {
            let vanished: Vec<String> = store
                .list(rid, sid)
                .into_iter()
                .filter(|p| !leaves.contains_key(p))
                .collect();
            for (path, value) in &leaves {
                store.set(rid, sid, path, value.clone());
            }
            if emit_updates {
                for (path, value) in &leaves {
                    self.emit_update(sid, path, value).await;
                }
            }
            if report_deletes {
                for path in vanished {
                    let _ = store.delete(rid, sid, &path);
                    self.ctx
                        .emitter
                        .emit_logged(Event::delete(rid, sid, &path))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn emit_update(&self, sid: u64, path: &str, value: &Value) {
        match Event::update(self.id(), sid, path, value) {
            Ok(event) => self.ctx.emitter.emit_logged(event).await,
            Err(e) => log::error!("Cannot encode value of {}: {}", path, e),
        }
    }

    pub(crate) async fn sync_response(&self) {
        self.ctx
            .emitter
            .emit_logged(Event::SyncResponse {
                request_id: self.id(),
            })
            .await;
    }

    /// Drop this request's cached leaves
    pub(crate) fn release(&self) {
        self.ctx.store.remove_request(self.id());
    }

    fn state(&self) -> SubscriptionState {
        SubscriptionState {
            request: RequestState {
                id: self.config.id,
                mode: self.config.mode,
                updates_only: self.config.updates_only,
                status: self.status(),
            },
            entries: self.config.subscriptions.iter().map(EntryState::from).collect(),
        }
    }
}

/// ONCE request
pub struct OnceSubscription {
    base: Base,
}

/// POLL request
pub struct PollSubscription {
    base: Base,
    /// Serializes polls with each other and with `stop()`
    lock: tokio::sync::Mutex<()>,
}

impl PollSubscription {
    async fn poll(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.base.status() != Status::Running {
            return Err(TelemetryError::Unsupported(format!(
                "subscribe-request {} is not running",
                self.base.id()
            )));
        }
        self.base.snapshot(true, true).await?;
        self.base.sync_response().await;
        Ok(())
    }
}

/// A subscribe request (C4)
pub enum Subscription {
    Once(OnceSubscription),
    Poll(PollSubscription),
    Stream(StreamSubscription),
}

impl Subscription {
    pub fn new(config: RequestConfig, ctx: SubscriptionContext) -> Self {
        let base = Base::new(config, ctx);
        match base.config.mode {
            RequestMode::Once => Self::Once(OnceSubscription { base }),
            RequestMode::Poll => Self::Poll(PollSubscription {
                base,
                lock: tokio::sync::Mutex::new(()),
            }),
            RequestMode::Stream => Self::Stream(StreamSubscription::new(base)),
        }
    }

    /// Build a subscription from the payload of a created request entry.
    pub fn from_payload(id: u64, payload: &Value, ctx: SubscriptionContext) -> Result<Self> {
        let config = RequestConfig::parse(id, payload, ctx.min_interval_ns())?;
        Ok(Self::new(config, ctx))
    }

    fn base(&self) -> &Base {
        match self {
            Self::Once(s) => &s.base,
            Self::Poll(s) => &s.base,
            Self::Stream(s) => &s.base,
        }
    }

    pub fn id(&self) -> u64 {
        self.base().id()
    }

    pub fn mode(&self) -> RequestMode {
        self.base().config.mode
    }

    pub fn config(&self) -> &RequestConfig {
        &self.base().config
    }

    pub fn status(&self) -> Status {
        self.base().status()
    }

    /// Check paths and intervals; `NEW -> VALIDATED`.
    pub fn validate(&self) -> Result<()> {
        let base = self.base();
        base.config
            .validate(&base.ctx.resolver, base.ctx.min_interval_ns())?;
        if base.status() == Status::New {
            base.set_status(Status::Validated);
        }
        Ok(())
    }

    /// Initial snapshot, SYNC_RESPONSE, then the steady state of the variant.
    ///
    /// On error nothing has been cached and no loop is running.
    pub async fn start(&self) -> Result<()> {
        let base = self.base();
        if base.status() == Status::Running {
            return Err(TelemetryError::Internal(format!(
                "subscribe-request {} is already running",
                base.id()
            )));
        }
        match self {
            Self::Once(_) | Self::Poll(_) => {
                base.snapshot(!base.config.updates_only, false).await?;
                base.sync_response().await;
            }
            Self::Stream(s) => s.start().await?,
        }
        base.set_status(Status::Running);
        log::info!(
            "Started {} subscribe-request {} with {} subscription(s)",
            base.config.mode,
            base.id(),
            base.config.subscriptions.len()
        );
        Ok(())
    }

    /// Stop loops, wait for them, drop cached leaves; `-> STOPPED`.
    pub async fn stop(&self) {
        let base = self.base();
        let was_running = base.status() == Status::Running;
        match self {
            Self::Once(s) => s.base.release(),
            Self::Poll(s) => {
                // a poll waiting on the lock must see STOPPED once it gets it
                let _guard = s.lock.lock().await;
                s.base.set_status(Status::Stopped);
                s.base.release();
            }
            Self::Stream(s) => s.stop().await,
        }
        base.set_status(Status::Stopped);
        if was_running {
            log::info!("Stopped subscribe-request {}", base.id());
        }
    }

    /// Fresh snapshot of a POLL request.
    pub async fn poll(&self) -> Result<()> {
        match self {
            Self::Poll(s) => s.poll().await,
            other => Err(TelemetryError::Unsupported(format!(
                "poll on {} subscribe-request {}",
                other.mode(),
                other.id()
            ))),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.base().state()
    }

    /// Sampling tasks still running (STREAM only)
    pub fn running_tasks(&self) -> usize {
        match self {
            Self::Stream(s) => s.running_tasks(),
            _ => 0,
        }
    }
}
