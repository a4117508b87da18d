// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Telemetry server
//!
//! Drives subscribe requests from configuration changes:
//!
//! - `change`: validate every handler, then apply them in order. A failed
//!   apply reverts the ones already applied and rejects the transaction.
//! - `done`: the transaction committed; handlers are dropped.
//! - `abort`: another participant failed; applied handlers are reverted in
//!   reverse order.
//!
//! If neither `done` nor `abort` arrives within the revert timeout the
//! transaction is reverted as if aborted.
//!
//! The server also serves the `poll` operation and the operational view of
//! the subscribe-request list.

pub mod handler;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::datastore::{
    Change, ChangeEvent, ChangeRequest, Datastore, OperationCall, OperationalRead, SchemaContext,
};
use crate::error::{Result, TelemetryError};
use crate::notify::NotificationEmitter;
use crate::path::PathResolver;
use crate::store::{SubscriptionStore, TelemetryStore};
use crate::subscription::{OperationalView, SubscriptionContext};

pub use handler::{ChangeHandler, Target};

/// Receivers for the datastore callbacks the server answers
pub struct Callbacks {
    changes: mpsc::Receiver<ChangeRequest>,
    calls: mpsc::Receiver<OperationCall>,
    reads: mpsc::Receiver<OperationalRead>,
}

/// Applied handlers waiting for `done` or `abort`
struct PendingTxn {
    txn: u64,
    handlers: Vec<ChangeHandler>,
    deadline: Instant,
}

/// Telemetry server (C5)
pub struct TelemetryServer {
    datastore: Arc<dyn Datastore>,
    config: EngineConfig,
    pub(crate) subscriptions: Arc<SubscriptionStore>,
    pub(crate) ctx: SubscriptionContext,
    pending: Mutex<Option<PendingTxn>>,
}

impl TelemetryServer {
    /// Build a server; the configuration is validated first.
    pub fn new(
        datastore: Arc<dyn Datastore>,
        schema: Arc<dyn SchemaContext>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let resolver = PathResolver::new(datastore.clone(), schema, config.read_timeout());
        let ctx = SubscriptionContext {
            resolver: Arc::new(resolver),
            store: Arc::new(TelemetryStore::new()),
            emitter: NotificationEmitter::new(
                datastore.clone(),
                config.notification_namespace.clone(),
            ),
            min_interval: config.min_interval(),
            stop_timeout: config.stop_timeout(),
        };
        Ok(Self {
            datastore,
            config,
            subscriptions: Arc::new(SubscriptionStore::new()),
            ctx,
            pending: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscription_store(&self) -> &Arc<SubscriptionStore> {
        &self.subscriptions
    }

    pub fn telemetry_store(&self) -> &Arc<TelemetryStore> {
        &self.ctx.store
    }

    /// Name of the poll operation, e.g. `/telemetry:poll`
    pub fn poll_operation(&self) -> String {
        format!("/{}:poll", self.config.module)
    }

    /// Root of the subscribe-request list, e.g. `/telemetry:subscribe-requests`
    pub fn requests_path(&self) -> String {
        format!("/{}:subscribe-requests", self.config.module)
    }

    /// Path of one subscribe-request list entry
    pub fn request_path(&self, id: u64) -> String {
        format!("{}/subscribe-request[id='{}']", self.requests_path(), id)
    }

    /// Handle one phase of a configuration transaction.
    pub async fn handle_change(&self, event: ChangeEvent) -> Result<()> {
        let mut pending = self.pending.lock().await;
        match event {
            ChangeEvent::Change { txn, changes } => {
                if let Some(p) = pending.as_ref() {
                    return Err(TelemetryError::Internal(format!(
                        "transaction {} arrived while transaction {} is pending",
                        txn, p.txn
                    )));
                }
                log::debug!("Transaction {} with {} change(s)", txn, changes.len());
                let handlers = self.apply_changes(changes).await?;
                *pending = Some(PendingTxn {
                    txn,
                    handlers,
                    deadline: Instant::now() + self.config.revert_timeout(),
                });
                Ok(())
            }
            ChangeEvent::Done { txn } => {
                match pending.take() {
                    Some(p) if p.txn == txn => log::debug!("Transaction {} committed", txn),
                    other => {
                        log::warn!("done for unknown transaction {}", txn);
                        *pending = other;
                    }
                }
                Ok(())
            }
            ChangeEvent::Abort { txn } => {
                match pending.take() {
                    Some(p) if p.txn == txn => {
                        log::warn!("Transaction {} aborted, reverting", txn);
                        self.revert_all(&p.handlers).await;
                    }
                    other => {
                        log::warn!("abort for unknown transaction {}", txn);
                        *pending = other;
                    }
                }
                Ok(())
            }
        }
    }

    async fn apply_changes(&self, changes: Vec<Change>) -> Result<Vec<ChangeHandler>> {
        let mut handlers = ChangeHandler::for_changes(&self.config.module, changes)?;
        for handler in handlers.iter_mut() {
            handler.validate(self).await?;
        }
        for (i, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler.apply(self).await {
                log::error!("Failed to apply change: {}", e);
                self.revert_all(&handlers[..i]).await;
                return Err(e);
            }
        }
        Ok(handlers)
    }

    /// Revert handlers in reverse order; failures are logged.
    async fn revert_all(&self, handlers: &[ChangeHandler]) {
        for handler in handlers.iter().rev() {
            if let Err(e) = handler.revert(self).await {
                log::error!("Failed to revert change: {}", e);
            }
        }
    }

    async fn pending_deadline(&self) -> Option<Instant> {
        self.pending.lock().await.as_ref().map(|p| p.deadline)
    }

    /// Revert the pending transaction if its deadline has passed.
    pub async fn expire_pending(&self) {
        let mut pending = self.pending.lock().await;
        if pending.as_ref().map_or(false, |p| p.deadline <= Instant::now()) {
            if let Some(p) = pending.take() {
                log::warn!(
                    "Transaction {} got neither done nor abort within {:?}, reverting",
                    p.txn,
                    self.config.revert_timeout()
                );
                self.revert_all(&p.handlers).await;
            }
        }
    }

    /// Fresh snapshot of POLL request `id`.
    pub async fn poll(&self, id: u64) -> Result<()> {
        log::info!("Poll request for {}", id);
        let subscription = self.subscriptions.get(id)?;
        subscription.poll().await
    }

    /// Dispatch an operation call.
    pub async fn handle_operation(&self, name: &str, input: Value) -> Result<Value> {
        if name != self.poll_operation() {
            return Err(TelemetryError::NotFound(format!("operation {}", name)));
        }
        let id = input
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| TelemetryError::ValidationFailed("poll requires an id".into()))?;
        self.poll(id).await?;
        Ok(json!({}))
    }

    /// Operational view of every registered request
    pub fn operational_state(&self) -> OperationalView {
        let states = self
            .subscriptions
            .list()
            .into_iter()
            .filter_map(|id| self.subscriptions.get(id).ok())
            .map(|s| s.state())
            .collect();
        OperationalView::new(states)
    }

    pub fn read_operational(&self, path: &str) -> Result<Value> {
        log::debug!("Operational read of {}", path);
        Ok(serde_json::to_value(self.operational_state())?)
    }

    /// Stop every subscription, then empty the registry.
    pub async fn stop(&self) {
        if let Some(p) = self.pending.lock().await.take() {
            log::debug!("Dropping pending transaction {} at shutdown", p.txn);
        }
        for id in self.subscriptions.list() {
            if let Ok(subscription) = self.subscriptions.get(id) {
                subscription.stop().await;
            }
        }
        self.subscriptions.clear();
        log::info!("Telemetry server stopped");
    }

    /// Register the change subscription, the poll operation and the
    /// operational reader with the datastore.
    pub fn register(&self) -> Result<Callbacks> {
        Ok(Callbacks {
            changes: self.datastore.subscribe_module_change(&self.config.module)?,
            calls: self.datastore.register_operation(&self.poll_operation())?,
            reads: self
                .datastore
                .register_operational_reader(&self.requests_path())?,
        })
    }

    /// Serve callbacks until `shutdown` is cancelled or the change stream
    /// closes, then stop every subscription.
    pub async fn serve(&self, callbacks: Callbacks, shutdown: CancellationToken) -> Result<()> {
        let Callbacks {
            mut changes,
            mut calls,
            mut reads,
        } = callbacks;
        log::info!(
            "Telemetry server started on module {} (minimum interval {:?})",
            self.config.module,
            self.config.min_interval()
        );

        loop {
            let deadline = self.pending_deadline().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = changes.recv() => {
                    let Some(request) = request else {
                        log::warn!("Change stream closed");
                        break;
                    };
                    let txn = request.event.txn();
                    let result = self.handle_change(request.event).await;
                    if let Err(e) = &result {
                        log::error!("Transaction {} rejected: {}", txn, e);
                    }
                    let _ = request.reply.send(result);
                }
                Some(call) = calls.recv() => {
                    let result = self.handle_operation(&call.name, call.input).await;
                    let _ = call.reply.send(result);
                }
                Some(read) = reads.recv() => {
                    let _ = read.reply.send(self.read_operational(&read.path));
                }
                _ = wait_until(deadline) => self.expire_pending().await,
            }
        }

        self.stop().await;
        Ok(())
    }

    /// [`register`](Self::register) then [`serve`](Self::serve).
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let callbacks = self.register()?;
        self.serve(callbacks, shutdown).await
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{MemoryDatastore, MemorySchema, SchemaNode};
    use crate::subscription::Status;
    use std::time::Duration;

    fn entry(id: u64) -> String {
        format!("/telemetry:subscribe-requests/subscribe-request[id='{}']", id)
    }

    fn once(path: &str) -> Value {
        json!({
            "config": {"mode": "ONCE"},
            "subscriptions": {"subscription": [{"id": 1, "config": {"path": path}}]}
        })
    }

    fn server() -> (Arc<MemoryDatastore>, TelemetryServer) {
        let ds = Arc::new(MemoryDatastore::new());
        ds.set_operational("/t:a", json!({"state": {"x": 7}}));
        let schema = MemorySchema::new().with_module(
            "t",
            vec![
                SchemaNode::container(
                    "a",
                    vec![SchemaNode::container("state", vec![SchemaNode::leaf("x")])],
                ),
                SchemaNode::container("b", vec![]),
            ],
        );
        let config = EngineConfig::default().with_min_interval(Duration::from_secs(1));
        let server = TelemetryServer::new(ds.clone(), Arc::new(schema), config).unwrap();
        (ds, server)
    }

    fn change(txn: u64, changes: Vec<Change>) -> ChangeEvent {
        ChangeEvent::Change { txn, changes }
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_then_done() {
        let (ds, server) = server();
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        server.handle_change(ChangeEvent::Done { txn: 1 }).await.unwrap();
        assert_eq!(server.subscription_store().list(), vec![1]);
        assert_eq!(ds.notifications().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_reverts_created() {
        let (_ds, server) = server();
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        server.handle_change(ChangeEvent::Abort { txn: 1 }).await.unwrap();
        assert!(server.subscription_store().list().is_empty());
        assert!(server.telemetry_store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_apply_reverts_earlier_handlers() {
        let (ds, server) = server();
        // second request has a valid path but its data holds a list the schema lacks
        ds.set_operational("/t:b", json!({"extra": [{"k": 1}]}));
        let changes = vec![
            Change::created(entry(1), once("/t:a")),
            Change::created(entry(2), once("/t:b")),
        ];
        let err = server.handle_change(change(1, changes)).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Internal(_)));
        assert!(server.subscription_store().list().is_empty());
        assert!(server.telemetry_store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_is_validation_failure() {
        let (_ds, server) = server();
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        server.handle_change(ChangeEvent::Done { txn: 1 }).await.unwrap();
        let err = server
            .handle_change(change(2, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ValidationFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_while_pending_is_internal() {
        let (_ds, server) = server();
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        let err = server
            .handle_change(change(2, vec![Change::created(entry(2), once("/t:a"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Internal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_expires_and_reverts() {
        let (_ds, server) = server();
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        server.expire_pending().await;
        assert_eq!(server.subscription_store().list(), vec![1]);

        tokio::time::advance(server.config().revert_timeout()).await;
        server.expire_pending().await;
        assert!(server.subscription_store().list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_revert_restarts() {
        let (ds, server) = server();
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        server.handle_change(ChangeEvent::Done { txn: 1 }).await.unwrap();

        server
            .handle_change(change(2, vec![Change::deleted(entry(1))]))
            .await
            .unwrap();
        assert!(server.subscription_store().list().is_empty());
        ds.clear_notifications();

        server.handle_change(ChangeEvent::Abort { txn: 2 }).await.unwrap();
        let sub = server.subscription_store().get(1).unwrap();
        assert_eq!(sub.status(), Status::Running);
        assert_eq!(ds.notifications().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_unknown_id() {
        let (_ds, server) = server();
        let err = server
            .handle_change(change(1, vec![Change::deleted(entry(9))]))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ValidationFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors() {
        let (_ds, server) = server();
        assert!(matches!(server.poll(5).await, Err(TelemetryError::NotFound(_))));
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        assert!(matches!(server.poll(1).await, Err(TelemetryError::Unsupported(_))));
        let err = server
            .handle_operation("/telemetry:poll", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ValidationFailed(_)));
        assert!(server
            .handle_operation("/telemetry:other", json!({"id": 1}))
            .await
            .is_err());
    }

    #[test]
    fn test_zero_min_interval_is_rejected() {
        let config = EngineConfig {
            min_interval_ms: 0,
            ..EngineConfig::default()
        };
        let result = TelemetryServer::new(
            Arc::new(MemoryDatastore::new()),
            Arc::new(MemorySchema::new()),
            config,
        );
        assert!(matches!(result, Err(TelemetryError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_everything() {
        let (_ds, server) = server();
        server
            .handle_change(change(1, vec![Change::created(entry(1), once("/t:a"))]))
            .await
            .unwrap();
        server.stop().await;
        assert!(server.subscription_store().list().is_empty());
        assert!(server.telemetry_store().is_empty());
        assert_eq!(server.read_operational("/telemetry:subscribe-requests").unwrap(), json!({}));
    }
}
