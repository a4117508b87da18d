// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! In-memory datastore and schema
//!
//! Used by the daemon binary to serve operational data loaded from JSON, and
//! by the test suite as a fully scriptable collaborator: trees can be swapped
//! at any time, reads and notifications can be made to fail, and every
//! notification is recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    round_trip, Change, ChangeEvent, ChangeRequest, Datastore, OperationCall, OperationalRead,
    SchemaContext, SchemaNode,
};
use crate::error::{Result, TelemetryError};

/// Capacity of the callback channels handed to the server
const CALLBACK_CHANNEL_CAPACITY: usize = 32;

/// Split `/module:name...` into the optional module and the local name of the
/// first path element.
fn top_level(path: &str) -> Option<(Option<&str>, &str)> {
    let first = path.trim_start_matches('/').split('/').next()?;
    let first = first.split('[').next().unwrap_or(first);
    if first.is_empty() {
        return None;
    }
    Some(match first.split_once(':') {
        Some((module, name)) => (Some(module), name),
        None => (None, first),
    })
}

/// Top-level nodes of one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaModule {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<SchemaNode>,
}

/// Schema held in memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySchema {
    #[serde(default)]
    pub modules: Vec<SchemaModule>,
}

impl MemorySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module with its top-level nodes
    pub fn with_module(mut self, name: impl Into<String>, nodes: Vec<SchemaNode>) -> Self {
        self.modules.push(SchemaModule {
            name: name.into(),
            nodes,
        });
        self
    }

    /// Parse from JSON: `{"modules": [{"name": ..., "nodes": [...]}]}`
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_json_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::Configuration(format!("Cannot read {}: {}", path, e)))?;
        Self::from_json(&content)
    }
}

impl SchemaContext for MemorySchema {
    fn find_node(&self, path: &str) -> Result<&SchemaNode> {
        let (module, name) = top_level(path)
            .ok_or_else(|| TelemetryError::NotFound(format!("schema node for {:?}", path)))?;
        self.modules
            .iter()
            .filter(|m| module.map_or(true, |module| m.name == module))
            .flat_map(|m| m.nodes.iter())
            .find(|n| n.name == name)
            .ok_or_else(|| TelemetryError::NotFound(format!("schema node for {}", path)))
    }

    fn list_keys_of(&self, node: &SchemaNode) -> Vec<String> {
        node.keys.clone()
    }
}

/// A notification as recorded by [`MemoryDatastore`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub namespace: String,
    pub event: Value,
}

/// Datastore held in memory
#[derive(Default)]
pub struct MemoryDatastore {
    /// Operational trees by unprefixed top-level node name
    operational: RwLock<HashMap<String, Value>>,
    sent: Mutex<Vec<SentNotification>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<SentNotification>>>,
    change_subscribers: Mutex<HashMap<String, mpsc::Sender<ChangeRequest>>>,
    operations: Mutex<HashMap<String, mpsc::Sender<OperationCall>>>,
    readers: Mutex<Vec<(String, mpsc::Sender<OperationalRead>)>>,
    fail_reads: AtomicBool,
    fail_notifications: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    next_txn: AtomicU64,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the operational tree under a top-level node (`/module:name`).
    pub fn set_operational(&self, path: &str, tree: Value) {
        if let Some((_, name)) = top_level(path) {
            self.operational
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.to_string(), tree);
        }
    }

    pub fn remove_operational(&self, path: &str) {
        if let Some((_, name)) = top_level(path) {
            self.operational
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name);
        }
    }

    /// Load every `"module:name": tree` member of a JSON object. A `null`
    /// tree removes the node.
    pub fn load_operational(&self, data: &Value) -> Result<()> {
        let obj = data.as_object().ok_or_else(|| {
            TelemetryError::Configuration("operational data must be a JSON object".into())
        })?;
        for (path, tree) in obj {
            match tree {
                Value::Null => self.remove_operational(path),
                tree => self.set_operational(path, tree.clone()),
            }
        }
        Ok(())
    }

    /// Make every `get_operational` fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `send_notification` fail (or succeed again).
    pub fn set_fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    /// Delay every `get_operational` by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Every notification delivered so far
    pub fn notifications(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_notifications(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Stream of notifications delivered from now on
    pub fn watch_notifications(&self) -> mpsc::UnboundedReceiver<SentNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn change_sender(&self, module: &str) -> Result<mpsc::Sender<ChangeRequest>> {
        self.change_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
            .ok_or_else(|| TelemetryError::NotFound(format!("change subscriber for {}", module)))
    }

    async fn send_event(&self, module: &str, event: ChangeEvent) -> Result<()> {
        let tx = self.change_sender(module)?;
        round_trip(&tx, |reply| ChangeRequest { event, reply }, "change").await
    }

    /// Deliver the `change` phase of a new transaction; returns its id.
    pub async fn send_change(&self, module: &str, changes: Vec<Change>) -> Result<u64> {
        let txn = self.next_txn.fetch_add(1, Ordering::SeqCst) + 1;
        self.send_event(module, ChangeEvent::Change { txn, changes })
            .await?;
        Ok(txn)
    }

    pub async fn send_done(&self, module: &str, txn: u64) -> Result<()> {
        self.send_event(module, ChangeEvent::Done { txn }).await
    }

    pub async fn send_abort(&self, module: &str, txn: u64) -> Result<()> {
        self.send_event(module, ChangeEvent::Abort { txn }).await
    }

    /// Commit a set of changes: `change`, then `done` if it was accepted.
    pub async fn apply_changes(&self, module: &str, changes: Vec<Change>) -> Result<()> {
        let txn = self.send_change(module, changes).await?;
        self.send_done(module, txn).await
    }

    /// Invoke a registered operation.
    pub async fn call_operation(&self, name: &str, input: Value) -> Result<Value> {
        let tx = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| TelemetryError::NotFound(format!("operation {}", name)))?;
        let name = name.to_string();
        round_trip(&tx, |reply| OperationCall { name, input, reply }, "operation").await
    }

    /// Read operational data served by a registered reader.
    pub async fn read_operational(&self, path: &str) -> Result<Value> {
        let tx = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| TelemetryError::NotFound(format!("operational reader for {}", path)))?;
        let path = path.to_string();
        round_trip(&tx, |reply| OperationalRead { path, reply }, "operational reader").await
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_operational(&self, path: &str) -> Result<Option<Value>> {
        let delay = *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TelemetryError::Datastore(format!("read of {} failed", path)));
        }
        let (_, name) = top_level(path)
            .ok_or_else(|| TelemetryError::Datastore(format!("malformed path {:?}", path)))?;
        let trees = self.operational.read().unwrap_or_else(PoisonError::into_inner);
        Ok(trees.get(name).map(|tree| {
            let mut root = serde_json::Map::new();
            root.insert(name.to_string(), tree.clone());
            Value::Object(root)
        }))
    }

    async fn send_notification(&self, namespace: &str, event: Value) -> Result<()> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(TelemetryError::Emit(format!("{} is unavailable", namespace)));
        }
        let notification = SentNotification {
            namespace: namespace.to_string(),
            event,
        };
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(notification.clone()).is_ok());
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }

    fn subscribe_module_change(&self, module: &str) -> Result<mpsc::Receiver<ChangeRequest>> {
        let (tx, rx) = mpsc::channel(CALLBACK_CHANNEL_CAPACITY);
        self.change_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.to_string(), tx);
        Ok(rx)
    }

    fn register_operation(&self, name: &str) -> Result<mpsc::Receiver<OperationCall>> {
        let (tx, rx) = mpsc::channel(CALLBACK_CHANNEL_CAPACITY);
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), tx);
        Ok(rx)
    }

    fn register_operational_reader(&self, path: &str) -> Result<mpsc::Receiver<OperationalRead>> {
        let (tx, rx) = mpsc::channel(CALLBACK_CHANNEL_CAPACITY);
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_string(), tx));
        Ok(rx)
    }
}
