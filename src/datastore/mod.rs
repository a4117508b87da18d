// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Interfaces to the central datastore and its schema
//!
//! The engine never owns device state. It reads operational trees, sends
//! notifications and receives configuration changes through [`Datastore`],
//! and resolves paths against the compiled model through [`SchemaContext`].
//!
//! Callbacks from the datastore (change events, operation calls and
//! operational reads) arrive as messages on bounded channels; every message
//! carries a `oneshot` sender for the reply.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, TelemetryError};

pub use memory::{MemoryDatastore, MemorySchema};

/// Access to the central datastore.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Read the operational tree containing `path`.
    ///
    /// The tree is rooted at the unprefixed top-level node name, e.g.
    /// `{"interfaces": {...}}` for `/mod:interfaces/...`. `None` when nothing
    /// exists under the path.
    async fn get_operational(&self, path: &str) -> Result<Option<Value>>;

    /// Fire-and-forget notification on `namespace`.
    async fn send_notification(&self, namespace: &str, event: Value) -> Result<()>;

    /// Change events on the configuration of `module`.
    fn subscribe_module_change(&self, module: &str) -> Result<mpsc::Receiver<ChangeRequest>>;

    /// Calls of the operation `name` (e.g. `/telemetry:poll`).
    fn register_operation(&self, name: &str) -> Result<mpsc::Receiver<OperationCall>>;

    /// Operational reads at or below `path`.
    fn register_operational_reader(&self, path: &str) -> Result<mpsc::Receiver<OperationalRead>>;
}

/// Read-only view of the compiled schema.
pub trait SchemaContext: Send + Sync {
    /// Resolve a top-level node such as `/goldstone-interfaces:interfaces`.
    fn find_node(&self, path: &str) -> Result<&SchemaNode>;

    /// Key names of a list node, in schema order.
    fn list_keys_of(&self, node: &SchemaNode) -> Vec<String>;
}

/// Schema node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    #[default]
    Container,
    List,
    Leaf,
    LeafList,
}

/// A node of the compiled schema tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNode {
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    /// Key leaf names (lists only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn container(name: impl Into<String>, children: Vec<SchemaNode>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Container,
            keys: Vec::new(),
            children,
        }
    }

    pub fn list(name: impl Into<String>, keys: &[&str], children: Vec<SchemaNode>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::List,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            children,
        }
    }

    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Leaf,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn leaf_list(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::LeafList,
            ..Self::leaf(name)
        }
    }

    /// Child by local name; a module prefix on `name` is ignored
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        let local = name.rsplit(':').next().unwrap_or(name);
        self.children.iter().find(|c| c.name == local)
    }
}

/// Kind of a configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One node changed by a configuration transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: String,
    /// New subtree (created/modified)
    pub value: Option<Value>,
    /// Previous subtree (modified/deleted)
    pub prev_value: Option<Value>,
}

impl Change {
    pub fn created(path: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChangeKind::Created,
            path: path.into(),
            value: Some(value),
            prev_value: None,
        }
    }

    pub fn modified(path: impl Into<String>, value: Value, prev_value: Value) -> Self {
        Self {
            kind: ChangeKind::Modified,
            path: path.into(),
            value: Some(value),
            prev_value: Some(prev_value),
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            path: path.into(),
            value: None,
            prev_value: None,
        }
    }
}

/// Phase of a configuration transaction
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Validate and apply; the transaction may still be aborted
    Change { txn: u64, changes: Vec<Change> },
    /// The transaction committed
    Done { txn: u64 },
    /// Another participant failed; undo what `Change` applied
    Abort { txn: u64 },
}

impl ChangeEvent {
    pub fn txn(&self) -> u64 {
        match self {
            Self::Change { txn, .. } | Self::Done { txn } | Self::Abort { txn } => *txn,
        }
    }
}

/// Change event delivered to the server
#[derive(Debug)]
pub struct ChangeRequest {
    pub event: ChangeEvent,
    pub reply: oneshot::Sender<Result<()>>,
}

/// Operation (RPC) invocation
#[derive(Debug)]
pub struct OperationCall {
    pub name: String,
    pub input: Value,
    pub reply: oneshot::Sender<Result<Value>>,
}

/// Operational data read served by the engine
#[derive(Debug)]
pub struct OperationalRead {
    pub path: String,
    pub reply: oneshot::Sender<Result<Value>>,
}

/// Send a request carrying a reply channel and wait for the answer.
pub(crate) async fn round_trip<M, T>(
    tx: &mpsc::Sender<M>,
    build: impl FnOnce(oneshot::Sender<Result<T>>) -> M,
    what: &str,
) -> Result<T> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(build(reply_tx))
        .await
        .map_err(|_| TelemetryError::Internal(format!("{} handler is gone", what)))?;
    reply_rx
        .await
        .map_err(|_| TelemetryError::Internal(format!("{} handler dropped the reply", what)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_ignores_prefix() {
        let node = SchemaNode::container(
            "interfaces",
            vec![SchemaNode::list("interface", &["name"], vec![SchemaNode::leaf("name")])],
        );
        assert!(node.child("interface").is_some());
        assert!(node.child("goldstone-interfaces:interface").is_some());
        assert!(node.child("unknown").is_none());
    }

    #[test]
    fn test_schema_node_from_json() {
        let node: SchemaNode = serde_json::from_value(serde_json::json!({
            "name": "interface",
            "kind": "list",
            "keys": ["name"],
            "children": [{"name": "name", "kind": "leaf"}, {"name": "state"}]
        }))
        .unwrap();
        assert_eq!(node.kind, NodeKind::List);
        assert_eq!(node.keys, vec!["name".to_string()]);
        assert_eq!(node.children[1].kind, NodeKind::Container);
    }

    #[test]
    fn test_change_event_txn() {
        assert_eq!(ChangeEvent::Done { txn: 4 }.txn(), 4);
        assert_eq!(ChangeEvent::Change { txn: 9, changes: vec![] }.txn(), 9);
    }
}
