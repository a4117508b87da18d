// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Shared harness: an in-memory datastore, a small schema and a server with a
//! one-second minimum interval.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use streamtel::datastore::{Change, ChangeEvent, MemoryDatastore, MemorySchema};
use streamtel::{EngineConfig, SchemaNode, TelemetryServer};

pub const SEC: u64 = 1_000_000_000;
pub const X: &str = "/a/b/c/state/x";
pub const Y: &str = "/a/b/c/state/y";
pub const STATE: &str = "/a/b/c/state";

pub fn schema() -> MemorySchema {
    MemorySchema::new().with_module(
        "t",
        vec![SchemaNode::container(
            "a",
            vec![SchemaNode::container(
                "b",
                vec![SchemaNode::container(
                    "c",
                    vec![SchemaNode::container(
                        "state",
                        vec![SchemaNode::leaf("x"), SchemaNode::leaf("y")],
                    )],
                )],
            )],
        )],
    )
}

/// Operational tree under `/a` with the given state leaves
pub fn state(leaves: Value) -> Value {
    json!({"b": {"c": {"state": leaves}}})
}

pub fn request(mode: &str, entries: Vec<Value>) -> Value {
    let subscription: Vec<Value> = entries
        .into_iter()
        .enumerate()
        .map(|(i, config)| json!({"id": i as u64 + 1, "config": config}))
        .collect();
    json!({
        "config": {"mode": mode},
        "subscriptions": {"subscription": subscription}
    })
}

pub struct Harness {
    pub ds: Arc<MemoryDatastore>,
    pub server: TelemetryServer,
    next_txn: AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        let ds = Arc::new(MemoryDatastore::new());
        ds.set_operational("/a", state(json!({"x": 7})));
        let config = EngineConfig::default().with_min_interval(Duration::from_secs(1));
        let server = TelemetryServer::new(ds.clone(), Arc::new(schema()), config)
            .expect("valid engine config");
        Self {
            ds,
            server,
            next_txn: AtomicU64::new(0),
        }
    }

    async fn commit(&self, changes: Vec<Change>) -> streamtel::Result<()> {
        let txn = self.next_txn.fetch_add(1, Ordering::SeqCst) + 1;
        self.server
            .handle_change(ChangeEvent::Change { txn, changes })
            .await?;
        self.server.handle_change(ChangeEvent::Done { txn }).await
    }

    pub async fn create(&self, id: u64, payload: Value) -> streamtel::Result<()> {
        self.commit(vec![Change::created(self.server.request_path(id), payload)])
            .await
    }

    pub async fn delete(&self, id: u64) -> streamtel::Result<()> {
        self.commit(vec![Change::deleted(self.server.request_path(id))])
            .await
    }

    pub fn set_state(&self, leaves: Value) {
        self.ds.set_operational("/a", state(leaves));
    }

    pub fn events(&self) -> Vec<Value> {
        self.ds
            .notifications()
            .into_iter()
            .map(|n| n.event)
            .collect()
    }

    pub fn events_for(&self, request_id: u64) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e["request-id"] == request_id)
            .collect()
    }

    /// UPDATEs for one leaf
    pub fn updates_of(&self, path: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e["type"] == "UPDATE" && e["path"] == path)
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e["type"] == kind).count()
    }
}

pub fn update(request_id: u64, subscription_id: u64, path: &str, json_data: &str) -> Value {
    json!({
        "type": "UPDATE",
        "request-id": request_id,
        "subscription-id": subscription_id,
        "path": path,
        "json-data": json_data,
    })
}

pub fn delete(request_id: u64, subscription_id: u64, path: &str) -> Value {
    json!({
        "type": "DELETE",
        "request-id": request_id,
        "subscription-id": subscription_id,
        "path": path,
    })
}

pub fn sync(request_id: u64) -> Value {
    json!({"type": "SYNC_RESPONSE", "request-id": request_id})
}
