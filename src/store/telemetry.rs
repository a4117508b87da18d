// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Last-observed leaf values
//!
//! Entries are bucketed by request id, then subscription id, then leaf path.
//! Each subscription loop is the only writer of its own bucket; the lock only
//! protects the bucket maps themselves.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;
use tokio::time::Instant;

use crate::error::StoreError;

/// Value of one leaf at one moment
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEntry {
    pub value: Value,
    /// When the value was recorded
    pub update_time: Instant,
}

type Leaves = HashMap<String, TelemetryEntry>;

/// Telemetry cache (C2)
#[derive(Debug, Default)]
pub struct TelemetryStore {
    data: RwLock<HashMap<u64, HashMap<u64, Leaves>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for a leaf, stamped with the current time.
    pub fn set(&self, request_id: u64, subscription_id: u64, path: &str, value: Value) {
        let entry = TelemetryEntry {
            value,
            update_time: Instant::now(),
        };
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(request_id)
            .or_default()
            .entry(subscription_id)
            .or_default()
            .insert(path.to_string(), entry);
    }

    pub fn get(
        &self,
        request_id: u64,
        subscription_id: u64,
        path: &str,
    ) -> Result<TelemetryEntry, StoreError> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request_id)
            .and_then(|subs| subs.get(&subscription_id))
            .and_then(|leaves| leaves.get(path))
            .cloned()
            .ok_or_else(|| StoreError::TelemetryNotFound {
                request_id,
                subscription_id,
                path: path.to_string(),
            })
    }

    /// Remove one leaf; empty buckets are dropped with it.
    pub fn delete(&self, request_id: u64, subscription_id: u64, path: &str) -> Result<(), StoreError> {
        let not_found = || StoreError::TelemetryNotFound {
            request_id,
            subscription_id,
            path: path.to_string(),
        };
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let subs = data.get_mut(&request_id).ok_or_else(not_found)?;
        let leaves = subs.get_mut(&subscription_id).ok_or_else(not_found)?;
        leaves.remove(path).ok_or_else(not_found)?;
        if leaves.is_empty() {
            subs.remove(&subscription_id);
            if subs.is_empty() {
                data.remove(&request_id);
            }
        }
        Ok(())
    }

    /// Leaf paths recorded for one subscription, sorted
    pub fn list(&self, request_id: u64, subscription_id: u64) -> Vec<String> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = data
            .get(&request_id)
            .and_then(|subs| subs.get(&subscription_id))
            .map(|leaves| leaves.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Subscription ids holding entries for a request, sorted
    pub fn subscriptions(&self, request_id: u64) -> Vec<u64> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<u64> = data
            .get(&request_id)
            .map(|subs| subs.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Drop every entry of one subscription
    pub fn remove_subscription(&self, request_id: u64, subscription_id: u64) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = data.get_mut(&request_id) {
            subs.remove(&subscription_id);
            if subs.is_empty() {
                data.remove(&request_id);
            }
        }
    }

    /// Drop every entry of one request
    pub fn remove_request(&self, request_id: u64) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);
    }

    pub fn is_empty(&self) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
