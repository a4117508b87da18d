// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Registry of live subscribe requests (C3)
//!
//! The registry only holds subscriptions. Starting and stopping them is the
//! server's job, which stops a subscription before removing it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::StoreError;
use crate::subscription::Subscription;

/// Subscribe requests by id
#[derive(Debug)]
pub struct SubscriptionStore<T = Subscription> {
    entries: RwLock<HashMap<u64, Arc<T>>>,
}

impl<T> Default for SubscriptionStore<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> SubscriptionStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; an id can only be registered once.
    pub fn add(&self, id: u64, subscription: Arc<T>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&id) {
            return Err(StoreError::SubscriptionExists(id));
        }
        entries.insert(id, subscription);
        Ok(())
    }

    pub fn delete(&self, id: u64) -> Result<Arc<T>, StoreError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(StoreError::SubscriptionNotFound(id))
    }

    pub fn get(&self, id: u64) -> Result<Arc<T>, StoreError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(StoreError::SubscriptionNotFound(id))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Registered ids, sorted
    pub fn list(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Remove everything, returning what was registered
    pub fn clear(&self) -> Vec<(u64, Arc<T>)> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect()
    }
}
