// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Typed handlers for subscribe-request changes
//!
//! Each change of a transaction becomes one handler with three phases:
//! `validate` (no side effects), `apply` and `revert` (exact inverse of
//! `apply`). Only the list entry
//! `/<module>:subscribe-requests/subscribe-request[id='N']` carries work;
//! everything else is either a no-op or rejected.

use std::sync::Arc;

use serde_json::Value;

use super::TelemetryServer;
use crate::datastore::{Change, ChangeKind};
use crate::error::{Result, TelemetryError};
use crate::path::parse_path;
use crate::subscription::Subscription;

const CONTAINER: &str = "subscribe-requests";
const LIST: &str = "subscribe-request";

/// Where a change lands in the subscribe-request model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The `subscribe-requests` container itself
    Container,
    /// A `subscribe-request[id]` list entry
    Request(u64),
    /// A node below a list entry
    Nested(u64),
    /// Anything else
    Other,
}

impl Target {
    pub fn of(module: &str, path: &str) -> Self {
        let Ok(elems) = parse_path(path) else {
            return Self::Other;
        };
        let Some(head) = elems.first() else {
            return Self::Other;
        };
        if head.prefix.as_deref() != Some(module) || head.name != CONTAINER {
            return Self::Other;
        }
        let Some(entry) = elems.get(1) else {
            return Self::Container;
        };
        let id = entry
            .keys
            .iter()
            .find(|(k, _)| k == "id")
            .and_then(|(_, v)| v.parse::<u64>().ok());
        match id {
            Some(id) if entry.name == LIST && elems.len() == 2 => Self::Request(id),
            Some(id) if entry.name == LIST => Self::Nested(id),
            _ => Self::Other,
        }
    }
}

/// Handler for one change
pub enum ChangeHandler {
    Created {
        id: u64,
        payload: Option<Value>,
        subscription: Option<Arc<Subscription>>,
    },
    Deleted {
        id: u64,
        subscription: Option<Arc<Subscription>>,
    },
    Noop,
}

impl ChangeHandler {
    /// Pick handlers for every change of a transaction.
    pub fn for_changes(module: &str, changes: Vec<Change>) -> Result<Vec<Self>> {
        // request entries created or deleted by this transaction
        let whole: Vec<u64> = changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Modified)
            .filter_map(|c| match Target::of(module, &c.path) {
                Target::Request(id) => Some(id),
                _ => None,
            })
            .collect();

        changes
            .into_iter()
            .map(|change| {
                let target = Target::of(module, &change.path);
                Self::for_change(target, change, &whole)
            })
            .collect()
    }

    fn for_change(target: Target, change: Change, whole: &[u64]) -> Result<Self> {
        let unsupported = |what: &str| -> Result<Self> {
            let msg = format!("{}: {}", what, change.path);
            log::error!("{}", msg);
            Err(TelemetryError::Unsupported(msg))
        };
        match (target, change.kind) {
            (Target::Request(id), ChangeKind::Created) => {
                log::debug!("subscribe-request {} created", id);
                Ok(Self::Created {
                    id,
                    payload: change.value,
                    subscription: None,
                })
            }
            (Target::Request(id), ChangeKind::Deleted) => {
                log::debug!("subscribe-request {} deleted", id);
                Ok(Self::Deleted {
                    id,
                    subscription: None,
                })
            }
            (Target::Request(_), ChangeKind::Modified) => {
                unsupported("subscription modification is not supported")
            }
            (Target::Nested(_), ChangeKind::Modified) => {
                unsupported("subscription modification is not supported")
            }
            (Target::Nested(id), _) if whole.contains(&id) => Ok(Self::Noop),
            (Target::Nested(_), _) => unsupported("subscription modification is not supported"),
            (Target::Container, ChangeKind::Created | ChangeKind::Deleted) => Ok(Self::Noop),
            (_, ChangeKind::Deleted) => Ok(Self::Noop),
            _ => unsupported("unsupported change"),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }

    pub async fn validate(&mut self, server: &TelemetryServer) -> Result<()> {
        match self {
            Self::Created {
                id,
                payload,
                subscription,
            } => {
                if server.subscriptions.contains(*id) {
                    return Err(TelemetryError::ValidationFailed(format!(
                        "subscribe-request {} already exists",
                        id
                    )));
                }
                let payload = payload.as_ref().ok_or_else(|| {
                    TelemetryError::ValidationFailed(format!(
                        "no data for created subscribe-request {}",
                        id
                    ))
                })?;
                let sub = Subscription::from_payload(*id, payload, server.ctx.clone())?;
                sub.validate()?;
                *subscription = Some(Arc::new(sub));
                Ok(())
            }
            Self::Deleted { id, subscription } => {
                let sub = server.subscriptions.get(*id).map_err(|_| {
                    let msg = format!("invalid id {}", id);
                    log::error!("{}", msg);
                    TelemetryError::ValidationFailed(msg)
                })?;
                *subscription = Some(sub);
                Ok(())
            }
            Self::Noop => Ok(()),
        }
    }

    pub async fn apply(&self, server: &TelemetryServer) -> Result<()> {
        match self {
            Self::Created { id, subscription, .. } => {
                let sub = validated(*id, subscription)?;
                server.subscriptions.add(*id, sub.clone())?;
                if let Err(e) = sub.start().await {
                    let _ = server.subscriptions.delete(*id);
                    return Err(e);
                }
                Ok(())
            }
            Self::Deleted { id, subscription } => {
                let sub = validated(*id, subscription)?;
                sub.stop().await;
                server.subscriptions.delete(*id)?;
                Ok(())
            }
            Self::Noop => Ok(()),
        }
    }

    pub async fn revert(&self, server: &TelemetryServer) -> Result<()> {
        match self {
            Self::Created { id, subscription, .. } => {
                let sub = validated(*id, subscription)?;
                sub.stop().await;
                let _ = server.subscriptions.delete(*id);
                Ok(())
            }
            Self::Deleted { id, subscription } => {
                let sub = validated(*id, subscription)?;
                server.subscriptions.add(*id, sub.clone())?;
                sub.start().await
            }
            Self::Noop => Ok(()),
        }
    }
}

fn validated(id: u64, subscription: &Option<Arc<Subscription>>) -> Result<&Arc<Subscription>> {
    subscription.as_ref().ok_or_else(|| {
        TelemetryError::Internal(format!("subscribe-request {} was not validated", id))
    })
}
