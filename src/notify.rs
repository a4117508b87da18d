// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Notification events and their envelope
//!
//! Wire format, one JSON object per event:
//!
//! ```text
//! {"type": "UPDATE", "request-id": 1, "subscription-id": 1, "path": "...", "json-data": "7"}
//! {"type": "DELETE", "request-id": 1, "subscription-id": 1, "path": "..."}
//! {"type": "SYNC_RESPONSE", "request-id": 1}
//! ```
//!
//! `json-data` is the leaf value serialized to a JSON string.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datastore::Datastore;
use crate::error::{Result, TelemetryError};

/// Event sent to collectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// A leaf was created or changed, or a heartbeat is due
    #[serde(rename_all = "kebab-case")]
    Update {
        request_id: u64,
        subscription_id: u64,
        path: String,
        json_data: String,
    },
    /// A leaf disappeared
    #[serde(rename_all = "kebab-case")]
    Delete {
        request_id: u64,
        subscription_id: u64,
        path: String,
    },
    /// End of a snapshot
    #[serde(rename_all = "kebab-case")]
    SyncResponse { request_id: u64 },
}

impl Event {
    pub fn update(request_id: u64, subscription_id: u64, path: &str, value: &Value) -> Result<Self> {
        Ok(Self::Update {
            request_id,
            subscription_id,
            path: path.to_string(),
            json_data: serde_json::to_string(value)?,
        })
    }

    pub fn delete(request_id: u64, subscription_id: u64, path: &str) -> Self {
        Self::Delete {
            request_id,
            subscription_id,
            path: path.to_string(),
        }
    }

    pub fn request_id(&self) -> u64 {
        match self {
            Self::Update { request_id, .. }
            | Self::Delete { request_id, .. }
            | Self::SyncResponse { request_id } => *request_id,
        }
    }
}

/// Sends events on the notification namespace (C6)
#[derive(Clone)]
pub struct NotificationEmitter {
    datastore: Arc<dyn Datastore>,
    namespace: String,
}

impl NotificationEmitter {
    pub fn new(datastore: Arc<dyn Datastore>, namespace: impl Into<String>) -> Self {
        Self {
            datastore,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn emit(&self, event: Event) -> Result<()> {
        let body = serde_json::to_value(&event)?;
        self.datastore
            .send_notification(&self.namespace, body)
            .await
            .map_err(|e| match e {
                TelemetryError::Emit(_) => e,
                other => TelemetryError::Emit(other.to_string()),
            })
    }

    /// Emit and log a failure instead of returning it.
    pub async fn emit_logged(&self, event: Event) {
        let request_id = event.request_id();
        if let Err(e) = self.emit(event).await {
            log::error!(
                "Failed to send notification on {} for request {}: {}",
                self.namespace(),
                request_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use serde_json::json;

    #[test]
    fn test_update_envelope() {
        let event = Event::update(1, 2, "/a/b/x", &json!(7)).unwrap();
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "UPDATE", "request-id": 1, "subscription-id": 2, "path": "/a/b/x", "json-data": "7"})
        );
    }

    #[test]
    fn test_update_serializes_structured_values() {
        let event = Event::update(1, 1, "/a/name", &json!("Ethernet1_1")).unwrap();
        match event {
            Event::Update { json_data, .. } => assert_eq!(json_data, "\"Ethernet1_1\""),
            _ => panic!("Expected Update"),
        }
    }

    #[test]
    fn test_delete_and_sync_envelopes() {
        assert_eq!(
            serde_json::to_value(Event::delete(3, 4, "/a/y")).unwrap(),
            json!({"type": "DELETE", "request-id": 3, "subscription-id": 4, "path": "/a/y"})
        );
        assert_eq!(
            serde_json::to_value(Event::SyncResponse { request_id: 3 }).unwrap(),
            json!({"type": "SYNC_RESPONSE", "request-id": 3})
        );
    }

    #[test]
    fn test_event_parses_back() {
        let event: Event =
            serde_json::from_value(json!({"type": "SYNC_RESPONSE", "request-id": 9})).unwrap();
        assert_eq!(event, Event::SyncResponse { request_id: 9 });
        assert_eq!(event.request_id(), 9);
    }

    #[tokio::test]
    async fn test_emit_uses_namespace() {
        let ds = Arc::new(MemoryDatastore::new());
        let emitter = NotificationEmitter::new(ds.clone(), "telemetry-notify-event");
        emitter
            .emit(Event::SyncResponse { request_id: 1 })
            .await
            .unwrap();
        let sent = ds.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].namespace, "telemetry-notify-event");
        assert_eq!(sent[0].event["type"], "SYNC_RESPONSE");
    }

    #[tokio::test]
    async fn test_emit_failure_is_emit_error() {
        let ds = Arc::new(MemoryDatastore::new());
        ds.set_fail_notifications(true);
        let emitter = NotificationEmitter::new(ds.clone(), "ns");
        let err = emitter
            .emit(Event::SyncResponse { request_id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Emit(_)));
        emitter.emit_logged(Event::SyncResponse { request_id: 1 }).await;
        assert!(ds.notifications().is_empty());
    }
}
