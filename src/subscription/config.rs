// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Subscribe-request model
//!
//! A request arrives as the JSON subtree of one
//! `subscribe-requests/subscribe-request[id]` list entry:
//!
//! ```text
//! {"id": 1,
//!  "config": {"id": 1, "mode": "STREAM", "updates-only": false},
//!  "subscriptions": {"subscription": [
//!     {"id": 1, "config": {"id": 1, "path": "/...", "mode": "SAMPLE",
//!                          "sample-interval": 10000000000}}]}}
//! ```
//!
//! Intervals are nanoseconds.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::stream::resolve_target_defined;
use crate::error::{Result, TelemetryError};
use crate::path::PathResolver;

/// Heartbeat interval meaning "no heartbeat"
pub const HEARTBEAT_DISABLED: u64 = 0;

/// Request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestMode {
    Stream,
    Once,
    Poll,
}

impl FromStr for RequestMode {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STREAM" => Ok(Self::Stream),
            "ONCE" => Ok(Self::Once),
            "POLL" => Ok(Self::Poll),
            other => Err(TelemetryError::ValidationFailed(format!("invalid mode {}", other))),
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "STREAM",
            Self::Once => "ONCE",
            Self::Poll => "POLL",
        })
    }
}

/// Mode of one inner subscription of a STREAM request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamMode {
    OnChange,
    Sample,
    TargetDefined,
}

impl FromStr for StreamMode {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ON_CHANGE" => Ok(Self::OnChange),
            "SAMPLE" => Ok(Self::Sample),
            "TARGET_DEFINED" => Ok(Self::TargetDefined),
            other => Err(TelemetryError::ValidationFailed(format!(
                "invalid subscription mode {}",
                other
            ))),
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OnChange => "ON_CHANGE",
            Self::Sample => "SAMPLE",
            Self::TargetDefined => "TARGET_DEFINED",
        })
    }
}

/// Live status of a subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    New,
    Validated,
    Running,
    Stopped,
}

// Raw change payload. Everything is optional so missing fields can be
// reported as validation failures rather than decode errors.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawRequest {
    config: Option<RawRequestConfig>,
    subscriptions: Option<RawEntries>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawRequestConfig {
    mode: Option<String>,
    updates_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntries {
    #[serde(default)]
    subscription: Vec<RawEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntry {
    id: Option<u64>,
    #[serde(default)]
    config: RawEntryConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawEntryConfig {
    path: Option<String>,
    mode: Option<String>,
    sample_interval: Option<u64>,
    suppress_redundant: Option<bool>,
    heartbeat_interval: Option<u64>,
}

/// One inner subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryConfig {
    pub id: u64,
    pub path: String,
    pub mode: Option<StreamMode>,
    pub sample_interval: Option<u64>,
    pub suppress_redundant: Option<bool>,
    pub heartbeat_interval: Option<u64>,
}

/// A parsed subscribe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfig {
    pub id: u64,
    pub mode: RequestMode,
    pub updates_only: bool,
    pub subscriptions: Vec<EntryConfig>,
}

fn invalid(msg: String) -> TelemetryError {
    log::error!("Subscription config validation failed: {}", msg);
    TelemetryError::ValidationFailed(msg)
}

impl RequestConfig {
    /// Parse the payload of request `id`.
    ///
    /// STREAM entries get their defaults filled in: a sample interval of twice
    /// the engine minimum, no suppression, no heartbeat. TARGET_DEFINED is
    /// resolved to a concrete mode here.
    pub fn parse(id: u64, payload: &Value, min_interval_ns: u64) -> Result<Self> {
        let raw: RawRequest = serde_json::from_value(payload.clone())
            .map_err(|e| invalid(format!("malformed subscribe-request {}: {}", id, e)))?;

        let config = raw.config.unwrap_or_default();
        let mode: RequestMode = config
            .mode
            .as_deref()
            .ok_or_else(|| invalid("mode should be specified".into()))?
            .parse()?;

        let mut seen = HashSet::new();
        let mut subscriptions = Vec::new();
        for entry in raw.subscriptions.unwrap_or_default().subscription {
            let Some(entry_id) = entry.id else {
                log::debug!("ignoring subscription without id in request {}", id);
                continue;
            };
            if !seen.insert(entry_id) {
                return Err(invalid(format!("duplicate subscription id {}", entry_id)));
            }
            let path = entry
                .config
                .path
                .ok_or_else(|| invalid("path is mandatory".into()))?;
            let entry_mode = entry
                .config
                .mode
                .as_deref()
                .map(str::parse::<StreamMode>)
                .transpose()?;

            let mut parsed = EntryConfig {
                id: entry_id,
                path,
                mode: entry_mode,
                sample_interval: entry.config.sample_interval,
                suppress_redundant: entry.config.suppress_redundant,
                heartbeat_interval: entry.config.heartbeat_interval,
            };
            if mode == RequestMode::Stream {
                parsed.fill_stream_defaults(min_interval_ns);
            }
            subscriptions.push(parsed);
        }
        if subscriptions.is_empty() {
            return Err(invalid(format!("subscribe-request {} has no subscriptions", id)));
        }

        Ok(Self {
            id,
            mode,
            updates_only: config.updates_only.unwrap_or(false),
            subscriptions,
        })
    }

    /// Check paths against the schema and intervals against the engine minimum.
    pub fn validate(&self, resolver: &PathResolver, min_interval_ns: u64) -> Result<()> {
        for entry in &self.subscriptions {
            if !resolver.is_valid_path(&entry.path) {
                return Err(invalid(format!("invalid path: {}", entry.path)));
            }
            if self.mode != RequestMode::Stream {
                continue;
            }
            let mode = entry
                .mode
                .ok_or_else(|| invalid("mode is mandatory".into()))?;
            let heartbeat = entry.heartbeat_interval.unwrap_or(HEARTBEAT_DISABLED);
            if heartbeat != HEARTBEAT_DISABLED && heartbeat < min_interval_ns {
                return Err(invalid(format!(
                    "heartbeat-interval is shorter than minimum interval {}",
                    min_interval_ns
                )));
            }
            if mode == StreamMode::Sample && entry.sample_interval.unwrap_or(0) < min_interval_ns {
                return Err(invalid(format!(
                    "sample-interval is shorter than minimum interval {}",
                    min_interval_ns
                )));
            }
        }
        Ok(())
    }
}

impl EntryConfig {
    fn fill_stream_defaults(&mut self, min_interval_ns: u64) {
        self.sample_interval
            .get_or_insert(min_interval_ns.saturating_mul(2));
        self.suppress_redundant.get_or_insert(false);
        self.heartbeat_interval.get_or_insert(HEARTBEAT_DISABLED);
        if self.mode == Some(StreamMode::TargetDefined) {
            self.mode = Some(resolve_target_defined(&self.path));
        }
    }
}

/// `state` of a subscribe request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestState {
    pub id: u64,
    pub mode: RequestMode,
    pub updates_only: bool,
    pub status: Status,
}

/// `state` of an inner subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EntryState {
    pub id: u64,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<StreamMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_redundant: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u64>,
}

impl From<&EntryConfig> for EntryState {
    fn from(entry: &EntryConfig) -> Self {
        Self {
            id: entry.id,
            path: entry.path.clone(),
            mode: entry.mode,
            sample_interval: entry.sample_interval,
            suppress_redundant: entry.suppress_redundant,
            heartbeat_interval: entry.heartbeat_interval,
        }
    }
}

/// Snapshot of one subscribe request for the operational view
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState {
    pub request: RequestState,
    pub entries: Vec<EntryState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryView {
    pub id: u64,
    pub state: EntryState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntriesView {
    pub subscription: Vec<EntryView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestView {
    pub id: u64,
    pub state: RequestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriptions: Option<EntriesView>,
}

impl From<SubscriptionState> for RequestView {
    fn from(state: SubscriptionState) -> Self {
        let subscriptions = (!state.entries.is_empty()).then(|| EntriesView {
            subscription: state
                .entries
                .into_iter()
                .map(|entry| EntryView { id: entry.id, state: entry })
                .collect(),
        });
        Self {
            id: state.request.id,
            state: state.request,
            subscriptions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestsView {
    pub subscribe_request: Vec<RequestView>,
}

/// Operational view of the subscribe-request list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationalView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_requests: Option<RequestsView>,
}

impl OperationalView {
    pub fn new(states: Vec<SubscriptionState>) -> Self {
        if states.is_empty() {
            return Self::default();
        }
        Self {
            subscribe_requests: Some(RequestsView {
                subscribe_request: states.into_iter().map(RequestView::from).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{MemoryDatastore, MemorySchema, SchemaNode};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const MIN: u64 = 5_000_000_000;

    fn resolver() -> PathResolver {
        let schema = MemorySchema::new().with_module(
            "t",
            vec![SchemaNode::container(
                "a",
                vec![SchemaNode::container("state", vec![SchemaNode::leaf("x")])],
            )],
        );
        PathResolver::new(
            Arc::new(MemoryDatastore::new()),
            Arc::new(schema),
            Duration::from_secs(1),
        )
    }

    fn request(mode: &str, entry: Value) -> Value {
        json!({
            "id": 1,
            "config": {"id": 1, "mode": mode},
            "subscriptions": {"subscription": [{"id": 1, "config": entry}]}
        })
    }

    #[test]
    fn test_parse_once() {
        let config = RequestConfig::parse(1, &request("ONCE", json!({"id": 1, "path": "/t:a/state"})), MIN).unwrap();
        assert_eq!(config.mode, RequestMode::Once);
        assert!(!config.updates_only);
        assert_eq!(config.subscriptions[0].path, "/t:a/state");
        assert_eq!(config.subscriptions[0].sample_interval, None);
        config.validate(&resolver(), MIN).unwrap();
    }

    #[test]
    fn test_stream_defaults() {
        let config = RequestConfig::parse(
            1,
            &request("STREAM", json!({"id": 1, "path": "/t:a/state", "mode": "TARGET_DEFINED"})),
            MIN,
        )
        .unwrap();
        let entry = &config.subscriptions[0];
        assert_eq!(entry.mode, Some(StreamMode::Sample));
        assert_eq!(entry.sample_interval, Some(2 * MIN));
        assert_eq!(entry.suppress_redundant, Some(false));
        assert_eq!(entry.heartbeat_interval, Some(HEARTBEAT_DISABLED));
        config.validate(&resolver(), MIN).unwrap();
    }

    #[test]
    fn test_missing_or_invalid_mode() {
        let payload = json!({"id": 1, "subscriptions": {"subscription": [{"id": 1, "config": {"path": "/t:a"}}]}});
        let err = RequestConfig::parse(1, &payload, MIN).unwrap_err();
        assert!(err.to_string().contains("mode should be specified"));

        let err = RequestConfig::parse(1, &request("SOMETIMES", json!({"path": "/t:a"})), MIN).unwrap_err();
        assert!(err.to_string().contains("invalid mode SOMETIMES"));
    }

    #[test]
    fn test_missing_path() {
        let err = RequestConfig::parse(1, &request("ONCE", json!({"id": 1})), MIN).unwrap_err();
        assert!(matches!(err, TelemetryError::ValidationFailed(_)));
        assert!(err.to_string().contains("path is mandatory"));
    }

    #[test]
    fn test_no_subscriptions() {
        let payload = json!({"id": 1, "config": {"mode": "ONCE"}});
        assert!(RequestConfig::parse(1, &payload, MIN).is_err());
    }

    #[test]
    fn test_duplicate_entry_ids() {
        let payload = json!({
            "config": {"mode": "ONCE"},
            "subscriptions": {"subscription": [
                {"id": 1, "config": {"path": "/t:a"}},
                {"id": 1, "config": {"path": "/t:a/state"}}
            ]}
        });
        let err = RequestConfig::parse(1, &payload, MIN).unwrap_err();
        assert!(err.to_string().contains("duplicate subscription id 1"));
    }

    #[test]
    fn test_invalid_path_rejected() {
        let config = RequestConfig::parse(1, &request("ONCE", json!({"path": "/t:a/nope"})), MIN).unwrap();
        let err = config.validate(&resolver(), MIN).unwrap_err();
        assert!(err.to_string().contains("invalid path: /t:a/nope"));
    }

    #[test]
    fn test_stream_requires_entry_mode() {
        let config = RequestConfig::parse(1, &request("STREAM", json!({"path": "/t:a"})), MIN).unwrap();
        let err = config.validate(&resolver(), MIN).unwrap_err();
        assert!(err.to_string().contains("mode is mandatory"));
    }

    #[test]
    fn test_stream_interval_floor() {
        let short_sample = request(
            "STREAM",
            json!({"path": "/t:a", "mode": "SAMPLE", "sample-interval": MIN - 1}),
        );
        let config = RequestConfig::parse(1, &short_sample, MIN).unwrap();
        assert!(config.validate(&resolver(), MIN).is_err());

        let short_heartbeat = request(
            "STREAM",
            json!({"path": "/t:a", "mode": "ON_CHANGE", "heartbeat-interval": 1000}),
        );
        let config = RequestConfig::parse(1, &short_heartbeat, MIN).unwrap();
        assert!(config.validate(&resolver(), MIN).is_err());

        // ON_CHANGE ignores the sample interval; heartbeat 0 is disabled
        let on_change = request(
            "STREAM",
            json!({"path": "/t:a", "mode": "ON_CHANGE", "sample-interval": 1, "heartbeat-interval": 0}),
        );
        let config = RequestConfig::parse(1, &on_change, MIN).unwrap();
        config.validate(&resolver(), MIN).unwrap();
    }

    #[test]
    fn test_operational_view_shape() {
        let config = RequestConfig::parse(
            7,
            &request("STREAM", json!({"path": "/t:a", "mode": "ON_CHANGE"})),
            MIN,
        )
        .unwrap();
        let state = SubscriptionState {
            request: RequestState {
                id: 7,
                mode: config.mode,
                updates_only: config.updates_only,
                status: Status::Running,
            },
            entries: config.subscriptions.iter().map(EntryState::from).collect(),
        };
        let view = serde_json::to_value(OperationalView::new(vec![state])).unwrap();
        assert_eq!(
            view,
            json!({"subscribe-requests": {"subscribe-request": [{
                "id": 7,
                "state": {"id": 7, "mode": "STREAM", "updates-only": false, "status": "RUNNING"},
                "subscriptions": {"subscription": [{
                    "id": 1,
                    "state": {
                        "id": 1, "path": "/t:a", "mode": "ON_CHANGE",
                        "sample-interval": 2 * MIN, "suppress-redundant": false, "heartbeat-interval": 0
                    }
                }]}
            }]}})
        );
    }

    #[test]
    fn test_empty_operational_view() {
        let view = serde_json::to_value(OperationalView::new(vec![])).unwrap();
        assert_eq!(view, json!({}));
    }
}
