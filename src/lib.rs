// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! # streamtel
//!
//! Model-driven streaming telemetry engine.
//!
//! Collectors write subscribe requests into a central datastore; the engine
//! validates their paths against the schema, samples operational state and
//! publishes UPDATE / DELETE / SYNC_RESPONSE notifications.
//!
//! ```text
//! change events ──> TelemetryServer ──> SubscriptionStore
//!                        │                    │
//!                        │              Subscription (ONCE / POLL / STREAM)
//!                        │                    │
//!                  PathResolver <─────────────┤
//!                        │                    ├──> TelemetryStore
//!                   Datastore <── NotificationEmitter
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamtel::datastore::{Change, MemoryDatastore, MemorySchema};
//! use streamtel::{EngineConfig, TelemetryServer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> streamtel::Result<()> {
//! let datastore = Arc::new(MemoryDatastore::new());
//! let schema = Arc::new(MemorySchema::from_json_file("schema.json")?);
//! let server = Arc::new(TelemetryServer::new(datastore.clone(), schema, EngineConfig::default())?);
//!
//! let shutdown = CancellationToken::new();
//! let running = tokio::spawn({
//!     let server = server.clone();
//!     let shutdown = shutdown.clone();
//!     async move { server.run(shutdown).await }
//! });
//!
//! datastore
//!     .apply_changes(
//!         "telemetry",
//!         vec![Change::created(
//!             "/telemetry:subscribe-requests/subscribe-request[id='1']",
//!             serde_json::json!({
//!                 "config": {"mode": "ONCE"},
//!                 "subscriptions": {"subscription": [
//!                     {"id": 1, "config": {"path": "/goldstone-interfaces:interfaces"}}
//!                 ]}
//!             }),
//!         )],
//!     )
//!     .await?;
//!
//! shutdown.cancel();
//! let _ = running.await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod datastore;
pub mod error;
pub mod notify;
pub mod path;
pub mod server;
pub mod store;
pub mod subscription;

pub use config::{EngineConfig, LogLevel};
pub use datastore::{Datastore, SchemaContext, SchemaNode};
pub use error::{Result, StoreError, TelemetryError};
pub use notify::{Event, NotificationEmitter};
pub use path::PathResolver;
pub use server::TelemetryServer;
pub use store::{SubscriptionStore, TelemetryStore};
pub use subscription::{RequestMode, Status, StreamMode, Subscription};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
