// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Shared in-process stores
//!
//! - [`TelemetryStore`]: last observed leaf values per request and subscription
//! - [`SubscriptionStore`]: live subscribe requests by id

pub mod subscription;
pub mod telemetry;

pub use subscription::SubscriptionStore;
pub use telemetry::{TelemetryEntry, TelemetryStore};
