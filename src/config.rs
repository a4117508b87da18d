// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Engine configuration
//!
//! Loaded once at process start. Intervals on the subscription model are
//! nanoseconds; the knobs here use milliseconds and seconds for readability.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Floor for sample and heartbeat intervals; also the ON_CHANGE tick
    pub min_interval_ms: u64,
    /// How long a pending transaction waits for `done`/`abort`
    pub revert_timeout_secs: u64,
    /// Bound on one operational read
    pub read_timeout_ms: u64,
    /// Bound on waiting for loop tasks when a subscription stops
    pub stop_timeout_ms: u64,
    /// Module holding the subscribe-request model
    pub module: String,
    /// Namespace notifications are sent on
    pub notification_namespace: String,
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 5_000,
            revert_timeout_secs: 6,
            read_timeout_ms: 5_000,
            stop_timeout_ms: 3_000,
            module: "telemetry".into(),
            notification_namespace: "telemetry-notify-event".into(),
            log_level: LogLevel::Info,
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::Configuration(format!("Cannot read {}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TelemetryError::Configuration(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_interval_ms == 0 {
            return Err(TelemetryError::Configuration(
                "min_interval_ms must be greater than zero".into(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(TelemetryError::Configuration(
                "read_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.stop_timeout_ms == 0 {
            return Err(TelemetryError::Configuration(
                "stop_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Builder-style override used by tests and the CLI. Sub-millisecond
    /// intervals round up to 1 ms; zero stays zero and fails `validate`.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.min_interval_ms = if ms == 0 && !interval.is_zero() { 1 } else { ms };
        self
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Engine minimum in the units of the subscription model
    pub fn min_interval_ns(&self) -> u64 {
        self.min_interval_ms.saturating_mul(1_000_000)
    }

    pub fn revert_timeout(&self) -> Duration {
        Duration::from_secs(self.revert_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Generate sample config
    pub fn sample_toml() -> String {
        r#"# Streaming telemetry engine configuration

# Minimum sample/heartbeat interval and ON_CHANGE polling tick (milliseconds)
min_interval_ms = 5000

# Revert a configuration change if the datastore sends neither done nor abort
revert_timeout_secs = 6

# Bound on a single operational read (milliseconds)
read_timeout_ms = 5000

# Bound on waiting for sampling loops to finish when a request is removed
stop_timeout_ms = 3000

module = "telemetry"
notification_namespace = "telemetry-notify-event"
log_level = "Info"
"#
        .into()
    }
}
