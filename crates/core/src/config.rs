//! Session configuration loaded from JSON.
//!
//! Every field has a default, so an empty object (or no file at all) yields
//! the stock timings: 10s per job, 30s to reach readiness, a hello probe
//! every 5s.

use std::path::Path;
use std::time::Duration;

use coord_protocol::AppId;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Default bound on a single correlated request.
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 10_000;

/// Default bound on `connect` reaching readiness.
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 30_000;

/// Default interval between handshake probes.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 5_000;

/// Configuration for one session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
	/// Application whose coordinator this session talks to; other packets are ignored.
	pub app_id: AppId,
	/// Reply timeout applied by [`SessionManager::call`](crate::SessionManager::call).
	pub job_timeout_ms: u64,
	/// Bound on `connect` reaching readiness.
	pub ready_timeout_ms: u64,
	/// Interval between hello probes while awaiting the coordinator.
	pub probe_interval_ms: u64,
	/// Start the handshake as soon as the transport reports log-on.
	pub auto_handshake: bool,
	/// Encoded body of the hello probe.
	pub hello_body: Vec<u8>,
	pub reconnect: ReconnectConfig,
	/// Default policy for `call_with_retry`.
	pub retry: RetryPolicy,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			app_id: AppId::default(),
			job_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
			ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
			probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
			auto_handshake: true,
			hello_body: Vec::new(),
			reconnect: ReconnectConfig::default(),
			retry: RetryPolicy::default(),
		}
	}
}

/// Re-establishment policy applied when the link drops unexpectedly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
	pub enabled: bool,
	/// Connect attempts before a terminal reconnect failure is reported.
	pub max_attempts: u32,
	/// Delay before every attempt after the first, which is immediate.
	pub delay_ms: u64,
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			max_attempts: 5,
			delay_ms: 1_000,
		}
	}
}

impl ReconnectConfig {
	pub fn delay(&self) -> Duration {
		Duration::from_millis(self.delay_ms)
	}
}

impl SessionConfig {
	/// Parses and validates a JSON document.
	pub fn from_json_str(json: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a JSON file.
	pub fn from_path(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path)?;
		Self::from_json_str(&text)
	}

	/// Rejects timings that would make the session unusable.
	pub fn validate(&self) -> Result<()> {
		if self.job_timeout_ms == 0 {
			return Err(Error::Config("job_timeout_ms must be positive".into()));
		}
		if self.ready_timeout_ms == 0 {
			return Err(Error::Config("ready_timeout_ms must be positive".into()));
		}
		if self.probe_interval_ms == 0 {
			return Err(Error::Config("probe_interval_ms must be positive".into()));
		}
		self.retry.validate()
	}

	pub fn job_timeout(&self) -> Duration {
		Duration::from_millis(self.job_timeout_ms)
	}

	pub fn ready_timeout(&self) -> Duration {
		Duration::from_millis(self.ready_timeout_ms)
	}

	pub fn probe_interval(&self) -> Duration {
		Duration::from_millis(self.probe_interval_ms)
	}
}
