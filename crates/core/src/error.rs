//! Error types for the correlation and session layer.

use std::time::Duration;

use coord_protocol::JobId;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the session manager.
#[derive(Debug, Error)]
pub enum Error {
	/// A request was issued before the coordinator handshake completed.
	#[error("coordinator not ready")]
	NotReady,

	/// No correlated reply arrived within the bound.
	#[error("job {job_id} timed out after {}ms", after.as_millis())]
	Timeout { job_id: JobId, after: Duration },

	/// The transport rejected the transmission.
	#[error("send failed: {0}")]
	SendFailed(String),

	/// The link was lost while the job was outstanding, or is down.
	#[error("session disconnected")]
	Disconnected,

	/// The handshake did not complete within the connect bound.
	#[error("timeout waiting for coordinator to become ready after {}ms", .0.as_millis())]
	ReadyTimeout(Duration),

	/// The retry policy bound was reached.
	#[error("gave up after {attempts} attempts: {source}")]
	RetriesExhausted {
		attempts: u32,
		#[source]
		source: Box<Error>,
	},

	/// Required log-on details are missing.
	#[error("invalid credentials: {0} not set")]
	InvalidCredentials(&'static str),

	/// The transport reported that log-on was refused.
	#[error("log on failed: {0}")]
	LogOnFailed(String),

	/// A transport lifecycle operation failed.
	#[error("transport error: {0}")]
	Transport(String),

	/// A job id was registered twice while still outstanding.
	#[error("job {0} already registered")]
	DuplicateJob(JobId),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Returns `true` for reply timeouts.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Returns `true` for failures the retry wrapper re-issues locally.
	pub fn is_transient(&self) -> bool {
		matches!(self, Error::Timeout { .. } | Error::SendFailed(_))
	}

	/// Returns `true` when the session link is gone.
	pub fn is_disconnected(&self) -> bool {
		matches!(self, Error::Disconnected)
	}

	/// Unwraps `RetriesExhausted` to the underlying cause.
	pub fn root_cause(&self) -> &Error {
		match self {
			Error::RetriesExhausted { source, .. } => source.root_cause(),
			other => other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn transient_covers_timeout_and_send() {
		let timeout = Error::Timeout {
			job_id: JobId(1),
			after: Duration::from_millis(50),
		};
		assert!(timeout.is_timeout());
		assert!(timeout.is_transient());
		assert!(Error::SendFailed("link down".into()).is_transient());
		assert!(!Error::NotReady.is_transient());
		assert!(!Error::Disconnected.is_transient());
	}

	#[test]
	fn exhausted_reports_attempts_and_cause() {
		let err = Error::RetriesExhausted {
			attempts: 3,
			source: Box::new(Error::Timeout {
				job_id: JobId(9),
				after: Duration::from_millis(10),
			}),
		};
		assert_eq!(err.to_string(), "gave up after 3 attempts: job 9 timed out after 10ms");
		assert!(err.root_cause().is_timeout());
		assert!(std::error::Error::source(&err).is_some());
	}
}
