//! Job identifiers used to correlate a request with its reply.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation tag carried as the source job of a request and the target job of its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
	/// Returns the raw identifier value.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<u64> for JobId {
	fn from(value: u64) -> Self {
		Self(value)
	}
}
