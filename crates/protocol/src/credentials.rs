//! Log-on details handed to the transport session.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Account credentials used to log on, and again on every reconnect.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	pub username: String,
	pub password: String,
	/// One-time guard code, when the account requires one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth_code: Option<String>,
	/// Machine authorization hash from a previous session.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sentry_hash: Option<Vec<u8>>,
}

impl Credentials {
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
			..Self::default()
		}
	}

	/// Sets the one-time guard code.
	pub fn with_auth_code(mut self, code: impl Into<String>) -> Self {
		self.auth_code = Some(code.into());
		self
	}

	/// Sets the sentry hash from its base64 text form.
	pub fn with_sentry_base64(mut self, sentry: &str) -> Result<Self, base64::DecodeError> {
		self.sentry_hash = Some(STANDARD.decode(sentry)?);
		Ok(self)
	}

	/// Returns the name of the first required field that is empty.
	pub fn missing_field(&self) -> Option<&'static str> {
		if self.username.is_empty() {
			Some("username")
		} else if self.password.is_empty() {
			Some("password")
		} else {
			None
		}
	}

	/// Returns the sentry hash re-encoded as base64, for display and persistence.
	pub fn sentry_base64(&self) -> Option<String> {
		self.sentry_hash.as_deref().map(|hash| STANDARD.encode(hash))
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("auth_code", &self.auth_code.as_ref().map(|_| "<redacted>"))
			.field("sentry_hash", &self.sentry_hash.as_ref().map(Vec::len))
			.finish()
	}
}
