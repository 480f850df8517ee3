//! Outbound and inbound message envelopes.
//!
//! An outbound message is addressed at one application's coordinator and
//! optionally stamped with a source job. The coordinator echoes that job id
//! back as the target job of its reply:
//!
//! ```json
//! { "app_id": 570, "msg_type": 7095, "source_job": 12, "body": [8, 1] }
//! { "app_id": 570, "msg_type": 7096, "target_job": 12, "body": [8, 1, 16, 3] }
//! ```
//!
//! Packets without a target job (or whose target job is no longer awaited)
//! are unsolicited notifications such as the coordinator welcome.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Application whose coordinator a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u32);

impl AppId {
	/// The application served by the coordinator this client was built for.
	pub const DOTA2: AppId = AppId(570);
}

impl Default for AppId {
	fn default() -> Self {
		Self::DOTA2
	}
}

impl fmt::Display for AppId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Message-type tag of a coordinator message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgType(pub u32);

impl MsgType {
	/// Shared object cache subscription notice.
	pub const CACHE_SUBSCRIBED: MsgType = MsgType(24);
	/// Coordinator acknowledgment of a client hello.
	pub const CLIENT_WELCOME: MsgType = MsgType(4004);
	/// Handshake probe sent until the coordinator welcomes the client.
	pub const CLIENT_HELLO: MsgType = MsgType(4006);
	/// Unsolicited coordinator connection status report.
	pub const CLIENT_CONNECTION_STATUS: MsgType = MsgType(4009);

	/// Returns a short name for well-known types, used in diagnostics.
	pub fn name(self) -> Option<&'static str> {
		match self {
			Self::CACHE_SUBSCRIBED => Some("CacheSubscribed"),
			Self::CLIENT_WELCOME => Some("ClientWelcome"),
			Self::CLIENT_HELLO => Some("ClientHello"),
			Self::CLIENT_CONNECTION_STATUS => Some("ClientConnectionStatus"),
			_ => None,
		}
	}
}

impl fmt::Display for MsgType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.name() {
			Some(name) => write!(f, "{}({})", name, self.0),
			None => write!(f, "{}", self.0),
		}
	}
}

/// Message written to the coordinator through the transport session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
	/// Target application.
	pub app_id: AppId,
	/// Message-type tag defined by the external schema.
	pub msg_type: MsgType,
	/// Correlation tag, stamped by the request engine just before transmission.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source_job: Option<JobId>,
	/// Encoded payload.
	#[serde(default)]
	pub body: Vec<u8>,
}

impl OutboundMessage {
	/// Builds an uncorrelated message with an already-encoded body.
	pub fn new(app_id: AppId, msg_type: MsgType, body: impl Into<Vec<u8>>) -> Self {
		Self {
			app_id,
			msg_type,
			source_job: None,
			body: body.into(),
		}
	}

	/// Builds a message whose body is the JSON encoding of `payload`.
	pub fn json<T: Serialize>(app_id: AppId, msg_type: MsgType, payload: &T) -> serde_json::Result<Self> {
		Ok(Self::new(app_id, msg_type, serde_json::to_vec(payload)?))
	}

	/// Returns the message with `job` set as its correlation tag.
	pub fn with_source_job(mut self, job: JobId) -> Self {
		self.source_job = Some(job);
		self
	}
}

/// Packet delivered by the transport session from the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPacket {
	/// Application the packet belongs to.
	pub app_id: AppId,
	/// Message-type tag defined by the external schema.
	pub msg_type: MsgType,
	/// Job this packet answers, when it is a reply.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_job: Option<JobId>,
	/// Encoded payload.
	#[serde(default)]
	pub body: Vec<u8>,
}

impl InboundPacket {
	/// Builds an unsolicited packet.
	pub fn new(app_id: AppId, msg_type: MsgType, body: impl Into<Vec<u8>>) -> Self {
		Self {
			app_id,
			msg_type,
			target_job: None,
			body: body.into(),
		}
	}

	/// Builds a reply to `job`.
	pub fn reply(app_id: AppId, msg_type: MsgType, job: JobId, body: impl Into<Vec<u8>>) -> Self {
		Self {
			target_job: Some(job),
			..Self::new(app_id, msg_type, body)
		}
	}

	/// Decodes the body as JSON.
	pub fn decode_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
		serde_json::from_slice(&self.body)
	}
}
