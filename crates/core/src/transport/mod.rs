//! Boundary with the transport session collaborator.
//!
//! The transport owns log-on, encryption, keep-alive and framing. This layer
//! only needs it to run a handful of lifecycle operations, to write opaque
//! outbound messages, and to deliver inbound events one at a time on a
//! channel consumed exclusively by the session's dispatch loop.

pub mod fake;

use std::future::Future;
use std::pin::Pin;

use coord_protocol::{AppId, Credentials, InboundPacket, OutboundMessage};
use tokio::sync::mpsc;

use crate::error::Result;

/// Future returned by every transport operation.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Outbound half of the transport session.
///
/// Calls are serialized by the session manager, so implementations need not
/// be internally synchronized.
pub trait Transport: Send {
	/// Establishes the link. Success is later confirmed by [`TransportEvent::Connected`].
	fn connect(&mut self) -> TransportFuture<'_>;

	/// Starts log-on. Completion is reported as [`TransportEvent::LoggedOn`] or [`TransportEvent::LogOnFailed`].
	fn log_on(&mut self, credentials: Credentials) -> TransportFuture<'_>;

	/// Declares which application is in use, which makes its coordinator reachable.
	fn set_games_played(&mut self, app: Option<AppId>) -> TransportFuture<'_>;

	/// Writes one message.
	fn send(&mut self, message: OutboundMessage) -> TransportFuture<'_>;

	/// Tears the link down. A [`TransportEvent::Disconnected`] follows.
	fn disconnect(&mut self) -> TransportFuture<'_>;
}

/// Inbound notification delivered by the transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	Connected,
	LoggedOn,
	LogOnFailed { reason: String },
	LoggedOff { reason: String },
	Disconnected,
	FatalError(String),
	Packet(InboundPacket),
}

/// A transport split into its outbound half and its inbound event stream.
pub struct TransportParts {
	pub transport: Box<dyn Transport>,
	pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportParts {
	pub fn new(transport: Box<dyn Transport>, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
		Self { transport, events }
	}
}
