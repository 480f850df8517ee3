//! Fake transport for testing correlation, handshake and reconnect behavior.
//!
//! Provides an in-memory transport session without any network.
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let session = SessionManager::new(parts, SessionConfig::default())?;
//! session.spawn();
//!
//! // connect() is answered with Connected, log_on() with LoggedOn
//! let connecting = tokio::spawn({
//!     let session = session.clone();
//!     async move { session.connect(Credentials::new("user", "pw")).await }
//! });
//! controller.wait_for_sent_of_type(MsgType::CLIENT_HELLO, 1).await;
//! controller.inject_welcome();
//! connecting.await??;
//! ```

use std::sync::Arc;

use coord_protocol::{AppId, Credentials, InboundPacket, JobId, MsgType, OutboundMessage};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use super::{Transport, TransportEvent, TransportFuture, TransportParts};
use crate::error::Error;

/// Builder for creating fake transport instances.
#[derive(Debug, Clone)]
pub struct FakeTransportBuilder {
	app_id: AppId,
	auto_connect: bool,
	auto_log_on: bool,
}

impl FakeTransportBuilder {
	/// Create a builder whose transport answers `connect` and `log_on` on its own.
	pub fn new() -> Self {
		Self {
			app_id: AppId::default(),
			auto_connect: true,
			auto_log_on: true,
		}
	}

	/// Application id stamped on packets built by the controller.
	pub fn app_id(mut self, app_id: AppId) -> Self {
		self.app_id = app_id;
		self
	}

	/// Leaves `Connected` and `LoggedOn` to be injected by the test.
	pub fn manual_lifecycle(mut self) -> Self {
		self.auto_connect = false;
		self.auto_log_on = false;
		self
	}

	/// Build the fake transport and return both parts and a controller.
	///
	/// Returns [`TransportParts`] for creating a [`SessionManager`] and a
	/// [`FakeTransportController`] for injecting events and inspecting sent messages.
	///
	/// [`SessionManager`]: crate::SessionManager
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared {
			state: Mutex::new(FakeState::default()),
			sent_notify: Notify::new(),
		});

		let transport = FakeTransport {
			shared: Arc::clone(&shared),
			events_tx: events_tx.clone(),
			auto_connect: self.auto_connect,
			auto_log_on: self.auto_log_on,
		};

		let controller = FakeTransportController {
			shared,
			events_tx,
			app_id: self.app_id,
		};

		(TransportParts::new(Box::new(transport), events_rx), controller)
	}
}

impl Default for FakeTransportBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Lifecycle call observed by the fake transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
	Connect,
	LogOn(String),
	SetGamesPlayed(Option<AppId>),
	Disconnect,
}

#[derive(Debug, Default)]
struct FakeState {
	sent: Vec<OutboundMessage>,
	calls: Vec<FakeCall>,
	fail_sends: bool,
	failing_connects: u32,
	log_on_failure: Option<String>,
}

#[derive(Debug)]
struct Shared {
	state: Mutex<FakeState>,
	sent_notify: Notify,
}

/// Controller for injecting events and inspecting what the session wrote.
#[derive(Debug, Clone)]
pub struct FakeTransportController {
	shared: Arc<Shared>,
	events_tx: mpsc::UnboundedSender<TransportEvent>,
	app_id: AppId,
}

impl FakeTransportController {
	/// Inject a raw transport event.
	pub fn inject(&self, event: TransportEvent) {
		let _ = self.events_tx.send(event);
	}

	/// Inject an inbound packet.
	pub fn inject_packet(&self, packet: InboundPacket) {
		self.inject(TransportEvent::Packet(packet));
	}

	/// Inject a reply correlated to `job`.
	pub fn inject_reply(&self, job: JobId, msg_type: MsgType, body: impl Into<Vec<u8>>) {
		self.inject_packet(InboundPacket::reply(self.app_id, msg_type, job, body));
	}

	/// Inject the coordinator welcome.
	pub fn inject_welcome(&self) {
		self.inject_packet(InboundPacket::new(self.app_id, MsgType::CLIENT_WELCOME, Vec::new()));
	}

	/// Simulate loss of the link.
	pub fn inject_disconnect(&self) {
		self.inject(TransportEvent::Disconnected);
	}

	/// Make every subsequent `send` fail (or succeed again).
	pub fn fail_sends(&self, fail: bool) {
		self.shared.state.lock().fail_sends = fail;
	}

	/// Make the next `count` calls to `connect` fail.
	pub fn fail_connects(&self, count: u32) {
		self.shared.state.lock().failing_connects = count;
	}

	/// Answer subsequent log-ons with `LogOnFailed` carrying `reason`.
	pub fn fail_log_on(&self, reason: impl Into<String>) {
		self.shared.state.lock().log_on_failure = Some(reason.into());
	}

	/// Take all sent messages, clearing the buffer.
	pub fn take_sent(&self) -> Vec<OutboundMessage> {
		std::mem::take(&mut self.shared.state.lock().sent)
	}

	/// Messages sent so far, without clearing.
	pub fn sent(&self) -> Vec<OutboundMessage> {
		self.shared.state.lock().sent.clone()
	}

	/// Messages of `msg_type` sent so far.
	pub fn sent_of_type(&self, msg_type: MsgType) -> Vec<OutboundMessage> {
		self.shared.state.lock().sent.iter().filter(|m| m.msg_type == msg_type).cloned().collect()
	}

	/// Correlated requests sent so far, in transmission order.
	pub fn sent_requests(&self) -> Vec<OutboundMessage> {
		self.shared.state.lock().sent.iter().filter(|m| m.source_job.is_some()).cloned().collect()
	}

	/// Lifecycle calls observed so far.
	pub fn calls(&self) -> Vec<FakeCall> {
		self.shared.state.lock().calls.clone()
	}

	/// Number of `connect` calls observed so far.
	pub fn connect_calls(&self) -> usize {
		self.shared.state.lock().calls.iter().filter(|c| **c == FakeCall::Connect).count()
	}

	/// Wait until at least `count` correlated requests have been sent.
	pub async fn wait_for_requests(&self, count: usize) -> Vec<OutboundMessage> {
		loop {
			let notified = self.shared.sent_notify.notified();
			let requests = self.sent_requests();
			if requests.len() >= count {
				return requests;
			}
			notified.await;
		}
	}

	/// Wait until at least `count` messages of `msg_type` have been sent.
	pub async fn wait_for_sent_of_type(&self, msg_type: MsgType, count: usize) -> Vec<OutboundMessage> {
		loop {
			let notified = self.shared.sent_notify.notified();
			let sent = self.sent_of_type(msg_type);
			if sent.len() >= count {
				return sent;
			}
			notified.await;
		}
	}
}

struct FakeTransport {
	shared: Arc<Shared>,
	events_tx: mpsc::UnboundedSender<TransportEvent>,
	auto_connect: bool,
	auto_log_on: bool,
}

impl FakeTransport {
	fn record(&self, call: FakeCall) {
		self.shared.state.lock().calls.push(call);
	}

	fn emit(&self, event: TransportEvent) {
		let _ = self.events_tx.send(event);
	}
}

impl Transport for FakeTransport {
	fn connect(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			self.record(FakeCall::Connect);
			let failing = {
				let mut state = self.shared.state.lock();
				let failing = state.failing_connects > 0;
				state.failing_connects = state.failing_connects.saturating_sub(1);
				failing
			};
			if failing {
				return Err(Error::Transport("connection refused".into()));
			}
			if self.auto_connect {
				self.emit(TransportEvent::Connected);
			}
			Ok(())
		})
	}

	fn log_on(&mut self, credentials: Credentials) -> TransportFuture<'_> {
		Box::pin(async move {
			self.record(FakeCall::LogOn(credentials.username));
			let failure = self.shared.state.lock().log_on_failure.clone();
			match failure {
				Some(reason) => self.emit(TransportEvent::LogOnFailed { reason }),
				None if self.auto_log_on => self.emit(TransportEvent::LoggedOn),
				None => {}
			}
			Ok(())
		})
	}

	fn set_games_played(&mut self, app: Option<AppId>) -> TransportFuture<'_> {
		Box::pin(async move {
			self.record(FakeCall::SetGamesPlayed(app));
			Ok(())
		})
	}

	fn send(&mut self, message: OutboundMessage) -> TransportFuture<'_> {
		Box::pin(async move {
			{
				let mut state = self.shared.state.lock();
				if state.fail_sends {
					return Err(Error::SendFailed("link down".into()));
				}
				state.sent.push(message);
			}
			self.shared.sent_notify.notify_waiters();
			Ok(())
		})
	}

	fn disconnect(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			self.record(FakeCall::Disconnect);
			self.emit(TransportEvent::Disconnected);
			Ok(())
		})
	}
}
