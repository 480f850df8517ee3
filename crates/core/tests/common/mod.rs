//! Shared harness: a session over the fake transport, driven to readiness.

#![allow(dead_code)]

use std::sync::Arc;

use coord::{
	Credentials, FakeTransportBuilder, FakeTransportController, ManualClock, MsgType, OutboundMessage, SessionConfig, SessionManager,
};

pub const REQUEST: MsgType = MsgType(7095);
pub const RESPONSE: MsgType = MsgType(7096);

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub struct Harness {
	pub session: SessionManager,
	pub controller: FakeTransportController,
	pub clock: ManualClock,
}

/// Builds a session over a fake transport with its dispatch loop running.
pub fn harness(config: SessionConfig) -> Harness {
	init_tracing();
	let (parts, controller) = FakeTransportBuilder::new().app_id(config.app_id).build();
	let clock = ManualClock::new();
	let session = SessionManager::with_clock(parts, config, Arc::new(clock.clone())).expect("valid session config");
	session.spawn();
	Harness { session, controller, clock }
}

pub fn credentials() -> Credentials {
	Credentials::new("test-user", "test-password")
}

pub fn request(body: &[u8]) -> OutboundMessage {
	OutboundMessage::new(coord::AppId::DOTA2, REQUEST, body.to_vec())
}

impl Harness {
	/// Connects and answers the first hello with a welcome.
	pub async fn connect(&self) -> anyhow::Result<()> {
		let connecting = tokio::spawn({
			let session = self.session.clone();
			async move { session.connect(credentials()).await }
		});
		let hellos = self.controller.sent_of_type(MsgType::CLIENT_HELLO).len();
		self.controller.wait_for_sent_of_type(MsgType::CLIENT_HELLO, hellos + 1).await;
		self.controller.inject_welcome();
		connecting.await??;
		Ok(())
	}
}

/// A harness whose session is already `Ready`.
pub async fn ready(config: SessionConfig) -> anyhow::Result<Harness> {
	let harness = harness(config);
	harness.connect().await?;
	Ok(harness)
}
