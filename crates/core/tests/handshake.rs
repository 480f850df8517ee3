//! Connect, log-on and the hello/welcome handshake.

mod common;

use std::time::Duration;

use common::{Harness, credentials, harness, request};
use coord::{AppId, Error, FakeCall, InboundPacket, MsgType, SessionConfig, SessionEvent, SessionState};
use tokio::sync::broadcast;

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
	let mut seen = Vec::new();
	while let Ok(event) = events.try_recv() {
		seen.push(event);
	}
	seen
}

fn spawn_connect(h: &Harness) -> tokio::task::JoinHandle<coord::Result<()>> {
	let session = h.session.clone();
	tokio::spawn(async move { session.connect(credentials()).await })
}

#[tokio::test(start_paused = true)]
async fn welcome_after_second_probe_stops_probing() -> anyhow::Result<()> {
	let h = harness(SessionConfig::default());
	let mut events = h.session.subscribe();
	let connecting = spawn_connect(&h);

	h.controller.wait_for_sent_of_type(MsgType::CLIENT_HELLO, 2).await;
	assert_eq!(h.session.state(), SessionState::AwaitingCoordinator);
	h.controller.inject_welcome();
	connecting.await??;

	assert!(h.session.is_ready());
	tokio::time::sleep(Duration::from_secs(20)).await;
	assert_eq!(h.controller.sent_of_type(MsgType::CLIENT_HELLO).len(), 2, "no hello after welcome");

	let status = h.session.status();
	assert!(!status.probe_active);
	assert_eq!(status.probes_sent, 2);

	let ready_events = drain(&mut events).into_iter().filter(|e| *e == SessionEvent::CoordinatorReady).count();
	assert_eq!(ready_events, 1);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn handshake_declares_app_before_probing() -> anyhow::Result<()> {
	let h = common::ready(SessionConfig::default()).await?;

	let calls = h.controller.calls();
	assert_eq!(calls[0], FakeCall::Connect);
	assert_eq!(calls[1], FakeCall::LogOn("test-user".into()));
	assert!(calls.contains(&FakeCall::SetGamesPlayed(Some(AppId::DOTA2))));

	let hello = &h.controller.sent_of_type(MsgType::CLIENT_HELLO)[0];
	assert_eq!(hello.app_id, AppId::DOTA2);
	assert_eq!(hello.source_job, None);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn repeated_welcome_is_ignored() -> anyhow::Result<()> {
	let h = common::ready(SessionConfig::default()).await?;
	let mut events = h.session.subscribe();

	h.controller.inject_welcome();
	h.controller.inject_welcome();
	tokio::time::sleep(Duration::from_millis(10)).await;

	assert!(h.session.is_ready());
	assert!(drain(&mut events).is_empty());
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_times_out_without_welcome() {
	let config = SessionConfig {
		ready_timeout_ms: 12_000,
		..SessionConfig::default()
	};
	let h = harness(config);

	let err = h.session.connect(credentials()).await.unwrap_err();
	assert!(matches!(err, Error::ReadyTimeout(d) if d == Duration::from_secs(12)), "got {err:?}");
	assert_eq!(h.session.state(), SessionState::AwaitingCoordinator);
	// Probes keep going at t = 0, 5s and 10s.
	assert_eq!(h.controller.sent_of_type(MsgType::CLIENT_HELLO).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rejected_log_on_fails_connect() {
	let h = harness(SessionConfig::default());
	h.controller.fail_log_on("InvalidPassword");

	let err = h.session.connect(credentials()).await.unwrap_err();
	match err {
		Error::LogOnFailed(reason) => assert_eq!(reason, "InvalidPassword"),
		other => panic!("expected LogOnFailed, got {other:?}"),
	}
	assert_eq!(h.session.state(), SessionState::Connected);
	assert!(h.controller.sent_of_type(MsgType::CLIENT_HELLO).is_empty());
}

#[tokio::test(start_paused = true)]
async fn incomplete_credentials_are_rejected_before_connecting() {
	let h = harness(SessionConfig::default());

	let err = h.session.connect(coord::Credentials::new("user", "")).await.unwrap_err();
	assert!(matches!(err, Error::InvalidCredentials("password")), "got {err:?}");
	assert_eq!(h.controller.connect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn refused_connection_is_a_transport_error() {
	let h = harness(SessionConfig::default());
	h.controller.fail_connects(1);

	let err = h.session.connect(credentials()).await.unwrap_err();
	assert!(matches!(err, Error::Transport(ref m) if m.starts_with("error connecting")), "got {err:?}");
	assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn login_fields_with_bad_sentry_still_connect() -> anyhow::Result<()> {
	let h = harness(SessionConfig::default());
	let connecting = tokio::spawn({
		let session = h.session.clone();
		async move { session.connect_with_login("someone", "secret", "%%not-base64%%", "").await }
	});
	h.controller.wait_for_sent_of_type(MsgType::CLIENT_HELLO, 1).await;
	h.controller.inject_welcome();
	connecting.await??;

	assert!(h.controller.calls().contains(&FakeCall::LogOn("someone".into())));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn requests_before_ready_are_refused() -> anyhow::Result<()> {
	let h = harness(SessionConfig::default());
	let err = h.session.call(request(b"early")).await.unwrap_err();
	assert!(matches!(err, Error::NotReady));

	let connecting = spawn_connect(&h);
	h.controller.wait_for_sent_of_type(MsgType::CLIENT_HELLO, 1).await;
	let err = h.session.call(request(b"still-early")).await.unwrap_err();
	assert!(matches!(err, Error::NotReady));
	assert!(h.controller.sent_requests().is_empty());

	h.controller.inject_welcome();
	connecting.await??;
	assert_eq!(h.session.outstanding_jobs(), 0);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn manual_handshake_after_log_on() -> anyhow::Result<()> {
	let config = SessionConfig {
		auto_handshake: false,
		..SessionConfig::default()
	};
	let h = harness(config);

	h.session.connect(credentials()).await?;
	assert_eq!(h.session.state(), SessionState::LoggedOn);
	assert!(h.controller.sent_of_type(MsgType::CLIENT_HELLO).is_empty());

	let waiters: Vec<_> = (0..2)
		.map(|_| {
			let session = h.session.clone();
			tokio::spawn(async move { session.wait_ready(Duration::from_secs(30)).await })
		})
		.collect();

	h.session.start_handshake().await?;
	h.session.start_handshake().await?;
	h.controller.wait_for_sent_of_type(MsgType::CLIENT_HELLO, 1).await;
	h.controller.inject_welcome();

	for waiter in waiters {
		waiter.await??;
	}
	assert!(h.session.is_ready());
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn welcome_for_another_app_is_ignored() -> anyhow::Result<()> {
	let h = harness(SessionConfig::default());
	let connecting = spawn_connect(&h);
	h.controller.wait_for_sent_of_type(MsgType::CLIENT_HELLO, 1).await;

	h.controller.inject_packet(InboundPacket::new(AppId(730), MsgType::CLIENT_WELCOME, Vec::new()));
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(h.session.state(), SessionState::AwaitingCoordinator);

	h.controller.inject_welcome();
	connecting.await??;
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn registered_handler_sees_unsolicited_messages() -> anyhow::Result<()> {
	let h = common::ready(SessionConfig::default()).await?;
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	let lobby_update = MsgType(7367);

	h.session.register_handler(lobby_update, move |packet| {
		let _ = tx.send(packet.body.clone());
	})?;
	assert!(h.session.register_handler(MsgType::CLIENT_WELCOME, |_| {}).is_err());

	h.controller.inject_packet(InboundPacket::new(AppId::DOTA2, lobby_update, b"lobby".to_vec()));
	assert_eq!(rx.recv().await.as_deref(), Some(&b"lobby"[..]));
	Ok(())
}

#[tokio::test]
async fn zero_probe_interval_is_rejected_at_construction() {
	let (parts, controller) = coord::FakeTransportBuilder::new().build();
	let config = SessionConfig {
		probe_interval_ms: 0,
		..SessionConfig::default()
	};

	let err = coord::SessionManager::new(parts, config).err().expect("zero interval must be rejected");
	assert!(matches!(err, Error::Config(ref msg) if msg.contains("probe_interval_ms")), "got {err:?}");
	assert_eq!(controller.connect_calls(), 0);
}
