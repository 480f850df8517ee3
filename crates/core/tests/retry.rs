//! Retrying correlated requests.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use common::{RESPONSE, harness, ready, request};
use coord::{Error, JobId, RetryPolicy, SessionConfig};

fn policy() -> RetryPolicy {
	RetryPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(1), 3)
}

/// Counts builds and stamps the attempt number into the body.
fn counting_builder(builds: Arc<AtomicU8>) -> impl FnMut() -> coord::OutboundMessage {
	move || {
		let n = builds.fetch_add(1, Ordering::SeqCst) + 1;
		request(&[n])
	}
}

#[tokio::test(start_paused = true)]
async fn every_attempt_times_out() -> anyhow::Result<()> {
	let h = ready(SessionConfig::default()).await?;
	let builds = Arc::new(AtomicU8::new(0));

	let err = h
		.session
		.call_with_retry(counting_builder(Arc::clone(&builds)), Duration::from_millis(50), &policy())
		.await
		.unwrap_err();

	match &err {
		Error::RetriesExhausted { attempts, source } => {
			assert_eq!(*attempts, 3);
			assert!(source.is_timeout(), "last error {source:?}");
		}
		other => panic!("expected RetriesExhausted, got {other:?}"),
	}
	assert_eq!(builds.load(Ordering::SeqCst), 3);

	let sent = h.controller.sent_requests();
	let ids: Vec<JobId> = sent.iter().filter_map(|m| m.source_job).collect();
	assert_eq!(ids.len(), 3);
	assert!(ids[0] < ids[1] && ids[1] < ids[2], "fresh job per attempt: {ids:?}");
	let bodies: Vec<Vec<u8>> = sent.iter().map(|m| m.body.clone()).collect();
	assert_eq!(bodies, vec![vec![1u8], vec![2], vec![3]]);

	assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
	assert_eq!(h.session.outstanding_jobs(), 0);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_attempt_succeeds() -> anyhow::Result<()> {
	let h = ready(SessionConfig::default()).await?;
	let builds = Arc::new(AtomicU8::new(0));

	let call = tokio::spawn({
		let session = h.session.clone();
		let build = counting_builder(Arc::clone(&builds));
		async move { session.call_with_retry(build, Duration::from_millis(50), &policy()).await }
	});

	let sent = h.controller.wait_for_requests(2).await;
	h.controller.inject_reply(sent[1].source_job.unwrap(), RESPONSE, b"ok".to_vec());

	let reply = call.await??;
	assert_eq!(reply.body, b"ok");
	assert_eq!(reply.target_job, sent[1].source_job);
	assert_eq!(builds.load(Ordering::SeqCst), 2);
	assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(100)]);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn send_failures_are_retried() -> anyhow::Result<()> {
	let h = ready(SessionConfig::default()).await?;
	h.controller.fail_sends(true);
	let builds = Arc::new(AtomicU8::new(0));

	let err = h
		.session
		.call_with_retry(counting_builder(Arc::clone(&builds)), Duration::from_millis(50), &policy())
		.await
		.unwrap_err();

	assert!(matches!(err.root_cause(), Error::SendFailed(_)), "got {err:?}");
	assert_eq!(builds.load(Ordering::SeqCst), 3);
	assert_eq!(h.session.outstanding_jobs(), 0);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn not_ready_is_not_retried() {
	let h = harness(SessionConfig::default());
	let builds = Arc::new(AtomicU8::new(0));

	let err = h.session.call_with_retry(counting_builder(Arc::clone(&builds)), Duration::from_millis(50), &policy()).await.unwrap_err();

	assert!(matches!(err, Error::NotReady), "got {err:?}");
	assert_eq!(builds.load(Ordering::SeqCst), 1);
	assert!(h.clock.sleeps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn configured_policy_is_used_by_default() -> anyhow::Result<()> {
	let config = SessionConfig {
		job_timeout_ms: 20,
		retry: RetryPolicy::new(Duration::from_millis(10), 2.0, Duration::from_millis(15), 4),
		..SessionConfig::default()
	};
	let h = ready(config).await?;
	let builds = Arc::new(AtomicU8::new(0));

	let err = h.session.call_retrying(counting_builder(Arc::clone(&builds))).await.unwrap_err();

	assert!(matches!(err, Error::RetriesExhausted { attempts: 4, .. }), "got {err:?}");
	assert_eq!(
		h.clock.sleeps(),
		vec![Duration::from_millis(10), Duration::from_millis(15), Duration::from_millis(15)]
	);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn unbounded_policy_sends_nothing() -> anyhow::Result<()> {
	let h = ready(SessionConfig::default()).await?;
	let builds = Arc::new(AtomicU8::new(0));
	let unbounded = RetryPolicy {
		max_attempts: None,
		max_elapsed_ms: None,
		..RetryPolicy::default()
	};

	let err = h.session.call_with_retry(counting_builder(Arc::clone(&builds)), Duration::from_millis(50), &unbounded).await.unwrap_err();

	assert!(matches!(err, Error::Config(_)), "got {err:?}");
	assert_eq!(builds.load(Ordering::SeqCst), 0);
	assert!(h.controller.sent_requests().is_empty());
	Ok(())
}
