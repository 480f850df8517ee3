//! Job id allocation and the table of outstanding reply slots.
//!
//! # Message Flow
//!
//! 1. The request engine takes a fresh id from [`JobAllocator::next_id`]
//! 2. [`JobTable::register`] stores a oneshot sender under that id and hands back the [`ReplySlot`]
//! 3. The dispatcher matches an inbound packet's target job and calls [`JobTable::complete`]
//! 4. On timeout the engine calls [`JobTable::cancel`] instead
//!
//! `complete`, `cancel` and `fail_all` all take the same lock and remove the
//! entry they act on, so whichever reaches an id first wins and the other
//! becomes a no-op. Each slot is written at most once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use coord_protocol::{InboundPacket, JobId};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Strictly increasing job id source for one session.
///
/// The first id handed out is 1. Ids are never reset, including across
/// reconnects, so a late reply from a previous link can never match a job
/// issued on the current one.
#[derive(Debug, Default)]
pub struct JobAllocator {
	last_id: AtomicU64,
}

impl JobAllocator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns an id greater than every id previously returned.
	pub fn next_id(&self) -> JobId {
		// u64 exhaustion is unreachable at any realistic request rate
		JobId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
	}

	/// Returns the most recently allocated id, if any.
	pub fn last_id(&self) -> Option<JobId> {
		match self.last_id.load(Ordering::SeqCst) {
			0 => None,
			id => Some(JobId(id)),
		}
	}
}

type Delivery = Result<InboundPacket>;

/// Receiving half of one outstanding job.
#[derive(Debug)]
pub struct ReplySlot {
	job_id: JobId,
	rx: oneshot::Receiver<Delivery>,
}

impl ReplySlot {
	pub fn job_id(&self) -> JobId {
		self.job_id
	}

	/// Takes the delivery if one has already been made.
	pub fn try_take(&mut self) -> Option<Delivery> {
		self.rx.try_recv().ok()
	}
}

impl Future for ReplySlot {
	type Output = Delivery;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		// A dropped sender means the table itself was torn down.
		Pin::new(&mut self.rx).poll(cx).map(|delivery| delivery.unwrap_or_else(|_| Err(Error::Disconnected)))
	}
}

/// Concurrent mapping from job id to its single-use reply slot.
#[derive(Debug, Default)]
pub struct JobTable {
	pending: Mutex<HashMap<JobId, oneshot::Sender<Delivery>>>,
}

impl JobTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates the reply slot for `id`.
	///
	/// Fails with [`Error::DuplicateJob`] when `id` is still outstanding.
	pub fn register(&self, id: JobId) -> Result<ReplySlot> {
		let mut pending = self.pending.lock();
		if pending.contains_key(&id) {
			return Err(Error::DuplicateJob(id));
		}
		let (tx, rx) = oneshot::channel();
		pending.insert(id, tx);
		trace!(target = "coord.jobs", job_id = %id, outstanding = pending.len(), "job registered");
		Ok(ReplySlot { job_id: id, rx })
	}

	/// Delivers `packet` to the slot for `id` and removes it.
	///
	/// Returns `false` when no job is waiting on `id` (late or unknown reply).
	pub fn complete(&self, id: JobId, packet: InboundPacket) -> bool {
		let Some(tx) = self.pending.lock().remove(&id) else {
			return false;
		};
		// The waiter may have been dropped between removal and send; nothing is owed to it.
		if tx.send(Ok(packet)).is_err() {
			debug!(target = "coord.jobs", job_id = %id, "reply receiver dropped before delivery");
		}
		true
	}

	/// Removes the slot for `id` without delivering. Idempotent.
	///
	/// Returns `true` when this call removed the entry.
	pub fn cancel(&self, id: JobId) -> bool {
		let removed = self.pending.lock().remove(&id).is_some();
		if removed {
			trace!(target = "coord.jobs", job_id = %id, "job cancelled");
		}
		removed
	}

	/// Fails every outstanding job with an error built by `error`, emptying the table.
	///
	/// Returns the number of jobs failed.
	pub fn fail_all(&self, error: impl Fn() -> Error) -> usize {
		let drained: Vec<_> = self.pending.lock().drain().collect();
		let count = drained.len();
		for (id, tx) in drained {
			trace!(target = "coord.jobs", job_id = %id, "failing outstanding job");
			let _ = tx.send(Err(error()));
		}
		count
	}

	pub fn contains(&self, id: JobId) -> bool {
		self.pending.lock().contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.pending.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.lock().is_empty()
	}
}

/// Cancels its job when dropped unless disarmed.
///
/// Keeps the table free of entries whose caller stopped waiting, whether by
/// timeout or by dropping the request future.
pub(crate) struct JobGuard<'a> {
	table: &'a JobTable,
	id: JobId,
	armed: bool,
}

impl<'a> JobGuard<'a> {
	pub(crate) fn new(table: &'a JobTable, id: JobId) -> Self {
		Self { table, id, armed: true }
	}

	/// Cancels now, returning whether the entry was still present.
	pub(crate) fn cancel(mut self) -> bool {
		self.armed = false;
		self.table.cancel(self.id)
	}

	pub(crate) fn disarm(mut self) {
		self.armed = false;
	}

	/// Resolves a job whose wait for `slot` ran out after `after`.
	///
	/// Cancels the entry and yields `Timeout`, unless a reply took the entry
	/// first, in which case that reply is returned.
	pub(crate) fn expire(self, slot: &mut ReplySlot, after: Duration) -> Result<InboundPacket> {
		let job_id = self.id;
		if self.cancel() {
			warn!(target = "coord.jobs", %job_id, timeout_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX), "job timeout");
			return Err(Error::Timeout { job_id, after });
		}
		debug!(target = "coord.jobs", %job_id, "reply arrived as the job timed out");
		slot.try_take().unwrap_or(Err(Error::Timeout { job_id, after }))
	}
}

impl Drop for JobGuard<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.table.cancel(self.id);
		}
	}
}
