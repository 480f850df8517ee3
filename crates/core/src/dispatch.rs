//! Routing of inbound coordinator packets.
//!
//! A packet whose target job is outstanding goes straight to that job's reply
//! slot. Anything else is looked up by message type in the handler table;
//! types with no entry are logged and dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use coord_protocol::{AppId, InboundPacket, JobId, MsgType};
use parking_lot::RwLock;
use tracing::{info, trace, warn};

use crate::error::{Error, Result};
use crate::jobs::JobTable;

/// Handler for an unsolicited packet type.
///
/// Handlers run on the dispatch loop and must not block.
pub type PacketHandler = Arc<dyn Fn(&InboundPacket) + Send + Sync>;

#[derive(Clone)]
enum Route {
	Welcome,
	ConnectionStatus,
	CacheSubscribed,
	Custom(PacketHandler),
}

impl fmt::Debug for Route {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Route::Welcome => f.write_str("Welcome"),
			Route::ConnectionStatus => f.write_str("ConnectionStatus"),
			Route::CacheSubscribed => f.write_str("CacheSubscribed"),
			Route::Custom(_) => f.write_str("Custom"),
		}
	}
}

/// Outcome of routing one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
	/// Packet belongs to another application.
	ForeignApp,
	/// Delivered to the waiting job.
	Reply,
	/// Carried a target job nobody is waiting on any more.
	LateReply { job_id: JobId, msg_type: MsgType },
	/// Coordinator welcome; the caller drives the handshake.
	Welcome,
	/// Consumed by a named handler.
	Handled,
	/// No handler registered.
	Unhandled,
}

/// Message-type dispatch table with a job-table fast path.
#[derive(Debug)]
pub(crate) struct Dispatcher {
	app_id: AppId,
	routes: RwLock<HashMap<MsgType, Route>>,
}

impl Dispatcher {
	pub(crate) fn new(app_id: AppId) -> Self {
		let routes = HashMap::from([
			(MsgType::CLIENT_WELCOME, Route::Welcome),
			(MsgType::CLIENT_CONNECTION_STATUS, Route::ConnectionStatus),
			(MsgType::CACHE_SUBSCRIBED, Route::CacheSubscribed),
		]);
		Self {
			app_id,
			routes: RwLock::new(routes),
		}
	}

	/// Installs `handler` for `msg_type`, replacing any diagnostic handler.
	///
	/// The welcome type drives readiness and cannot be overridden.
	pub(crate) fn register(&self, msg_type: MsgType, handler: PacketHandler) -> Result<()> {
		if msg_type == MsgType::CLIENT_WELCOME {
			return Err(Error::Config(format!("handler for {msg_type} is reserved")));
		}
		self.routes.write().insert(msg_type, Route::Custom(handler));
		Ok(())
	}

	pub(crate) fn route(&self, packet: InboundPacket, jobs: &JobTable) -> Routed {
		if packet.app_id != self.app_id {
			trace!(target = "coord.dispatch", app_id = %packet.app_id, "ignoring packet for other application");
			return Routed::ForeignApp;
		}

		if let Some(job_id) = packet.target_job {
			let msg_type = packet.msg_type;
			if jobs.complete(job_id, packet) {
				trace!(target = "coord.dispatch", %job_id, %msg_type, "reply delivered");
				return Routed::Reply;
			}
			return Routed::LateReply { job_id, msg_type };
		}

		let route = self.routes.read().get(&packet.msg_type).cloned();
		match route {
			Some(Route::Welcome) => {
				info!(target = "coord.dispatch", "received client welcome");
				Routed::Welcome
			}
			Some(Route::ConnectionStatus) => {
				info!(target = "coord.dispatch", bytes = packet.body.len(), "received connection status");
				Routed::Handled
			}
			Some(Route::CacheSubscribed) => {
				info!(target = "coord.dispatch", bytes = packet.body.len(), "received cache subscription");
				Routed::Handled
			}
			Some(Route::Custom(handler)) => {
				handler(&packet);
				Routed::Handled
			}
			None => {
				warn!(target = "coord.dispatch", msg_type = %packet.msg_type, "received message without a handler");
				Routed::Unhandled
			}
		}
	}
}
