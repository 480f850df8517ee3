//! Correlated request/reply over an event-driven coordinator bus.
//!
//! The coordinator is reachable only through unsolicited inbound messages on
//! a long-lived transport session. This crate turns that into ordinary
//! awaitable calls. It handles:
//! - Allocating strictly increasing job ids
//! - Correlating reply packets with the one caller waiting for them
//! - Bounding every wait with a timeout, without leaking reply slots
//! - The connect / log-on / hello / welcome handshake that gates requests
//! - Retrying transient failures with exponential backoff
//! - Failing outstanding jobs and reconnecting when the link drops
//!
//! # Example
//!
//! ```ignore
//! use coord::{Credentials, OutboundMessage, SessionConfig, SessionManager};
//!
//! let session = SessionManager::new(transport_parts, SessionConfig::default())?;
//! session.spawn();
//! session.connect(Credentials::new("user", "password")).await?;
//!
//! let reply = session.call(OutboundMessage::new(app_id, msg_type, body)).await?;
//! ```

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod jobs;
pub mod retry;
pub mod session;
pub mod transport;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{ReconnectConfig, SessionConfig};
pub use coord_protocol::{AppId, Credentials, InboundPacket, JobId, MsgType, OutboundMessage};
pub use dispatch::PacketHandler;
pub use error::{Error, Result};
pub use handshake::SessionState;
pub use jobs::{JobAllocator, JobTable, ReplySlot};
pub use retry::{RetryPolicy, with_retry};
pub use session::{SessionEvent, SessionManager, SessionStatus};
pub use transport::fake::{FakeCall, FakeTransportBuilder, FakeTransportController};
pub use transport::{Transport, TransportEvent, TransportFuture, TransportParts};
