//! Wire types for the coordinator message bus.
//!
//! This crate contains the serde-serializable types exchanged with the
//! transport session: outbound messages addressed at the coordinator,
//! inbound packets delivered by it, the job identifiers that correlate the
//! two, and the log-on details used to establish the session.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond construction and decoding
//! * Schema agnostic: Payload bodies are opaque bytes owned by an external schema
//! * Stable: Changes only when the envelope shape changes
//!
//! Correlation, readiness and retry are built on top of these types in `coord-rs`.

pub mod credentials;
pub mod job;
pub mod message;

pub use credentials::*;
pub use job::*;
pub use message::*;
