//! # haggle-connection
//!
//! The single persistent gateway connection and everything that keeps it
//! alive.
//!
//! - [`ConnectionSupervisor`]: owns the connect/register/serve/reconnect
//!   lifecycle; all writes funnel through its one task
//! - [`ConnectionHandle`]: cloneable front door for queueing outbound
//!   messages and watching [`ConnState`]
//! - [`run_heartbeat`]: liveness probing with a hard ack deadline
//! - [`TransportConnector`] / [`WsConnector`]: the dial seam, WebSocket in
//!   production and channel fakes in tests

#![deny(unsafe_code)]

pub mod heartbeat;
pub mod supervisor;
pub mod transport;

pub use heartbeat::{HeartbeatOutcome, ProbeState, run_heartbeat};
pub use supervisor::{ConnState, ConnectionHandle, ConnectionSupervisor};
pub use transport::{TransportConnector, TransportReader, TransportWriter, WsConnector};
