//! stagehand - OSC correlation daemon for Ableton Live
//!
//! Sits between tool servers and AbletonOSC. Clients send JSON lines over
//! TCP; stagehand turns each one into an OSC datagram, waits for the peer's
//! reply where one is expected, and answers on the same connection.
//!
//! The peer sends replies from a port of its own choosing to a fixed port,
//! with no request id. [`correlator`] matches them to waiting requests by
//! address and object indices, one in flight per key.

pub mod correlator;
pub mod daemon;
pub mod session;
pub mod telemetry;

pub use correlator::{CorrelationError, Correlator};
pub use daemon::{Daemon, DaemonConfig, DaemonError, DaemonState, SHUTDOWN_GRACE};
