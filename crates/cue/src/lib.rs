//! cue - command-line façade for the stagehand daemon
//!
//! [`client::DaemonClient`] speaks the daemon's JSON-line protocol over one
//! persistent connection. [`catalog`] names the common Live commands and
//! validates their parameters before they go out.

pub mod catalog;
pub mod client;
pub mod commands;

pub use catalog::{CatalogError, Invocation, Tool, TOOLS};
pub use client::{ClientError, DaemonClient};
