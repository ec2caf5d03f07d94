//! stageproto - wire types shared by the stagehand daemon and its clients
//!
//! Two protocols meet here:
//!
//! - **OSC over UDP** between the daemon and Ableton Live (AbletonOSC).
//!   See [`osc`] for the codec and [`command`] for how replies are matched
//!   back to the commands that caused them.
//! - **JSON lines over TCP** between a façade (tool server, CLI) and the
//!   daemon. See [`envelope`].
//!
//! [`convert`] is the boundary between the two: JSON argument values in,
//! typed OSC arguments out, and back again for replies.

pub mod command;
pub mod convert;
pub mod envelope;
pub mod osc;

pub use command::{expects_reply, CorrelationKey, WireCommand, ERROR_ADDRESS, RESPONSE_PREFIXES};
pub use convert::{args_from_json, args_to_json};
pub use envelope::{parse_request, Action, DaemonStatus, EnvelopeError, Rejected, Request, Response};
pub use osc::{decode_packet, encode, OscArg, OscError, OscMessage};
