//! Wire commands and reply correlation.
//!
//! AbletonOSC never echoes a request identifier. A reply comes back on the
//! address that asked for it, with the object indices of the query repeated
//! in front of the value:
//!
//! ```text
//! -> /live/track/get/volume  [2]
//! <- /live/track/get/volume  [2, 0.85]
//! ```
//!
//! [`CorrelationKey`] is the only place that knows this. If the peer ever
//! grows a real request id, only the derivation here changes.

use std::fmt;

use bytes::Bytes;

use crate::osc::{self, OscArg, OscError, OscMessage};

/// Address prefixes whose commands produce a reply.
///
/// Everything else (setters, transport, create/delete) is acted on silently
/// by the peer and is sent fire-and-forget.
pub const RESPONSE_PREFIXES: &[&str] = &[
    "/live/device/get",
    "/live/scene/get",
    "/live/view/get",
    "/live/clip/get",
    "/live/clip_slot/get",
    "/live/track/get",
    "/live/song/get",
    "/live/api/get",
    "/live/application/get",
    "/live/test",
];

/// The address the peer reports errors on.
pub const ERROR_ADDRESS: &str = "/live/error";

/// Does a command on this address get a reply from the peer?
pub fn expects_reply(address: &str) -> bool {
    RESPONSE_PREFIXES.iter().any(|prefix| {
        address == *prefix
            || address
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// How many leading integer arguments identify the object an address talks
/// about. The peer repeats exactly these in its replies.
fn index_arity(address: &str) -> usize {
    // "/live/<scope>/..."
    match address.split('/').nth(2) {
        Some("track") | Some("scene") => 1,
        Some("clip") | Some("clip_slot") | Some("device") => 2,
        _ => 0,
    }
}

/// A command ready to go on the wire: an address and positional arguments.
///
/// Immutable once built; the address is validated on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct WireCommand {
    address: String,
    args: Vec<OscArg>,
}

impl WireCommand {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Result<Self, OscError> {
        let address = address.into();
        osc::validate_address(&address)?;
        Ok(Self { address, args })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[OscArg] {
        &self.args
    }

    pub fn expects_reply(&self) -> bool {
        expects_reply(&self.address)
    }

    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::for_command(self)
    }

    /// Encode to a datagram payload.
    pub fn encode(&self) -> Bytes {
        osc::encode(&OscMessage::new(self.address.clone(), self.args.clone()))
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.address, self.args)
    }
}

/// What a reply is matched on: the address plus the object indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    address: String,
    indices: Vec<i32>,
}

impl CorrelationKey {
    /// Key for an outgoing command.
    pub fn for_command(command: &WireCommand) -> Self {
        Self::derive(&command.address, &command.args)
    }

    /// Key for an incoming reply.
    pub fn for_reply(message: &OscMessage) -> Self {
        Self::derive(&message.address, &message.args)
    }

    fn derive(address: &str, args: &[OscArg]) -> Self {
        let indices = args
            .iter()
            .take(index_arity(address))
            .map_while(OscArg::as_index)
            .collect();
        Self {
            address: address.to_string(),
            indices,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        if !self.indices.is_empty() {
            let indices: Vec<String> = self.indices.iter().map(i32::to_string).collect();
            write!(f, "[{}]", indices.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(address: &str, args: Vec<OscArg>) -> WireCommand {
        WireCommand::new(address, args).unwrap()
    }

    #[test]
    fn test_getters_expect_replies() {
        assert!(expects_reply("/live/song/get/tempo"));
        assert!(expects_reply("/live/track/get/volume"));
        assert!(expects_reply("/live/test"));
        assert!(expects_reply("/live/application/get/version"));
    }

    #[test]
    fn test_setters_are_fire_and_forget() {
        assert!(!expects_reply("/live/song/set/tempo"));
        assert!(!expects_reply("/live/song/start_playing"));
        assert!(!expects_reply("/live/clip/fire"));
        // Prefix match is per path segment
        assert!(!expects_reply("/live/song/getter"));
        assert!(!expects_reply("/live/testing"));
    }

    #[test]
    fn test_song_key_is_address_only() {
        let key = cmd("/live/song/get/track_names", vec![OscArg::Int(0), OscArg::Int(4)]).key();
        assert_eq!(key.to_string(), "/live/song/get/track_names");
    }

    #[test]
    fn test_track_key_includes_index() {
        let key = cmd("/live/track/get/volume", vec![OscArg::Int(2)]).key();
        assert_eq!(key.to_string(), "/live/track/get/volume[2]");
    }

    #[test]
    fn test_reply_matches_command_with_echoed_indices() {
        let command = cmd("/live/clip/get/name", vec![OscArg::Int(1), OscArg::Int(3)]);
        let reply = OscMessage::new(
            "/live/clip/get/name",
            vec![
                OscArg::Int(1),
                OscArg::Int(3),
                OscArg::String("Verse".to_string()),
            ],
        );
        assert_eq!(command.key(), CorrelationKey::for_reply(&reply));
    }

    #[test]
    fn test_different_tracks_do_not_collide() {
        let a = cmd("/live/track/get/volume", vec![OscArg::Int(0)]).key();
        let b = cmd("/live/track/get/volume", vec![OscArg::Int(1)]).key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_non_integer_leading_arg_stops_indices() {
        let reply = OscMessage::new(
            "/live/device/get/name",
            vec![OscArg::Int(0), OscArg::String("EQ Eight".to_string())],
        );
        assert_eq!(
            CorrelationKey::for_reply(&reply).to_string(),
            "/live/device/get/name[0]"
        );
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(WireCommand::new("live/song/get/tempo", vec![]).is_err());
    }
}
