//! OSC 1.0 codec
//!
//! AbletonOSC speaks plain OSC over UDP: one message (or, rarely, one bundle)
//! per datagram. Everything is big-endian and 4-byte aligned.
//!
//! ## Wire Format
//!
//! ```text
//! Address        OSC-string  "/live/song/get/tempo\0\0\0\0"
//! Type tags      OSC-string  ",f\0\0"
//! Arguments      per tag     i: i32   f: f32   h: i64   d: f64
//!                            s: OSC-string
//!                            b: u32 length + bytes, zero-padded to 4
//!                            T F N I: no payload
//! ```
//!
//! A bundle is `"#bundle\0"`, an 8-byte time tag, then any number of
//! `u32 size + element` pairs where each element is a message or a bundle.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Marker that opens every bundle
pub const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// Bundles nested deeper than this are rejected
const MAX_BUNDLE_DEPTH: usize = 8;

/// A single typed OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Bytes),
    Long(i64),
    Double(f64),
    Bool(bool),
    Nil,
    Impulse,
}

impl OscArg {
    /// The type tag character for this argument
    pub fn type_tag(&self) -> u8 {
        match self {
            OscArg::Int(_) => b'i',
            OscArg::Float(_) => b'f',
            OscArg::String(_) => b's',
            OscArg::Blob(_) => b'b',
            OscArg::Long(_) => b'h',
            OscArg::Double(_) => b'd',
            OscArg::Bool(true) => b'T',
            OscArg::Bool(false) => b'F',
            OscArg::Nil => b'N',
            OscArg::Impulse => b'I',
        }
    }

    /// Integer value, if this argument is an integer that fits in i32
    pub fn as_index(&self) -> Option<i32> {
        match self {
            OscArg::Int(v) => Some(*v),
            OscArg::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
}

/// A decoded OSC message
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }
}

/// Errors while decoding a datagram.
///
/// Any of these means the datagram is a malformed reply: the daemon logs it
/// and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OscError {
    #[error("Empty packet")]
    Empty,
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),
    #[error("Unterminated string in {0}")]
    Unterminated(&'static str),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("Missing type tag string")]
    MissingTypeTags,
    #[error("Unknown type tag {0:?}")]
    UnknownTypeTag(char),
    #[error("Truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Malformed bundle: {0}")]
    InvalidBundle(&'static str),
}

/// Check that an address is something AbletonOSC can route.
pub fn validate_address(address: &str) -> Result<(), OscError> {
    let valid = address.starts_with('/')
        && address.len() > 1
        && !address
            .chars()
            .any(|c| c == '\0' || c.is_whitespace() || c == ',' || c == '#');
    if valid {
        Ok(())
    } else {
        Err(OscError::InvalidAddress(address.to_string()))
    }
}

/// Encode a message into a datagram payload.
///
/// Never fails: every `OscArg` has a wire representation.
pub fn encode(message: &OscMessage) -> Bytes {
    let mut buf = BytesMut::with_capacity(padded_len(message.address.len() + 1) + 16);

    put_osc_string(&mut buf, message.address.as_bytes());

    let mut tags = Vec::with_capacity(message.args.len() + 1);
    tags.push(b',');
    tags.extend(message.args.iter().map(OscArg::type_tag));
    put_osc_string(&mut buf, &tags);

    for arg in &message.args {
        match arg {
            OscArg::Int(v) => buf.put_i32(*v),
            OscArg::Float(v) => buf.put_f32(*v),
            OscArg::String(s) => put_osc_string(&mut buf, s.as_bytes()),
            OscArg::Blob(b) => {
                buf.put_u32(b.len() as u32);
                buf.put_slice(b);
                buf.put_bytes(0, padded_len(b.len()) - b.len());
            }
            OscArg::Long(v) => buf.put_i64(*v),
            OscArg::Double(v) => buf.put_f64(*v),
            OscArg::Bool(_) | OscArg::Nil | OscArg::Impulse => {}
        }
    }

    buf.freeze()
}

/// Decode a datagram into the messages it carries.
///
/// A plain message yields one entry; a bundle is flattened depth-first.
pub fn decode_packet(data: &[u8]) -> Result<Vec<OscMessage>, OscError> {
    let mut messages = Vec::new();
    decode_into(data, 0, &mut messages)?;
    Ok(messages)
}

fn decode_into(data: &[u8], depth: usize, out: &mut Vec<OscMessage>) -> Result<(), OscError> {
    if data.is_empty() {
        return Err(OscError::Empty);
    }
    if !data.starts_with(BUNDLE_TAG) {
        out.push(decode_message(data)?);
        return Ok(());
    }
    if depth >= MAX_BUNDLE_DEPTH {
        return Err(OscError::InvalidBundle("nested too deeply"));
    }

    let mut buf = &data[BUNDLE_TAG.len()..];
    ensure(&buf, 8, "bundle time tag")?;
    // Time tags are ignored: AbletonOSC only ever sends "immediately".
    buf.advance(8);

    while buf.has_remaining() {
        ensure(&buf, 4, "bundle element size")?;
        let size = buf.get_u32() as usize;
        if size == 0 || size % 4 != 0 {
            return Err(OscError::InvalidBundle("element size not a positive multiple of 4"));
        }
        ensure(&buf, size, "bundle element")?;
        decode_into(&buf[..size], depth + 1, out)?;
        buf.advance(size);
    }

    Ok(())
}

/// Decode a single (non-bundle) message.
pub fn decode_message(data: &[u8]) -> Result<OscMessage, OscError> {
    let mut buf = data;

    let address = take_osc_str(&mut buf, "address")?;
    validate_address(&address)?;

    if !buf.has_remaining() {
        // OSC 1.0 says tags are required, but old senders omit them for
        // argument-less messages.
        return Ok(OscMessage::new(address, Vec::new()));
    }

    let tags = take_osc_str(&mut buf, "type tags")?;
    let tags = tags.strip_prefix(',').ok_or(OscError::MissingTypeTags)?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => {
                ensure(&buf, 4, "int argument")?;
                OscArg::Int(buf.get_i32())
            }
            'f' => {
                ensure(&buf, 4, "float argument")?;
                OscArg::Float(buf.get_f32())
            }
            'h' => {
                ensure(&buf, 8, "int64 argument")?;
                OscArg::Long(buf.get_i64())
            }
            'd' => {
                ensure(&buf, 8, "double argument")?;
                OscArg::Double(buf.get_f64())
            }
            's' | 'S' => OscArg::String(take_osc_str(&mut buf, "string argument")?),
            'b' => {
                ensure(&buf, 4, "blob size")?;
                let len = buf.get_u32() as usize;
                let padded = padded_len(len);
                ensure(&buf, padded, "blob")?;
                let blob = Bytes::copy_from_slice(&buf[..len]);
                buf.advance(padded);
                OscArg::Blob(blob)
            }
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            'N' => OscArg::Nil,
            'I' => OscArg::Impulse,
            other => return Err(OscError::UnknownTypeTag(other)),
        };
        args.push(arg);
    }

    Ok(OscMessage::new(address, args))
}

/// Round up to the next multiple of 4
fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Write bytes as an OSC-string: null terminated, zero-padded to 4.
fn put_osc_string(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_slice(bytes);
    let total = padded_len(bytes.len() + 1);
    buf.put_bytes(0, total - bytes.len());
}

fn ensure(buf: &&[u8], expected: usize, what: &'static str) -> Result<(), OscError> {
    if buf.remaining() < expected {
        return Err(OscError::Truncated {
            what,
            expected,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn take_osc_str(buf: &mut &[u8], what: &'static str) -> Result<String, OscError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::Unterminated(what))?;
    let text = std::str::from_utf8(&buf[..nul])
        .map_err(|_| OscError::InvalidUtf8(what))?
        .to_string();

    // Some senders drop the trailing pad on the last field; accept that.
    let padded = padded_len(nul + 1).min(buf.len());
    buf.advance(padded);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_no_args_layout() {
        let bytes = encode(&OscMessage::new("/live/test", vec![]));
        // "/live/test" is 10 bytes -> 12 with padding, "," -> 4
        assert_eq!(&bytes[..], b"/live/test\0\0,\0\0\0");
    }

    #[test]
    fn test_encode_address_on_boundary_gets_full_pad() {
        // 4-byte address still needs a terminator, so it takes 8 bytes
        let bytes = encode(&OscMessage::new("/abc", vec![]));
        assert_eq!(&bytes[..8], b"/abc\0\0\0\0");
    }

    #[test]
    fn test_encode_float_layout() {
        let bytes = encode(&OscMessage::new(
            "/live/song/set/tempo",
            vec![OscArg::Float(120.0)],
        ));
        let mut expected = Vec::new();
        expected.extend_from_slice(b"/live/song/set/tempo\0\0\0\0");
        expected.extend_from_slice(b",f\0\0");
        expected.extend_from_slice(&120.0f32.to_be_bytes());
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn test_decode_mixed_reply() {
        let msg = OscMessage::new(
            "/live/track/get/name",
            vec![
                OscArg::Int(2),
                OscArg::String("Bass".to_string()),
                OscArg::Bool(true),
                OscArg::Nil,
                OscArg::Double(0.5),
                OscArg::Long(1 << 40),
                OscArg::Blob(Bytes::from_static(&[1, 2, 3])),
            ],
        );
        let decoded = decode_packet(&encode(&msg)).unwrap();
        assert_eq!(decoded, vec![msg]);
    }

    #[test]
    fn test_decode_bundle_flattens() {
        let first = encode(&OscMessage::new("/live/song/get/tempo", vec![OscArg::Float(128.0)]));
        let second = encode(&OscMessage::new("/live/song/get/is_playing", vec![OscArg::Int(1)]));

        let mut inner = BytesMut::new();
        inner.put_slice(BUNDLE_TAG);
        inner.put_u64(1);
        inner.put_u32(second.len() as u32);
        inner.put_slice(&second);

        let mut outer = BytesMut::new();
        outer.put_slice(BUNDLE_TAG);
        outer.put_u64(1);
        outer.put_u32(first.len() as u32);
        outer.put_slice(&first);
        outer.put_u32(inner.len() as u32);
        outer.put_slice(&inner);

        let decoded = decode_packet(&outer).unwrap();
        let addresses: Vec<_> = decoded.iter().map(|m| m.address.as_str()).collect();
        assert_eq!(addresses, vec!["/live/song/get/tempo", "/live/song/get/is_playing"]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_packet(&[]), Err(OscError::Empty));
        assert!(matches!(
            decode_packet(b"hello\0\0\0"),
            Err(OscError::InvalidAddress(_))
        ));
        assert!(matches!(
            decode_packet(b"/live/test"),
            Err(OscError::Unterminated("address"))
        ));
    }

    #[test]
    fn test_decode_truncated_argument() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(b"/x\0\0,i\0\0");
        bytes.put_u16(7);
        let err = decode_packet(&bytes).unwrap_err();
        assert_eq!(
            err,
            OscError::Truncated {
                what: "int argument",
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = decode_packet(b"/x\0\0,m\0\0\0\0\0\0").unwrap_err();
        assert_eq!(err, OscError::UnknownTypeTag('m'));
    }

    #[test]
    fn test_decode_tagless_message() {
        let decoded = decode_message(b"/live/test\0\0").unwrap();
        assert!(decoded.args.is_empty());
    }

    #[test]
    fn test_bundle_with_bad_size() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(BUNDLE_TAG);
        bytes.put_u64(1);
        bytes.put_u32(6);
        bytes.put_slice(&[0; 6]);
        assert!(matches!(
            decode_packet(&bytes),
            Err(OscError::InvalidBundle(_))
        ));
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("/live/song/get/tempo").is_ok());
        assert!(validate_address("live/song").is_err());
        assert!(validate_address("/").is_err());
        assert!(validate_address("/live song").is_err());
    }
}
