//! Binary codec for projector control requests and responses.
//!
//! Request wire format:
//! ```text
//! [version:1][category:1][community:4][request_type:1][item_id:2][data_len:1][data:N]
//! ```
//!
//! Response wire format:
//! ```text
//! [version:1][category:1][community:4][result:1][item_id:2][len:1][body:len]
//! ```
//!
//! On `ERROR` the body is a 2-byte error code; on `OK` for a `Get` it is the
//! item value.  All multi-byte integers are big-endian.

use crate::protocol::messages::{
    ErrorKind, Request, RequestType, ResultCode, HEADER_SIZE, LENGTH_OFFSET, PROTOCOL_CATEGORY,
    PROTOCOL_VERSION, RESULT_OFFSET,
};
use thiserror::Error;
use tracing::debug;

/// Errors raised while building a request or interpreting a payload.
///
/// These are local encoding problems; failures reported by the device are
/// [`ErrorKind`]s.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The payload does not fit the single length byte.
    #[error("payload of {0} bytes exceeds the 255-byte limit")]
    PayloadTooLong(usize),

    /// A value payload was neither 1 nor 2 bytes long.
    #[error("cannot interpret a {0}-byte payload as an item value")]
    UnsupportedValueLength(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Request`] into the 10-byte header followed by its payload.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLong`] if `request.data` exceeds 255 bytes.
///
/// # Examples
///
/// ```rust
/// use theater_core::protocol::codec::encode_request;
/// use theater_core::protocol::messages::{items, Community, Request};
///
/// let bytes = encode_request(&Request::get(Community::default(), items::MODEL_NAME)).unwrap();
/// assert_eq!(bytes, [0x02, 0x0A, b'S', b'O', b'N', b'Y', 0x01, 0x80, 0x01, 0x00]);
/// ```
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    let data_len =
        u8::try_from(request.data.len()).map_err(|_| CodecError::PayloadTooLong(request.data.len()))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + request.data.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(PROTOCOL_CATEGORY);
    buf.extend_from_slice(request.community.as_bytes());
    buf.push(request.request_type as u8);
    buf.extend_from_slice(&request.item_id.to_be_bytes());
    buf.push(data_len);
    buf.extend_from_slice(&request.data);
    Ok(buf)
}

/// Decodes a complete response frame.
///
/// `request_type` is the type of the request this frame answers; correlation
/// is implicit because only one request is ever in flight per connection.
///
/// Returns the item payload (empty for a successful `Set`).
///
/// # Errors
///
/// Returns the [`ErrorKind`] carried by an ERROR frame, or
/// [`ErrorKind::UnknownResponse`] for frames that are too short, carry an
/// unknown result byte, or declare more bytes than they contain.
///
/// # Examples
///
/// ```rust
/// use theater_core::protocol::codec::decode_response;
/// use theater_core::protocol::messages::RequestType;
///
/// let frame = [0x02, 0x0A, b'S', b'O', b'N', b'Y', 0x01, 0x00, 0x00, 0x04, b'M', b'O', b'D', b'L'];
/// assert_eq!(decode_response(&frame, RequestType::Get).unwrap(), b"MODL");
/// ```
pub fn decode_response(raw: &[u8], request_type: RequestType) -> Result<Vec<u8>, ErrorKind> {
    if raw.len() < HEADER_SIZE {
        debug!("response of {} bytes is shorter than the header", raw.len());
        return Err(ErrorKind::UnknownResponse);
    }

    let result = ResultCode::try_from(raw[RESULT_OFFSET]).map_err(|_| {
        debug!("unknown result byte 0x{:02X}", raw[RESULT_OFFSET]);
        ErrorKind::UnknownResponse
    })?;

    let len = raw[LENGTH_OFFSET] as usize;
    match result {
        ResultCode::Error => {
            if len == 0 {
                return Err(ErrorKind::UnknownResponse);
            }
            let code = read_u16(raw, HEADER_SIZE).ok_or(ErrorKind::UnknownResponse)?;
            Err(ErrorKind::from_code(code))
        }
        ResultCode::Ok => match request_type {
            RequestType::Set => Ok(Vec::new()),
            RequestType::Get => {
                let body = raw
                    .get(HEADER_SIZE..HEADER_SIZE + len)
                    .ok_or(ErrorKind::UnknownResponse)?;
                Ok(body.to_vec())
            }
        },
    }
}

/// Number of body bytes that follow a response header.
///
/// Used by transports to know how much to read after the fixed header.
pub fn body_len(header: &[u8; HEADER_SIZE]) -> usize {
    header[LENGTH_OFFSET] as usize
}

/// Interprets an item payload as an integer value.
///
/// A 1-byte payload is returned as-is; a 2-byte payload is read as a
/// big-endian `u16`.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedValueLength`] for any other length.
pub fn data_value(payload: &[u8]) -> Result<u16, CodecError> {
    match payload {
        [b] => Ok(u16::from(*b)),
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(CodecError::UnsupportedValueLength(payload.len())),
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
