//! Projector control protocol: message types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{body_len, data_value, decode_response, encode_request, CodecError};
pub use messages::*;
