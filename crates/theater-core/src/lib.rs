//! # theater-core
//!
//! Shared library for the home theater router containing the routing domain
//! model and the projector control codec.
//!
//! It has no dependencies on OS APIs, sockets, threads or the file system.
//!
//! - **`domain`** – Typed values, the [`Envelope`] a device publishes when its
//!   state changes, and the [`Rule`] that binds a published value to an
//!   action on another device.
//!
//! - **`protocol`** – The binary request/response framing used to poll and
//!   control a networked projector: a fixed 10-byte header plus a short
//!   payload, with a closed [`ErrorKind`] taxonomy for failures.

pub mod domain;
pub mod protocol;

pub use domain::{Envelope, EnvelopeError, EnumType, Rule, Value, ValueCodecRegistry, ValueError, ValueType};
pub use protocol::codec::{data_value, decode_response, encode_request, CodecError};
pub use protocol::messages::{Community, ErrorKind, PowerState, Request, RequestType};
