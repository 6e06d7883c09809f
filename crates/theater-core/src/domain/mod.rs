//! Routing domain model: values, envelopes and rules.
//!
//! Nothing here touches threads, sockets or files; the dispatch engine and
//! the rule store in `theater-router` build on these types.

pub mod envelope;
pub mod rule;
pub mod value;

pub use envelope::{Envelope, EnvelopeError};
pub use rule::Rule;
pub use value::{EnumType, Value, ValueCodecRegistry, ValueError, ValueType};
