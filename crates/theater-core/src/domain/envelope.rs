//! The unit exchanged between publishers and the dispatch engine.

use std::fmt;

use thiserror::Error;

use crate::domain::value::{Value, ValueType};

/// Precondition violations when building an [`Envelope`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope source name must not be empty")]
    EmptySource,
    #[error("envelope data must be a resolved value")]
    UnresolvedData,
}

/// An immutable published event: "`source` now reports `data`".
///
/// The source is identified by name rather than by reference so that an
/// envelope never keeps its publisher alive.  `data_type` is derived from
/// `data` at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    source: String,
    data_type: ValueType,
    data: Value,
}

impl Envelope {
    /// # Errors
    ///
    /// Returns [`EnvelopeError::EmptySource`] for an empty source name and
    /// [`EnvelopeError::UnresolvedData`] for [`Value::Unresolved`] data.
    pub fn new(source: impl Into<String>, data: Value) -> Result<Self, EnvelopeError> {
        let source = source.into();
        if source.is_empty() {
            return Err(EnvelopeError::EmptySource);
        }
        if data.is_unresolved() {
            return Err(EnvelopeError::UnresolvedData);
        }
        Ok(Self {
            data_type: data.value_type(),
            source,
            data,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn data_type(&self) -> &ValueType {
        &self.data_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.data)
    }
}
