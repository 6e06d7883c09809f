//! Dynamically-typed match and argument values.
//!
//! Rules compare envelope data against a stored value and pass a stored value
//! to a destination.  Both sides use [`Value`], a closed tagged union of the
//! kinds a device can publish or accept.  Every value has a canonical stored
//! representation ([`Value::encode`]) and a stable type tag
//! ([`ValueType::tag`]); [`ValueCodecRegistry`] maps each tag back to a decoder.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while turning a stored representation back into a [`Value`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    /// No decoder or enum type is registered for the tag.
    #[error("unknown type tag {0:?}")]
    UnknownTag(String),

    /// The enum type exists but has no member with this name.
    #[error("{type_name} has no member named {member:?}")]
    UnknownMember { type_name: String, member: String },

    /// The representation could not be converted to the tagged type.
    #[error("cannot read {raw:?} as {tag}: {reason}")]
    Parse {
        tag: String,
        raw: String,
        reason: String,
    },
}

// ── ValueType ─────────────────────────────────────────────────────────────────

pub const TAG_BOOL: &str = "bool";
pub const TAG_INTEGER: &str = "int";
pub const TAG_DECIMAL: &str = "decimal";
pub const TAG_TEXT: &str = "string";

/// The semantic type of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Integer,
    Decimal,
    Text,
    /// A named enumeration, e.g. `PowerStatus`.
    Enum(String),
}

impl ValueType {
    /// Stable string tag used in rule files.
    pub fn tag(&self) -> &str {
        match self {
            ValueType::Bool => TAG_BOOL,
            ValueType::Integer => TAG_INTEGER,
            ValueType::Decimal => TAG_DECIMAL,
            ValueType::Text => TAG_TEXT,
            ValueType::Enum(name) => name,
        }
    }

    /// Inverse of [`ValueType::tag`]; any non-builtin tag names an enum.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            TAG_BOOL => ValueType::Bool,
            TAG_INTEGER => ValueType::Integer,
            TAG_DECIMAL => ValueType::Decimal,
            TAG_TEXT => ValueType::Text,
            other => ValueType::Enum(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ValueType::Enum(name) if name.is_empty())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// A primitive or enum value exchanged between sources, rules and destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Enum { type_name: String, member: String },
    /// A stored value whose tag or representation could not be resolved.
    ///
    /// Only the rule loader produces this.  It is written back unchanged and
    /// never equals any published data.
    Unresolved { tag: String, raw: String },
}

impl Value {
    pub fn enum_member(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        Value::Enum {
            type_name: type_name.into(),
            member: member.into(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Integer(_) => ValueType::Integer,
            Value::Decimal(_) => ValueType::Decimal,
            Value::Text(_) => ValueType::Text,
            Value::Enum { type_name, .. } => ValueType::Enum(type_name.clone()),
            Value::Unresolved { tag, .. } => ValueType::from_tag(tag),
        }
    }

    /// Canonical stored representation, paired with [`ValueType::tag`].
    pub fn encode(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::Enum { member, .. } => member.clone(),
            Value::Unresolved { raw, .. } => raw.clone(),
        }
    }

    /// Whether the value counts as "not filled in" for a rule editor.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Text(s) => s.is_empty(),
            Value::Enum { type_name, member } => type_name.is_empty() || member.is_empty(),
            _ => false,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Value::Unresolved { .. })
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Enum { type_name, member } => write!(f, "{type_name}.{member}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Unresolved { tag, raw } => write!(f, "<unresolved {tag}: {raw:?}>"),
            other => f.write_str(&other.encode()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

// ── Enum definitions ──────────────────────────────────────────────────────────

/// A named enumeration a device publishes or accepts, e.g. `PowerStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<String>,
}

impl EnumType {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_member(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    /// Builds the value for `member`, checking it exists.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::UnknownMember`] if `member` is not defined.
    pub fn value(&self, member: &str) -> Result<Value, ValueError> {
        if self.has_member(member) {
            Ok(Value::enum_member(&self.name, member))
        } else {
            Err(ValueError::UnknownMember {
                type_name: self.name.clone(),
                member: member.to_string(),
            })
        }
    }
}

// ── Codec registry ────────────────────────────────────────────────────────────

/// Decodes a stored representation for one primitive tag.
pub type Decoder = fn(&str) -> Result<Value, ValueError>;

/// Explicit tag → decoder table used when loading rules.
///
/// Built-in primitive tags are registered by [`ValueCodecRegistry::new`];
/// enum types are added with [`ValueCodecRegistry::register_enum`] and resolve
/// members by name.
#[derive(Debug, Clone)]
pub struct ValueCodecRegistry {
    decoders: HashMap<String, Decoder>,
    enums: HashMap<String, EnumType>,
}

impl Default for ValueCodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueCodecRegistry {
    pub fn new() -> Self {
        let mut decoders: HashMap<String, Decoder> = HashMap::new();
        decoders.insert(TAG_BOOL.to_string(), decode_bool);
        decoders.insert(TAG_INTEGER.to_string(), decode_integer);
        decoders.insert(TAG_DECIMAL.to_string(), decode_decimal);
        decoders.insert(TAG_TEXT.to_string(), decode_text);
        Self {
            decoders,
            enums: HashMap::new(),
        }
    }

    /// Registers (or replaces) an enum type.
    pub fn register_enum(&mut self, enum_type: EnumType) {
        self.enums.insert(enum_type.name.clone(), enum_type);
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enums.get(name)
    }

    /// Converts `raw` back into a typed value according to `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::UnknownTag`] for unregistered tags, and
    /// [`ValueError::Parse`] / [`ValueError::UnknownMember`] when the
    /// representation does not fit the type.
    pub fn decode(&self, tag: &str, raw: &str) -> Result<Value, ValueError> {
        if let Some(decoder) = self.decoders.get(tag) {
            return decoder(raw);
        }
        match self.enums.get(tag) {
            Some(enum_type) => enum_type.value(raw),
            None => Err(ValueError::UnknownTag(tag.to_string())),
        }
    }
}

fn parse_error(tag: &str, raw: &str, reason: impl fmt::Display) -> ValueError {
    ValueError::Parse {
        tag: tag.to_string(),
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}

fn decode_bool(raw: &str) -> Result<Value, ValueError> {
    raw.trim()
        .parse::<bool>()
        .map(Value::Bool)
        .map_err(|e| parse_error(TAG_BOOL, raw, e))
}

fn decode_integer(raw: &str) -> Result<Value, ValueError> {
    raw.trim()
        .parse::<i64>()
        .map(Value::Integer)
        .map_err(|e| parse_error(TAG_INTEGER, raw, e))
}

fn decode_decimal(raw: &str) -> Result<Value, ValueError> {
    raw.trim()
        .parse::<f64>()
        .map(Value::Decimal)
        .map_err(|e| parse_error(TAG_DECIMAL, raw, e))
}

fn decode_text(raw: &str) -> Result<Value, ValueError> {
    Ok(Value::Text(raw.to_string()))
}
