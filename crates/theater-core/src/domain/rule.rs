//! User-authored match → action bindings.
//!
//! A [`Rule`] says "when `match_source` reports `match_value`, call
//! `action_name` with `action_args` on `action_destination`".  Rules are
//! edited interactively, so every field may be temporarily unset; only a
//! [complete](Rule::is_complete) rule is persisted.

use std::fmt;

use crate::domain::envelope::Envelope;
use crate::domain::value::{Value, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub match_source: String,
    pub match_value: Option<Value>,
    pub match_value_type: Option<ValueType>,
    pub action_destination: String,
    pub action_name: String,
    pub action_args: Option<Value>,
    pub args_type: Option<ValueType>,
    /// Disabled rules are kept but never fire.
    pub enabled: bool,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            match_source: String::new(),
            match_value: None,
            match_value_type: None,
            action_destination: String::new(),
            action_name: String::new(),
            action_args: None,
            args_type: None,
            enabled: true,
        }
    }
}

impl Rule {
    /// Builds a complete, enabled rule; both type tags are derived from the
    /// values.
    pub fn new(
        match_source: impl Into<String>,
        match_value: Value,
        action_destination: impl Into<String>,
        action_name: impl Into<String>,
        action_args: Value,
    ) -> Self {
        Self {
            match_source: match_source.into(),
            match_value_type: Some(match_value.value_type()),
            match_value: Some(match_value),
            action_destination: action_destination.into(),
            action_name: action_name.into(),
            args_type: Some(action_args.value_type()),
            action_args: Some(action_args),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether every field except `enabled` is filled in.
    pub fn is_complete(&self) -> bool {
        fn value_set(v: &Option<Value>) -> bool {
            v.as_ref().is_some_and(|v| !v.is_empty())
        }
        fn type_set(t: &Option<ValueType>) -> bool {
            t.as_ref().is_some_and(|t| !t.is_empty())
        }

        !self.match_source.is_empty()
            && value_set(&self.match_value)
            && type_set(&self.match_value_type)
            && !self.action_destination.is_empty()
            && !self.action_name.is_empty()
            && value_set(&self.action_args)
            && type_set(&self.args_type)
    }

    /// Whether this rule fires for `envelope`.
    ///
    /// Disabled rules never match.  The destination is not checked here.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.enabled
            && self.match_source == envelope.source()
            && self.match_value.as_ref() == Some(envelope.data())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self
            .match_value
            .as_ref()
            .map_or_else(|| "?".to_string(), ToString::to_string);
        let args = self
            .action_args
            .as_ref()
            .map_or_else(String::new, ToString::to_string);
        write!(
            f,
            "{} = {} -> {}.{}({})",
            self.match_source, value, self.action_destination, self.action_name, args
        )?;
        if !self.enabled {
            f.write_str(" [disabled]")?;
        }
        Ok(())
    }
}
