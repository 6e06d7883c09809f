//! Persistence boundary for the ordered rule list.
//!
//! The dispatch engine depends only on the [`RuleStore`] trait; the TOML file
//! implementation lives in `infrastructure::storage::rules_file`.

use std::path::PathBuf;

use theater_core::Rule;
use thiserror::Error;

/// Errors that abort a whole load or save.
///
/// Problems confined to a single record are reported through
/// [`LoadedRules::issues`] instead.
#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("I/O error accessing rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rule file {path} is not valid: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("failed to serialize rules: {0}")]
    Serialize(String),
}

/// Result of a successful load.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadedRules {
    /// Rules in file order.
    pub rules: Vec<Rule>,
    /// One line per skipped record or unresolved field.
    pub issues: Vec<String>,
}

/// Loads and saves the ordered rule list.
pub trait RuleStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`RuleStoreError`] when the store as a whole cannot be read.
    fn load(&self) -> Result<LoadedRules, RuleStoreError>;

    /// Persists every complete rule in order and returns how many were
    /// written; incomplete rules are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RuleStoreError`] if nothing could be written.
    fn save(&self, rules: &[Rule]) -> Result<usize, RuleStoreError>;
}
