//! TOML rule file.
//!
//! Rules are stored as an array of tables, one per rule, in evaluation order.
//! Every value is written as its canonical text next to its type tag:
//!
//! ```toml
//! [[rules]]
//! match_source = "AVR"
//! match_value = "On"
//! match_value_type = "PowerStatus"
//! action_destination = "Lighting"
//! action_name = "Dim"
//! action_args = "20"
//! args_type = "int"
//! enabled = true
//! ```
//!
//! Loading is tolerant per record: a record with wrongly typed fields is
//! skipped, and a value whose tag or text cannot be resolved is kept as
//! [`Value::Unresolved`].  Both cases are reported as issues while the other
//! rules still load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use theater_core::{Rule, Value, ValueCodecRegistry, ValueType};
use tracing::{debug, warn};

use crate::application::rule_store::{LoadedRules, RuleStore, RuleStoreError};

/// On-disk shape of one rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct RuleRecord {
    match_source: String,
    match_value: String,
    match_value_type: String,
    action_destination: String,
    action_name: String,
    action_args: String,
    args_type: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct RuleDocument<'a> {
    rules: &'a [RuleRecord],
}

/// [`RuleStore`] backed by a TOML file.
pub struct TomlRuleFile {
    path: PathBuf,
    codecs: ValueCodecRegistry,
}

impl TomlRuleFile {
    /// `codecs` resolves the type tags found in the file; enum types used by
    /// the rules must be registered in it.
    pub fn new(path: impl Into<PathBuf>, codecs: ValueCodecRegistry) -> Self {
        Self {
            path: path.into(),
            codecs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn malformed(&self, reason: impl ToString) -> RuleStoreError {
        RuleStoreError::Malformed {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Decodes one stored value; `None` when both halves are blank.
    fn decode_value(
        &self,
        index: usize,
        field: &str,
        raw: &str,
        tag: &str,
        issues: &mut Vec<String>,
    ) -> Option<Value> {
        if raw.is_empty() && tag.is_empty() {
            return None;
        }
        match self.codecs.decode(tag, raw) {
            Ok(value) => Some(value),
            Err(e) => {
                issues.push(format!("rule {}: {field}: {e}", index + 1));
                Some(Value::Unresolved {
                    tag: tag.to_string(),
                    raw: raw.to_string(),
                })
            }
        }
    }

    fn to_rule(&self, index: usize, record: RuleRecord, issues: &mut Vec<String>) -> Rule {
        let match_value = self.decode_value(
            index,
            "match_value",
            &record.match_value,
            &record.match_value_type,
            issues,
        );
        let action_args = self.decode_value(
            index,
            "action_args",
            &record.action_args,
            &record.args_type,
            issues,
        );
        Rule {
            match_source: record.match_source,
            match_value,
            match_value_type: type_from_tag(&record.match_value_type),
            action_destination: record.action_destination,
            action_name: record.action_name,
            action_args,
            args_type: type_from_tag(&record.args_type),
            enabled: record.enabled,
        }
    }
}

fn type_from_tag(tag: &str) -> Option<ValueType> {
    (!tag.is_empty()).then(|| ValueType::from_tag(tag))
}

fn record_of(rule: &Rule) -> RuleRecord {
    let encode = |v: &Option<Value>| v.as_ref().map(Value::encode).unwrap_or_default();
    let tag = |t: &Option<ValueType>| t.as_ref().map(|t| t.tag().to_string()).unwrap_or_default();
    RuleRecord {
        match_source: rule.match_source.clone(),
        match_value: encode(&rule.match_value),
        match_value_type: tag(&rule.match_value_type),
        action_destination: rule.action_destination.clone(),
        action_name: rule.action_name.clone(),
        action_args: encode(&rule.action_args),
        args_type: tag(&rule.args_type),
        enabled: rule.enabled,
    }
}

impl RuleStore for TomlRuleFile {
    fn load(&self) -> Result<LoadedRules, RuleStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("rule file {} does not exist yet", self.path.display());
                return Ok(LoadedRules::default());
            }
            Err(source) => {
                return Err(RuleStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let document: toml::Table = text.parse().map_err(|e| self.malformed(e))?;
        let entries = match document.get("rules") {
            None => return Ok(LoadedRules::default()),
            Some(toml::Value::Array(entries)) => entries,
            Some(other) => {
                return Err(self.malformed(format!(
                    "`rules` must be an array of tables, found {}",
                    other.type_str()
                )))
            }
        };

        let mut loaded = LoadedRules::default();
        for (index, entry) in entries.iter().enumerate() {
            let record: RuleRecord = match entry.clone().try_into() {
                Ok(record) => record,
                Err(e) => {
                    loaded
                        .issues
                        .push(format!("rule {} skipped: {}", index + 1, e.message()));
                    continue;
                }
            };
            let rule = self.to_rule(index, record, &mut loaded.issues);
            loaded.rules.push(rule);
        }

        for issue in &loaded.issues {
            warn!("{}: {issue}", self.path.display());
        }
        Ok(loaded)
    }

    fn save(&self, rules: &[Rule]) -> Result<usize, RuleStoreError> {
        let records: Vec<RuleRecord> = rules
            .iter()
            .filter(|rule| {
                let complete = rule.is_complete();
                if !complete {
                    debug!("not saving incomplete rule {rule}");
                }
                complete
            })
            .map(record_of)
            .collect();

        let text = toml::to_string_pretty(&RuleDocument { rules: &records })
            .map_err(|e| RuleStoreError::Serialize(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| RuleStoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, text).map_err(|source| RuleStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(records.len())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
