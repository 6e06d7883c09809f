//! Storage infrastructure.
//!
//! - **`config`**     – `AppConfig` read from / written to the platform config
//!   directory, with defaults on first run.
//! - **`rules_file`** – [`RuleStore`](crate::application::rule_store::RuleStore)
//!   backed by a TOML file of `[[rules]]` tables.

pub mod config;
pub mod rules_file;
