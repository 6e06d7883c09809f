//! Application layer of the router.
//!
//! Everything here depends on abstractions only: device controllers are
//! reached through the [`registry::Source`] / [`registry::Destination`] traits
//! and rule persistence through [`rule_store::RuleStore`].  No sockets and no
//! file access live in this layer.
//!
//! # Sub-modules
//!
//! - **`dispatch`**   – The [`dispatch::DispatchEngine`]: ingress queue,
//!   background worker, rule evaluation and status reporting.
//!
//! - **`registry`**   – Name → capability table built from the live
//!   controllers.
//!
//! - **`rule_store`** – The persistence seam for the ordered rule list.

pub mod dispatch;
pub mod registry;
pub mod rule_store;
