//! Networked projector controller.
//!
//! - **`link`**       – [`link::DeviceLink`] seam and its TCP implementation,
//!   one request in flight per connection.
//! - **`controller`** – [`controller::ProjectorDestination`] (power, input and
//!   picture actions) and [`controller::PowerWatcher`], which publishes
//!   `ProjectorPower` envelopes.

pub mod controller;
pub mod link;

pub use controller::{power_enum, PowerWatcher, ProjectorDestination, POWER_ENUM};
pub use link::{DeviceLink, ProjectorLink};
