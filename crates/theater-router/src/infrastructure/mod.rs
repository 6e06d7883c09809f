//! Infrastructure layer: OS-facing adapters.
//!
//! - **`storage`**   – TOML configuration and rule file persistence.
//! - **`projector`** – TCP link and destination/source controller for a
//!   networked projector.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `theater_core`, but MUST NOT be imported by the `application` layer.

pub mod projector;
pub mod storage;
