//! theater-router library entry point.
//!
//! Shares one module tree between the binary in `main.rs` and the
//! integration tests in `tests/`.

pub mod application;
pub mod infrastructure;
