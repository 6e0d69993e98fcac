//! `immo-watchdog` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod heartbeat;
pub mod restart;
pub mod supervisor;
