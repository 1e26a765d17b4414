//! HTTP front end for the jackpot platform.
//!
//! The binary in `main.rs` wires a store, the [`jackpot::Platform`] and the
//! draw scheduler together; this library exposes the pieces so router tests
//! can drive them without a socket.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
