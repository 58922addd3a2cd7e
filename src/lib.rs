//! Sandnet - network interfaces for Linux namespace sandboxes
//!
//! Moves kernel network devices into an isolated network namespace, configures
//! them and keeps a registry of what was placed there.

pub mod error;
pub mod manifest;
pub mod network;
