//! # lattice-coordinator
//!
//! Drives one cluster run from a settings file: creates and launches the
//! listed nodes, initialises them, renders a fixed number of frames with
//! the configured latency, then exits and stops every node.

pub mod app;
pub mod settings;
