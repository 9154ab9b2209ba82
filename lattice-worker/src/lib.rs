//! # lattice-worker
//!
//! Process that a coordinator launches on every render host. It listens on
//! a TCP port, serves whichever coordinator connects, and keeps accepting
//! until a coordinator stops it with `NodeStop`.
//!
//! Connections that close without a stop, such as the coordinator's
//! readiness probe, are dropped and the next one is accepted.

pub mod service;
pub mod settings;
