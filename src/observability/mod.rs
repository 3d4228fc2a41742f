//! # Observability
//!
//! Tracing subscriber setup for the daemon binary.

pub mod logging;

pub use logging::init_tracing;
