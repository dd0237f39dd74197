#![deny(unused)]
//! Logging setup for the code runner.

pub mod tracing_layer;

pub use tracing_layer::{build_filter, configure_tracing};
