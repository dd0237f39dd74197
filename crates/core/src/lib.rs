#![deny(unused)]
//! Core types, configuration, and error definitions for the code runner.
//!
//! This crate holds the data model shared between the execution engine and
//! whatever host embeds it: requests, resource limits, results, and the
//! structured error taxonomy callers match on.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
