//! Core type definitions for the code runner.
//!
//! Broken down into submodules: the request a caller submits, the resource
//! limits that bound it, per-language execution profiles, the sandbox handle
//! the engine tracks, and the result handed back.

pub mod limits;
pub mod profile;
pub mod request;
pub mod result;
pub mod sandbox;

pub use limits::*;
pub use profile::*;
pub use request::*;
pub use result::*;
pub use sandbox::*;
