//! LXD Common Library
//!
//! Wire types for the LXD REST API and the error type shared by the
//! provider crates.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version of the LXD REST API spoken by the provider
pub const API_VERSION: &str = "1.0";

/// Default HTTPS port of an LXD server
pub const DEFAULT_PORT: u16 = 8443;
