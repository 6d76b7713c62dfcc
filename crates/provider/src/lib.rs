//! LXD Terraform Provider
//!
//! Terraform resources for LXD networks and storage pools, mapped onto the
//! LXD REST API. The plugin transport is left to the host; this crate
//! provides the provider lifecycle calls, schemas and resource logic.

pub mod client;
pub mod config;
pub mod context;
pub mod diagnostic;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod state;

pub use client::LxdClient;
pub use config::{ProviderConfig, RemoteConfig, Scheme};
pub use context::ProviderContext;
pub use diagnostic::{Diagnostic, Severity};
pub use provider::{LxdProvider, RawValue};
pub use resources::{network::NetworkResource, storage_pool::StoragePoolResource, Resource};
