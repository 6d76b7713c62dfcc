//! Resource Implementations
//!
//! Implements the CRUD operations for each resource type.

pub mod network;
pub mod storage_pool;

use lxd_common::Result;

use crate::context::ProviderContext;
use crate::schema::Schema;
use crate::state::DynamicValue;

/// Trait for resource operations
#[async_trait::async_trait]
pub trait Resource {
    /// Resource type name
    fn type_name() -> &'static str;

    /// Configuration schema of the resource
    fn schema() -> Schema;

    /// Create a new resource and return its state
    async fn create(ctx: &ProviderContext, config: &DynamicValue) -> Result<DynamicValue>;

    /// Read an existing resource
    async fn read(ctx: &ProviderContext, state: &DynamicValue) -> Result<DynamicValue>;

    /// Update an existing resource in place
    async fn update(ctx: &ProviderContext, state: &DynamicValue, config: &DynamicValue) -> Result<DynamicValue>;

    /// Delete a resource
    async fn delete(ctx: &ProviderContext, state: &DynamicValue) -> Result<()>;

    /// Whether the resource still exists on the remote.
    ///
    /// Only a not-found answer maps to `false`; connection and API failures
    /// are returned as errors.
    async fn exists(ctx: &ProviderContext, state: &DynamicValue) -> Result<bool>;
}

/// Map a lookup result onto existence, letting every other failure through
pub(crate) fn found<T>(result: Result<T>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
