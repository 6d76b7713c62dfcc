//! Storage Pool Resource handler for Terraform
//!
//! With `target` set the pool definition is scoped to one cluster member.
//! A cluster-wide pool of the same name is declared as a separate resource
//! that depends on its member-scoped definitions.

use lxd_common::{Error, Result, StoragePool, StoragePoolPut, StoragePoolsPost, STORAGE_POOL_DRIVERS};
use tracing::{debug, info};

use crate::client::LxdClient;
use crate::context::ProviderContext;
use crate::schema::{one_of, Attribute, AttributeType, Schema};
use crate::state::{
    get_optional_string_attr, get_string_attr, get_string_map_attr, string_map_value,
    string_value, DynamicValue,
};
use super::{found, Resource};

pub struct StoragePoolResource;

fn validate_driver(value: &DynamicValue) -> std::result::Result<(), String> {
    one_of(value, STORAGE_POOL_DRIVERS)
}

/// Server handle scoped to the resource's target member, if any
async fn pool_server(ctx: &ProviderContext, state: &DynamicValue) -> Result<LxdClient> {
    let server = ctx.server(&ctx.select_remote(state)).await?;
    Ok(match get_optional_string_attr(state, "target") {
        Some(target) => server.use_target(&target),
        None => server,
    })
}

#[async_trait::async_trait]
impl Resource for StoragePoolResource {
    fn type_name() -> &'static str {
        "lxd_storage_pool"
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Attribute::computed("id", AttributeType::String),
            Attribute::required("name", AttributeType::String).force_new(),
            Attribute::required("driver", AttributeType::String)
                .force_new()
                .validate(validate_driver),
            Attribute::optional("description", AttributeType::String),
            Attribute::optional("config", AttributeType::Map(Box::new(AttributeType::String))),
            Attribute::optional("remote", AttributeType::String)
                .force_new()
                .default(string_value("")),
            Attribute::optional("target", AttributeType::String)
                .force_new()
                .describe("Cluster member to create a member-scoped pool definition on"),
        ])
    }

    async fn create(ctx: &ProviderContext, config: &DynamicValue) -> Result<DynamicValue> {
        let server = pool_server(ctx, config).await?;

        let name = get_string_attr(config, "name");
        let req = StoragePoolsPost {
            name: name.clone(),
            driver: get_string_attr(config, "driver"),
            put: StoragePoolPut {
                config: get_string_map_attr(config, "config"),
                description: get_string_attr(config, "description"),
            },
        };

        debug!("Creating storage pool {} with config: {:?}", name, req.put.config);
        server.create_storage_pool(&req).await?;
        info!("Created storage pool {} on remote {}", name, server.remote());

        let mut state = config.clone();
        state.set("id", string_value(&name));
        Self::read(ctx, &state)
            .await
            .map_err(|e| Error::created_unreadable("storage pool", &name, e))
    }

    async fn read(ctx: &ProviderContext, state: &DynamicValue) -> Result<DynamicValue> {
        let server = pool_server(ctx, state).await?;
        let name = get_string_attr(state, "id");

        let (pool, _) = server.get_storage_pool(&name).await?;
        debug!("Retrieved storage pool {}: {:?}", name, pool);

        Ok(pool_to_state(state, &pool))
    }

    async fn update(ctx: &ProviderContext, _state: &DynamicValue, config: &DynamicValue) -> Result<DynamicValue> {
        let server = pool_server(ctx, config).await?;
        let name = get_string_attr(config, "id");

        let (_, etag) = server.get_storage_pool(&name).await?;

        let req = StoragePoolPut {
            config: get_string_map_attr(config, "config"),
            description: get_string_attr(config, "description"),
        };

        debug!("Updating storage pool {} with config: {:?}", name, req.config);
        server.update_storage_pool(&name, &req, &etag).await?;

        Self::read(ctx, config).await
    }

    async fn delete(ctx: &ProviderContext, state: &DynamicValue) -> Result<()> {
        let server = ctx.server(&ctx.select_remote(state)).await?;
        let name = get_string_attr(state, "id");

        match server.delete_storage_pool(&name).await {
            // Deleting the cluster-wide pool already removed the member definitions
            Err(e) if e.is_not_found() && get_optional_string_attr(state, "target").is_some() => {
                debug!("Storage pool {} already removed from its cluster member", name);
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => {
                info!("Deleted storage pool {} on remote {}", name, server.remote());
                Ok(())
            }
        }
    }

    async fn exists(ctx: &ProviderContext, state: &DynamicValue) -> Result<bool> {
        let server = pool_server(ctx, state).await?;
        let name = get_string_attr(state, "id");

        found(server.get_storage_pool(&name).await)
    }
}

fn pool_to_state(state: &DynamicValue, pool: &StoragePool) -> DynamicValue {
    let mut new_state = StoragePoolResource::schema().conform(state);

    new_state.set("id", string_value(&pool.name));
    new_state.set("name", string_value(&pool.name));
    new_state.set("driver", string_value(&pool.driver));
    new_state.set_read_back("description", string_value(&pool.description));
    new_state.set_read_back("config", string_map_value(&pool.config));
    if new_state.get("remote").map_or(true, DynamicValue::is_null) {
        new_state.set("remote", string_value(""));
    }

    new_state
}
