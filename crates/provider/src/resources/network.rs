//! Network Resource handler for Terraform

use lxd_common::{Error, Network, NetworkPut, NetworksPost, Result, NETWORK_TYPES};
use tracing::{debug, info};

use crate::context::ProviderContext;
use crate::schema::{one_of, Attribute, AttributeType, Schema};
use crate::state::{
    bool_value, get_string_attr, get_string_map_attr, string_map_value, string_value, DynamicValue,
};
use super::{found, Resource};

pub struct NetworkResource;

fn validate_network_type(value: &DynamicValue) -> std::result::Result<(), String> {
    one_of(value, NETWORK_TYPES)
}

#[async_trait::async_trait]
impl Resource for NetworkResource {
    fn type_name() -> &'static str {
        "lxd_network"
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Attribute::computed("id", AttributeType::String),
            Attribute::required("name", AttributeType::String).force_new(),
            Attribute::optional("type", AttributeType::String)
                .and_computed()
                .force_new()
                .validate(validate_network_type),
            Attribute::optional("description", AttributeType::String),
            Attribute::required("config", AttributeType::Map(Box::new(AttributeType::String))),
            Attribute::computed("managed", AttributeType::Bool),
            Attribute::optional("remote", AttributeType::String)
                .force_new()
                .default(string_value("")),
        ])
    }

    async fn create(ctx: &ProviderContext, config: &DynamicValue) -> Result<DynamicValue> {
        let server = ctx.server(&ctx.select_remote(config)).await?;

        let name = get_string_attr(config, "name");
        let req = NetworksPost {
            name: name.clone(),
            network_type: get_string_attr(config, "type"),
            put: NetworkPut {
                config: get_string_map_attr(config, "config"),
                description: get_string_attr(config, "description"),
            },
        };

        debug!("Creating network {} with config: {:?}", name, req.put.config);

        let created = {
            let _guard = ctx.lock_network_create().await;
            server.create_network(&req).await
        };

        created.map_err(|e| {
            if e.is_not_implemented() {
                Error::NetworksNotImplemented
            } else {
                e
            }
        })?;

        info!("Created network {} on remote {}", name, server.remote());

        let mut state = config.clone();
        state.set("id", string_value(&name));
        Self::read(ctx, &state)
            .await
            .map_err(|e| Error::created_unreadable("network", &name, e))
    }

    async fn read(ctx: &ProviderContext, state: &DynamicValue) -> Result<DynamicValue> {
        let server = ctx.server(&ctx.select_remote(state)).await?;
        let name = get_string_attr(state, "id");

        let (network, _) = server.get_network(&name).await?;
        debug!("Retrieved network {}: {:?}", name, network);

        Ok(network_to_state(state, &network))
    }

    async fn update(ctx: &ProviderContext, _state: &DynamicValue, config: &DynamicValue) -> Result<DynamicValue> {
        let server = ctx.server(&ctx.select_remote(config)).await?;
        let name = get_string_attr(config, "id");

        let (_, etag) = server.get_network(&name).await?;

        let req = NetworkPut {
            config: get_string_map_attr(config, "config"),
            description: get_string_attr(config, "description"),
        };

        debug!("Updating network {} with config: {:?}", name, req.config);
        server.update_network(&name, &req, &etag).await?;

        Self::read(ctx, config).await
    }

    async fn delete(ctx: &ProviderContext, state: &DynamicValue) -> Result<()> {
        let server = ctx.server(&ctx.select_remote(state)).await?;
        let name = get_string_attr(state, "id");

        server.delete_network(&name).await?;
        info!("Deleted network {} on remote {}", name, server.remote());
        Ok(())
    }

    async fn exists(ctx: &ProviderContext, state: &DynamicValue) -> Result<bool> {
        let server = ctx.server(&ctx.select_remote(state)).await?;
        let name = get_string_attr(state, "id");

        found(server.get_network(&name).await)
    }
}

fn network_to_state(state: &DynamicValue, net: &Network) -> DynamicValue {
    let mut new_state = NetworkResource::schema().conform(state);

    new_state.set("id", string_value(&net.name));
    new_state.set("name", string_value(&net.name));
    new_state.set_read_back("config", string_map_value(&net.config));
    new_state.set_read_back("description", string_value(&net.description));
    new_state.set("type", string_value(&net.network_type));
    new_state.set("managed", bool_value(net.managed));
    if new_state.get("remote").map_or(true, DynamicValue::is_null) {
        new_state.set("remote", string_value(""));
    }

    new_state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::make_state;
    use std::collections::HashMap;

    #[test]
    fn test_type_validation() {
        assert!(validate_network_type(&string_value("bridge")).is_ok());
        assert!(validate_network_type(&string_value("ovn")).is_ok());
        assert!(validate_network_type(&string_value("vxlan")).is_err());
    }

    #[test]
    fn test_network_to_state_keeps_remote() {
        let state = make_state(vec![
            ("id", string_value("lxdbr1")),
            ("remote", string_value("lab")),
        ]);
        let mut config = HashMap::new();
        config.insert("ipv4.address".to_string(), "10.150.19.1/24".to_string());
        let net = Network {
            name: "lxdbr1".to_string(),
            network_type: "bridge".to_string(),
            managed: true,
            config,
            ..Default::default()
        };

        let new_state = network_to_state(&state, &net);
        assert_eq!(get_string_attr(&new_state, "remote"), "lab");
        assert_eq!(get_string_attr(&new_state, "type"), "bridge");
        assert_eq!(new_state.get("managed"), Some(&bool_value(true)));
        assert_eq!(get_string_map_attr(&new_state, "config")["ipv4.address"], "10.150.19.1/24");
    }
}
