//! LXD Terraform Provider Implementation
//!
//! Provider-level lifecycle calls shaped after the Terraform Plugin Protocol
//! v6. Values cross this boundary as encoded `RawValue`s, the way Terraform
//! core hands them over; each call decodes, dispatches to the resource
//! implementation and encodes the result.

use std::collections::HashMap;
use std::sync::Arc;

use lxd_common::{Error, Result};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::ProviderConfig;
use crate::context::ProviderContext;
use crate::diagnostic::Diagnostic;
use crate::logging;
use crate::resources::{network::NetworkResource, storage_pool::StoragePoolResource, Resource};
use crate::schema::{self, Schema};
use crate::state::{
    decode_dynamic_value, decode_json_value, encode_dynamic_value, make_state, string_value,
    DynamicValue,
};

/// Encoded Terraform value: msgpack, or JSON for raw stored state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawValue {
    pub msgpack: Vec<u8>,
    pub json: Vec<u8>,
}

impl RawValue {
    pub fn encode(value: &DynamicValue) -> Result<Self> {
        Ok(Self {
            msgpack: encode_dynamic_value(value)?,
            json: vec![],
        })
    }

    pub fn decode(&self) -> Result<DynamicValue> {
        if !self.msgpack.is_empty() {
            decode_dynamic_value(&self.msgpack)
        } else {
            decode_json_value(&self.json)
        }
    }
}

#[derive(Debug)]
pub struct ProviderSchema {
    pub provider: Schema,
    pub resource_schemas: HashMap<String, Schema>,
}

#[derive(Debug, Default)]
pub struct ReadResourceResponse {
    /// `None` tells Terraform the resource is gone and must be dropped from state
    pub new_state: Option<RawValue>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default)]
pub struct PlanResourceChangeResponse {
    pub planned_state: Option<RawValue>,
    /// Attribute paths whose change forces destroy-and-recreate
    pub requires_replace: Vec<Vec<String>>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default)]
pub struct ApplyResourceChangeResponse {
    pub new_state: Option<RawValue>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct ImportedResource {
    pub type_name: String,
    pub state: RawValue,
}

#[derive(Debug, Default)]
pub struct ImportResourceStateResponse {
    pub imported_resources: Vec<ImportedResource>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default)]
pub struct UpgradeResourceStateResponse {
    pub upgraded_state: Option<RawValue>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resource types served by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Network,
    StoragePool,
}

impl ResourceKind {
    fn from_type_name(type_name: &str) -> std::result::Result<Self, Diagnostic> {
        if type_name == NetworkResource::type_name() {
            Ok(ResourceKind::Network)
        } else if type_name == StoragePoolResource::type_name() {
            Ok(ResourceKind::StoragePool)
        } else {
            Err(Diagnostic::error(
                "Unknown resource type",
                format!("The provider does not implement resource type {}", type_name),
            ))
        }
    }

    fn schema(self) -> Schema {
        match self {
            ResourceKind::Network => NetworkResource::schema(),
            ResourceKind::StoragePool => StoragePoolResource::schema(),
        }
    }
}

/// Call a `Resource` operation on the implementation matching a kind
macro_rules! dispatch {
    ($kind:expr, $op:ident($($arg:expr),*)) => {
        match $kind {
            ResourceKind::Network => NetworkResource::$op($($arg),*).await,
            ResourceKind::StoragePool => StoragePoolResource::$op($($arg),*).await,
        }
    };
}

fn encode_or_diagnose(value: &DynamicValue, diagnostics: &mut Vec<Diagnostic>) -> Option<RawValue> {
    match RawValue::encode(value) {
        Ok(raw) => Some(raw),
        Err(e) => {
            diagnostics.push(Diagnostic::from_error("Failed to encode state", &e));
            None
        }
    }
}

/// LXD Terraform Provider
pub struct LxdProvider {
    context: RwLock<Option<Arc<ProviderContext>>>,
}

impl Default for LxdProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LxdProvider {
    pub fn new() -> Self {
        logging::try_init_logging();
        Self {
            context: RwLock::new(None),
        }
    }

    /// Provider that is already configured, bypassing the provider block
    pub fn with_config(config: ProviderConfig) -> Self {
        logging::try_init_logging();
        Self {
            context: RwLock::new(Some(Arc::new(ProviderContext::new(config)))),
        }
    }

    async fn context(&self) -> std::result::Result<Arc<ProviderContext>, Diagnostic> {
        self.context.read().await.clone().ok_or_else(|| {
            Diagnostic::error(
                "Provider not configured",
                "ConfigureProvider must be called before resource operations",
            )
        })
    }

    pub fn get_provider_schema(&self) -> ProviderSchema {
        info!("GetProviderSchema called");

        ProviderSchema {
            provider: schema::provider_schema(),
            resource_schemas: [
                (NetworkResource::type_name().to_string(), NetworkResource::schema()),
                (StoragePoolResource::type_name().to_string(), StoragePoolResource::schema()),
            ]
            .into_iter()
            .collect(),
        }
    }

    pub async fn configure_provider(&self, config: &RawValue) -> Vec<Diagnostic> {
        info!("ConfigureProvider called");

        let config = match config
            .decode()
            .and_then(|block| ProviderConfig::from_provider_block(&block))
        {
            Ok(config) => config,
            Err(e) => {
                error!("Invalid provider configuration: {}", e);
                return vec![Diagnostic::from_error("Invalid provider configuration", &e)];
            }
        };

        let ctx = ProviderContext::new(config);

        // Resources may target other remotes, so an unreachable default only warns
        let mut diagnostics = vec![];
        let default_remote = ctx.config().default_remote().to_string();
        if ctx.config().remote(&default_remote).is_some() {
            info!("Connecting to default remote {}", default_remote);
            if let Err(e) = ctx.server(&default_remote).await {
                warn!("Failed to connect to remote {}: {}", default_remote, e);
                diagnostics.push(Diagnostic::warning(
                    "Default LXD remote is unavailable",
                    e.to_string(),
                ));
            }
        }

        *self.context.write().await = Some(Arc::new(ctx));
        diagnostics
    }

    pub fn validate_resource_config(&self, type_name: &str, config: &RawValue) -> Vec<Diagnostic> {
        debug!("ValidateResourceConfig called for {}", type_name);

        let kind = match ResourceKind::from_type_name(type_name) {
            Ok(kind) => kind,
            Err(diag) => return vec![diag],
        };

        match config.decode() {
            Ok(config) => kind.schema().validate(&config),
            Err(e) => vec![Diagnostic::from_error("Failed to decode configuration", &e)],
        }
    }

    pub fn upgrade_resource_state(&self, type_name: &str, raw_state: &RawValue) -> UpgradeResourceStateResponse {
        debug!("UpgradeResourceState called for {}", type_name);

        let mut response = UpgradeResourceStateResponse::default();
        let kind = match ResourceKind::from_type_name(type_name) {
            Ok(kind) => kind,
            Err(diag) => {
                response.diagnostics.push(diag);
                return response;
            }
        };

        match raw_state.decode() {
            Ok(state) => {
                let schema = kind.schema();
                let mut upgraded = schema.conform(&state);
                schema.apply_defaults(&mut upgraded);
                response.upgraded_state = encode_or_diagnose(&upgraded, &mut response.diagnostics);
            }
            Err(e) => {
                response
                    .diagnostics
                    .push(Diagnostic::from_error("Failed to decode stored state", &e));
            }
        }

        response
    }

    pub async fn read_resource(&self, type_name: &str, current_state: &RawValue) -> ReadResourceResponse {
        info!("ReadResource called for {}", type_name);

        let mut response = ReadResourceResponse::default();
        let (kind, ctx) = match self.prepare(type_name).await {
            Ok(prepared) => prepared,
            Err(diag) => {
                response.diagnostics.push(diag);
                return response;
            }
        };

        let current = match current_state.decode() {
            Ok(current) => current,
            Err(e) => {
                response.diagnostics.push(Diagnostic::from_error("Failed to decode state", &e));
                return response;
            }
        };

        let exists = dispatch!(kind, exists(&ctx, &current));
        let result = match exists {
            Ok(false) => {
                info!("{} is gone from the remote, dropping it from state", type_name);
                return response;
            }
            Ok(true) => dispatch!(kind, read(&ctx, &current)),
            Err(e) => Err(e),
        };

        match result {
            Ok(state) => {
                response.new_state = encode_or_diagnose(&state, &mut response.diagnostics);
            }
            // Deleted between the existence check and the read
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                response.new_state = Some(current_state.clone());
                response.diagnostics.push(Diagnostic::from_error("Failed to read resource", &e));
            }
        }

        response
    }

    pub async fn plan_resource_change(
        &self,
        type_name: &str,
        prior_state: &RawValue,
        proposed_new_state: &RawValue,
    ) -> PlanResourceChangeResponse {
        debug!("PlanResourceChange called for {}", type_name);

        let mut response = PlanResourceChangeResponse::default();
        let kind = match ResourceKind::from_type_name(type_name) {
            Ok(kind) => kind,
            Err(diag) => {
                response.diagnostics.push(diag);
                return response;
            }
        };

        let (prior, proposed) = match (prior_state.decode(), proposed_new_state.decode()) {
            (Ok(prior), Ok(proposed)) => (prior, proposed),
            (Err(e), _) | (_, Err(e)) => {
                response.diagnostics.push(Diagnostic::from_error("Failed to decode plan", &e));
                return response;
            }
        };

        // Destroy
        if proposed.is_null() {
            response.planned_state = encode_or_diagnose(&DynamicValue::Null, &mut response.diagnostics);
            return response;
        }

        let schema = kind.schema();
        let mut planned = schema.conform(&proposed);
        schema.apply_defaults(&mut planned);

        let replace = if prior.is_null() {
            vec![]
        } else {
            schema.requires_replace(&prior, &planned)
        };

        // A new object gets fresh server-side values; computed-only values
        // carried over from the prior object are stale once it is replaced
        let recreate = prior.is_null() || !replace.is_empty();
        for attr in schema.computed_attributes() {
            let unset = planned.get(attr.name).map_or(true, DynamicValue::is_null);
            if recreate && (unset || !attr.optional) {
                planned.set(attr.name, DynamicValue::Unknown);
            } else if unset {
                planned.set(attr.name, prior.get(attr.name).cloned().unwrap_or_default());
            }
        }

        response.requires_replace = replace.into_iter().map(|name| vec![name]).collect();
        response.planned_state = encode_or_diagnose(&planned, &mut response.diagnostics);
        response
    }

    pub async fn apply_resource_change(
        &self,
        type_name: &str,
        prior_state: &RawValue,
        planned_state: &RawValue,
    ) -> ApplyResourceChangeResponse {
        info!("ApplyResourceChange called for {}", type_name);

        let mut response = ApplyResourceChangeResponse::default();
        let (kind, ctx) = match self.prepare(type_name).await {
            Ok(prepared) => prepared,
            Err(diag) => {
                response.diagnostics.push(diag);
                return response;
            }
        };

        let (prior, planned) = match (prior_state.decode(), planned_state.decode()) {
            (Ok(prior), Ok(planned)) => (prior, planned),
            (Err(e), _) | (_, Err(e)) => {
                response.diagnostics.push(Diagnostic::from_error("Failed to decode state", &e));
                return response;
            }
        };

        let result = match (prior.is_null(), planned.is_null()) {
            // Create
            (true, false) => dispatch!(kind, create(&ctx, &planned)),
            // Delete
            (false, true) => dispatch!(kind, delete(&ctx, &prior)).map(|_| DynamicValue::Null),
            // Update
            (false, false) => dispatch!(kind, update(&ctx, &prior, &planned)),
            // No change
            (true, true) => Ok(DynamicValue::Null),
        };

        match result {
            Ok(new_state) => {
                response.new_state = encode_or_diagnose(&new_state, &mut response.diagnostics);
            }
            Err(e) => {
                error!("Failed to apply {} change: {}", type_name, e);
                // Keep the prior object in state when an update or delete fails
                if !prior.is_null() {
                    response.new_state = Some(prior_state.clone());
                } else if let Error::CreatedUnreadable { name, .. } = &e {
                    // Track the object that now exists remotely so the next
                    // run refreshes or replaces it instead of orphaning it
                    let mut created = planned.without_unknowns();
                    created.set("id", string_value(name));
                    response.new_state = encode_or_diagnose(&created, &mut response.diagnostics);
                }
                response
                    .diagnostics
                    .push(Diagnostic::from_error("Failed to apply resource change", &e));
            }
        }

        response
    }

    /// Import an existing entity. The ID is `[remote:]name`.
    pub async fn import_resource_state(&self, type_name: &str, id: &str) -> ImportResourceStateResponse {
        info!("ImportResourceState called for {} with ID {}", type_name, id);

        let mut response = ImportResourceStateResponse::default();
        let (kind, ctx) = match self.prepare(type_name).await {
            Ok(prepared) => prepared,
            Err(diag) => {
                response.diagnostics.push(diag);
                return response;
            }
        };

        let (remote, name) = parse_import_id(id);
        if name.is_empty() {
            response.diagnostics.push(Diagnostic::error(
                "Invalid import ID",
                format!("Expected [remote:]name, got \"{}\"", id),
            ));
            return response;
        }

        let initial_state = make_state(vec![
            ("id", string_value(name)),
            ("name", string_value(name)),
            ("remote", string_value(remote)),
        ]);

        match dispatch!(kind, read(&ctx, &initial_state)) {
            Ok(state) => {
                if let Some(raw) = encode_or_diagnose(&state, &mut response.diagnostics) {
                    response.imported_resources.push(ImportedResource {
                        type_name: type_name.to_string(),
                        state: raw,
                    });
                }
            }
            Err(e) => {
                response.diagnostics.push(Diagnostic::from_error("Failed to import resource", &e));
            }
        }

        response
    }

    pub async fn stop_provider(&self) {
        info!("StopProvider called");
    }

    async fn prepare(&self, type_name: &str) -> std::result::Result<(ResourceKind, Arc<ProviderContext>), Diagnostic> {
        let kind = ResourceKind::from_type_name(type_name)?;
        let ctx = self.context().await?;
        Ok((kind, ctx))
    }
}

/// Split an import ID of the form `[remote:]name`
fn parse_import_id(id: &str) -> (&str, &str) {
    match id.split_once(':') {
        Some((remote, name)) => (remote, name),
        None => ("", id),
    }
}
