//! Provider context
//!
//! Shared by every resource operation once the provider is configured:
//! remote selection, connected server handles and the network-creation lock.

use std::collections::HashMap;

use lxd_common::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::MutexGuard;
use tracing::debug;

use crate::client::LxdClient;
use crate::config::ProviderConfig;
use crate::state::{get_optional_string_attr, DynamicValue};

pub struct ProviderContext {
    config: ProviderConfig,
    /// Connected handles, one per remote name
    servers: Mutex<HashMap<String, LxdClient>>,
    /// Held around network creation only; LXD does not cope with
    /// concurrent network creation from one client.
    network_create: tokio::sync::Mutex<()>,
}

impl ProviderContext {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            servers: Mutex::new(HashMap::new()),
            network_create: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Remote an operation targets: the declared one, else the default
    pub fn resolve_remote(&self, declared: Option<&str>) -> String {
        match declared {
            Some(remote) if !remote.is_empty() => remote.to_string(),
            _ => self.config.default_remote().to_string(),
        }
    }

    /// Remote selected by a resource's `remote` attribute
    pub fn select_remote(&self, state: &DynamicValue) -> String {
        self.resolve_remote(get_optional_string_attr(state, "remote").as_deref())
    }

    /// Connected handle for a remote, connecting on first use
    pub async fn server(&self, remote: &str) -> Result<LxdClient> {
        let cached = self.servers.lock().get(remote).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let remote_config = self
            .config
            .remote(remote)
            .ok_or_else(|| Error::connection(remote, "remote is not configured"))?;

        debug!("Connecting to remote {} at {}", remote, remote_config.base_url());
        let client = LxdClient::connect(remote_config, &self.config).await?;

        // A concurrent connect may have won the race; keep the first handle
        let client = self
            .servers
            .lock()
            .entry(remote.to_string())
            .or_insert(client)
            .clone();
        Ok(client)
    }

    /// Serialize network creation calls across concurrent operations
    pub async fn lock_network_create(&self) -> MutexGuard<'_, ()> {
        self.network_create.lock().await
    }
}
