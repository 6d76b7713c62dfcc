//! Provider configuration
//!
//! Built from the Terraform `provider "lxd"` block, with `LXD_*`
//! environment variables filling in what the block leaves out.

use std::path::{Path, PathBuf};

use lxd_common::{Error, Result, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

use crate::state::{get_bool_attr, get_optional_string_attr, get_string_attr, DynamicValue};

/// Remote used when nothing else selects one
pub const FALLBACK_REMOTE: &str = "local";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Transport scheme of a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Https,
    Http,
}

impl std::str::FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "https" => Ok(Scheme::Https),
            "http" => Ok(Scheme::Http),
            "unix" => Err(Error::InvalidConfig(
                "unix socket remotes are not supported, use https".to_string(),
            )),
            other => Err(Error::InvalidConfig(format!("unknown remote scheme: {}", other))),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Https => write!(f, "https"),
            Scheme::Http => write!(f, "http"),
        }
    }
}

/// A named LXD endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub scheme: Scheme,
    /// Trust password used to register the client certificate
    pub password: Option<String>,
    /// Use this remote when a resource does not name one
    pub default: bool,
}

impl RemoteConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: DEFAULT_PORT,
            scheme: Scheme::Https,
            password: None,
            default: false,
        }
    }

    /// Base URL of the remote, without the API version
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.address, self.port)
    }

    fn from_dynamic_value(value: &DynamicValue) -> Result<Self> {
        let name = get_string_attr(value, "name");
        let address = get_string_attr(value, "address");
        let port = match value.get("port") {
            Some(DynamicValue::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| Error::InvalidConfig(format!("invalid port for remote {}: {}", name, n)))?,
            Some(DynamicValue::String(s)) if !s.is_empty() => parse_port(&name, s)?,
            _ => DEFAULT_PORT,
        };

        Ok(Self {
            scheme: get_string_attr(value, "scheme").parse()?,
            password: get_optional_string_attr(value, "password"),
            default: get_bool_attr(value, "default", false),
            name,
            address,
            port,
        })
    }
}

fn parse_port(remote: &str, s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid port for remote {}: {}", remote, s)))
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub remotes: Vec<RemoteConfig>,

    /// Remote name from `LXD_REMOTE`; wins over the `default` flag
    pub default_remote: Option<String>,

    /// Directory holding `client.crt`, `client.key` and `servercerts/`
    pub config_dir: PathBuf,

    /// Skip verification of the server certificate
    pub accept_remote_certificate: bool,

    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            remotes: Vec::new(),
            default_remote: None,
            config_dir: default_config_dir(),
            accept_remote_certificate: false,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ProviderConfig {
    /// Build the configuration from the provider block, then the process environment
    pub fn from_provider_block(block: &DynamicValue) -> Result<Self> {
        let mut config = Self::from_dynamic_value(block)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse the provider block without consulting the environment
    pub fn from_dynamic_value(block: &DynamicValue) -> Result<Self> {
        let mut config = Self::default();

        if let Some(DynamicValue::List(remotes)) = block.get("remote") {
            for remote in remotes {
                config.remotes.push(RemoteConfig::from_dynamic_value(remote)?);
            }
        }

        if let Some(dir) = get_optional_string_attr(block, "config_dir") {
            config.config_dir = expand_home(&dir);
        }

        config.accept_remote_certificate = get_bool_attr(block, "accept_remote_certificate", false);

        if let Some(DynamicValue::Number(n)) = block.get("request_timeout") {
            config.request_timeout_secs = n.as_u64().ok_or_else(|| {
                Error::InvalidConfig(format!("request_timeout must be a whole number of seconds, got {}", n))
            })?;
        }

        Ok(config)
    }

    /// Fill unset values from `LXD_*` variables
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());

        if self.default_remote.is_none() {
            self.default_remote = env("LXD_REMOTE");
        }

        if !self.accept_remote_certificate {
            self.accept_remote_certificate = env("LXD_ACCEPT_SERVER_CERTIFICATE")
                .map(|v| matches!(v.as_str(), "1" | "true"))
                .unwrap_or(false);
        }

        let Some(address) = env("LXD_ADDR") else {
            return;
        };

        let name = self
            .default_remote
            .clone()
            .unwrap_or_else(|| FALLBACK_REMOTE.to_string());
        if self.remote(&name).is_some() {
            return;
        }

        let mut remote = RemoteConfig::new(name, address);
        if let Some(port) = env("LXD_PORT").and_then(|p| p.parse().ok()) {
            remote.port = port;
        }
        if let Some(scheme) = env("LXD_SCHEME").and_then(|s| s.parse().ok()) {
            remote.scheme = scheme;
        }
        remote.password = env("LXD_PASSWORD");
        remote.default = self.remotes.iter().all(|r| !r.default);
        self.remotes.push(remote);
    }

    /// Check the remote table is usable
    pub fn validate(&self) -> Result<()> {
        let mut defaults = 0;
        for (i, remote) in self.remotes.iter().enumerate() {
            if remote.name.is_empty() {
                return Err(Error::InvalidConfig("remote name must not be empty".to_string()));
            }
            if remote.address.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "remote {} has no address",
                    remote.name
                )));
            }
            if self.remotes[..i].iter().any(|r| r.name == remote.name) {
                return Err(Error::InvalidConfig(format!(
                    "remote {} is defined more than once",
                    remote.name
                )));
            }
            if remote.default {
                defaults += 1;
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        if defaults > 1 {
            return Err(Error::InvalidConfig(
                "only one remote may be marked as default".to_string(),
            ));
        }

        Ok(())
    }

    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.iter().find(|r| r.name == name)
    }

    /// Name of the process-wide default remote
    pub fn default_remote(&self) -> &str {
        if let Some(name) = &self.default_remote {
            return name;
        }

        self.remotes
            .iter()
            .find(|r| r.default)
            .or_else(|| self.remotes.first())
            .map(|r| r.name.as_str())
            .unwrap_or(FALLBACK_REMOTE)
    }

    pub fn client_cert_path(&self) -> PathBuf {
        self.config_dir.join("client.crt")
    }

    pub fn client_key_path(&self) -> PathBuf {
        self.config_dir.join("client.key")
    }

    pub fn server_cert_path(&self, remote: &str) -> PathBuf {
        self.config_dir.join("servercerts").join(format!("{}.crt", remote))
    }
}

/// `$HOME/.config/lxc`, the directory the `lxc` client keeps its certificates in
pub fn default_config_dir() -> PathBuf {
    home_dir().join(".config").join("lxc")
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => Path::new(path).to_path_buf(),
    }
}
