//! LXD REST API types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Network types accepted by `POST /1.0/networks`
pub const NETWORK_TYPES: &[&str] = &["bridge", "macvlan", "sriov", "ovn", "physical"];

/// Storage drivers accepted by `POST /1.0/storage-pools`
pub const STORAGE_POOL_DRIVERS: &[&str] = &["dir", "lvm", "btrfs", "zfs", "ceph", "cephfs"];

/// API extension a server must advertise to manage networks
pub const NETWORK_API_EXTENSION: &str = "network";

/// Kind of an LXD response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Sync,
    Async,
    Error,
}

/// Envelope wrapping every LXD API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub error_code: u16,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Response {
    /// Build a successful synchronous response around `metadata`
    pub fn sync(metadata: serde_json::Value) -> Self {
        Self {
            kind: ResponseType::Sync,
            status: "Success".to_string(),
            status_code: 200,
            operation: String::new(),
            error_code: 0,
            error: String::new(),
            metadata,
        }
    }

    /// Build an error response
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ResponseType::Error,
            status: String::new(),
            status_code: 0,
            operation: String::new(),
            error_code: code,
            error: message.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Opaque entity version returned by reads and required by updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ETag(pub String);

impl ETag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime environment reported by `GET /1.0`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerEnvironment {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub server_clustered: bool,
}

/// Server information returned by `GET /1.0`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub api_extensions: Vec<String>,
    #[serde(default)]
    pub api_status: String,
    #[serde(default)]
    pub api_version: String,
    /// `trusted` or `untrusted`
    #[serde(default)]
    pub auth: String,
    #[serde(default)]
    pub environment: ServerEnvironment,
}

impl ServerInfo {
    pub fn is_trusted(&self) -> bool {
        self.auth == "trusted"
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        self.api_extensions.iter().any(|e| e == extension)
    }
}

/// Body of `POST /1.0/certificates`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificatesPost {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl CertificatesPost {
    pub fn client(password: impl Into<String>) -> Self {
        Self {
            kind: "client".to_string(),
            name: String::new(),
            password: password.into(),
        }
    }
}

/// Mutable fields of a network (`PUT /1.0/networks/{name}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPut {
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /1.0/networks`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworksPost {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub network_type: String,
    #[serde(flatten)]
    pub put: NetworkPut,
}

/// A network as returned by `GET /1.0/networks/{name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub network_type: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub used_by: Vec<String>,
}

/// Mutable fields of a storage pool (`PUT /1.0/storage-pools/{name}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoragePoolPut {
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /1.0/storage-pools`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoragePoolsPost {
    pub name: String,
    pub driver: String,
    #[serde(flatten)]
    pub put: StoragePoolPut,
}

/// A storage pool as returned by `GET /1.0/storage-pools/{name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub used_by: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_parsing() {
        let json = r#"{"type": "error", "error": "not found", "error_code": 404, "metadata": null}"#;
        let response: Response = serde_json::from_str(json).unwrap();
        assert_eq!(response.kind, ResponseType::Error);
        assert_eq!(response.error_code, 404);
        assert_eq!(response.error, "not found");
    }

    #[test]
    fn test_networks_post_flattens_put() {
        let mut put = NetworkPut::default();
        put.config.insert("ipv4.address".to_string(), "10.0.0.1/24".to_string());

        let req = NetworksPost {
            name: "lxdbr1".to_string(),
            network_type: String::new(),
            put,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["name"], "lxdbr1");
        assert_eq!(json["config"]["ipv4.address"], "10.0.0.1/24");
        // Empty type lets the server pick its default
        assert!(json.get("type").is_none());
    }

    #[test]
    fn test_server_info_trust_and_extensions() {
        let json = r#"{
            "api_extensions": ["storage", "network"],
            "api_status": "stable",
            "api_version": "1.0",
            "auth": "untrusted",
            "environment": {"server_name": "lxd01", "server_clustered": true}
        }"#;
        let info: ServerInfo = serde_json::from_str(json).unwrap();
        assert!(!info.is_trusted());
        assert!(info.has_extension("network"));
        assert!(!info.has_extension("clustering"));
        assert!(info.environment.server_clustered);
    }
}
