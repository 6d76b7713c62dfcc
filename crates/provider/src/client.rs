//! Client for the LXD REST API

use std::time::Duration;

use lxd_common::{
    CertificatesPost, ETag, Error, Network, NetworkPut, NetworksPost, Response, ResponseType,
    Result, ServerInfo, StoragePool, StoragePoolPut, StoragePoolsPost, API_VERSION,
    NETWORK_API_EXTENSION,
};
use reqwest::{header, Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ProviderConfig, RemoteConfig, Scheme};

const USER_AGENT: &str = concat!("terraform-provider-lxd/", env!("CARGO_PKG_VERSION"));

const NETWORK: &str = "network";
const STORAGE_POOL: &str = "storage pool";

/// Connected handle to one LXD remote
#[derive(Clone)]
pub struct LxdClient {
    remote: String,
    base_url: Url,
    http: Client,
    server: ServerInfo,
    /// Cluster member subsequent storage pool calls are scoped to
    target: Option<String>,
}

impl std::fmt::Debug for LxdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LxdClient")
            .field("remote", &self.remote)
            .field("base_url", &self.base_url.as_str())
            .field("target", &self.target)
            .finish()
    }
}

impl LxdClient {
    /// Connect to a remote, registering the client certificate if the remote
    /// does not trust it yet and a password is configured.
    pub async fn connect(remote: &RemoteConfig, config: &ProviderConfig) -> Result<Self> {
        let base_url = Url::parse(&remote.base_url())
            .map_err(|e| Error::connection(&remote.name, format!("invalid address: {}", e)))?;
        let http = build_http_client(remote, config).await?;

        let mut client = Self {
            remote: remote.name.clone(),
            base_url,
            http,
            server: ServerInfo::default(),
            target: None,
        };

        client.server = client.fetch_server_info().await?;

        if !client.server.is_trusted() {
            let Some(password) = remote.password.as_deref() else {
                return Err(Error::connection(
                    &remote.name,
                    "client certificate is not trusted and no password is configured",
                ));
            };

            info!("Registering client certificate with remote {}", remote.name);
            client
                .send::<_, serde_json::Value>(
                    Method::POST,
                    client.url(&["certificates"]),
                    Some(&CertificatesPost::client(password)),
                    None,
                    ("certificate", ""),
                )
                .await
                .map_err(|e| Error::connection(&remote.name, format!("authentication failed: {}", e)))?;

            client.server = client.fetch_server_info().await?;
            if !client.server.is_trusted() {
                return Err(Error::connection(&remote.name, "remote did not accept the client certificate"));
            }
        }

        info!(
            "Connected to remote {} ({} {})",
            client.remote, client.server.environment.server_name, client.server.environment.server_version
        );
        Ok(client)
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Handle whose storage pool calls are scoped to one cluster member
    pub fn use_target(&self, target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            ..self.clone()
        }
    }

    async fn fetch_server_info(&self) -> Result<ServerInfo> {
        let (info, _) = self
            .send::<(), ServerInfo>(Method::GET, self.url(&[]), None, None, ("server", &self.remote))
            .await
            .map_err(|e| match e {
                Error::Connection { .. } => e,
                other => Error::connection(&self.remote, other),
            })?;
        Ok(info)
    }

    // Network operations

    pub async fn create_network(&self, req: &NetworksPost) -> Result<()> {
        if !self.server.has_extension(NETWORK_API_EXTENSION) {
            return Err(Error::NotImplemented(format!(
                "The server is missing the required \"{}\" API extension",
                NETWORK_API_EXTENSION
            )));
        }

        self.send::<_, serde_json::Value>(
            Method::POST,
            self.url(&["networks"]),
            Some(req),
            None,
            (NETWORK, &req.name),
        )
        .await?;
        Ok(())
    }

    pub async fn get_network(&self, name: &str) -> Result<(Network, ETag)> {
        self.send::<(), Network>(Method::GET, self.url(&["networks", name]), None, None, (NETWORK, name))
            .await
    }

    pub async fn update_network(&self, name: &str, req: &NetworkPut, etag: &ETag) -> Result<()> {
        self.send::<_, serde_json::Value>(
            Method::PUT,
            self.url(&["networks", name]),
            Some(req),
            Some(etag),
            (NETWORK, name),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_network(&self, name: &str) -> Result<()> {
        self.send::<(), serde_json::Value>(
            Method::DELETE,
            self.url(&["networks", name]),
            None,
            None,
            (NETWORK, name),
        )
        .await?;
        Ok(())
    }

    // Storage pool operations

    pub async fn create_storage_pool(&self, req: &StoragePoolsPost) -> Result<()> {
        self.send::<_, serde_json::Value>(
            Method::POST,
            self.targeted_url(&["storage-pools"]),
            Some(req),
            None,
            (STORAGE_POOL, &req.name),
        )
        .await?;
        Ok(())
    }

    pub async fn get_storage_pool(&self, name: &str) -> Result<(StoragePool, ETag)> {
        self.send::<(), StoragePool>(
            Method::GET,
            self.targeted_url(&["storage-pools", name]),
            None,
            None,
            (STORAGE_POOL, name),
        )
        .await
    }

    pub async fn update_storage_pool(&self, name: &str, req: &StoragePoolPut, etag: &ETag) -> Result<()> {
        self.send::<_, serde_json::Value>(
            Method::PUT,
            self.targeted_url(&["storage-pools", name]),
            Some(req),
            Some(etag),
            (STORAGE_POOL, name),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_storage_pool(&self, name: &str) -> Result<()> {
        self.send::<(), serde_json::Value>(
            Method::DELETE,
            self.url(&["storage-pools", name]),
            None,
            None,
            (STORAGE_POOL, name),
        )
        .await?;
        Ok(())
    }

    // Transport

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(API_VERSION).extend(segments);
        }
        url
    }

    fn targeted_url(&self, segments: &[&str]) -> Url {
        let mut url = self.url(segments);
        if let Some(target) = &self.target {
            url.query_pairs_mut().append_pair("target", target);
        }
        url
    }

    /// Issue one request and decode the metadata of the response.
    ///
    /// `entity` names what the request addresses so error responses map onto
    /// `NotFound` / `Conflict` for the right thing.
    async fn send<B, T>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        etag: Option<&ETag>,
        entity: (&str, &str),
    ) -> Result<(T, ETag)>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(etag) = etag.filter(|e| !e.is_empty()) {
            request = request.header(header::IF_MATCH, etag.as_str());
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| ETag(v.to_string()))
            .unwrap_or_default();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        let envelope: Response = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(Error::from_response(status.as_u16(), text.trim(), entity.0, entity.1));
            }
            Err(e) => return Err(Error::Serialization(e)),
        };

        if envelope.kind == ResponseType::Error || !status.is_success() {
            let code = if envelope.error_code != 0 {
                envelope.error_code
            } else {
                status.as_u16()
            };
            if code >= 500 {
                warn!("LXD request for {} {} failed ({}): {}", entity.0, entity.1, code, envelope.error);
            } else {
                debug!("LXD request for {} {} failed ({}): {}", entity.0, entity.1, code, envelope.error);
            }
            return Err(Error::from_response(code, &envelope.error, entity.0, entity.1));
        }

        let metadata = if envelope.kind == ResponseType::Async {
            self.wait_operation(&envelope.operation, entity).await?
        } else {
            envelope.metadata
        };

        let value = serde_json::from_value(metadata)?;
        Ok((value, etag))
    }

    /// Block on a background operation until it completes
    async fn wait_operation(&self, operation: &str, entity: (&str, &str)) -> Result<serde_json::Value> {
        let mut url = self.base_url.clone();
        url.set_path(&format!("{}/wait", operation.trim_end_matches('/')));
        debug!("Waiting on operation {}", operation);

        let response = self.http.get(url).send().await.map_err(|e| self.transport_error(e))?;
        let envelope: Response = response.json().await.map_err(|e| self.transport_error(e))?;

        if envelope.kind == ResponseType::Error {
            return Err(Error::from_response(envelope.error_code, &envelope.error, entity.0, entity.1));
        }

        let op = &envelope.metadata;
        let err = op.get("err").and_then(|v| v.as_str()).unwrap_or_default();
        if !err.is_empty() {
            let code = op
                .get("status_code")
                .and_then(|v| v.as_u64())
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(500);
            return Err(Error::from_response(code, err, entity.0, entity.1));
        }

        Ok(op.get("metadata").cloned().unwrap_or(serde_json::Value::Null))
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            Error::connection(&self.remote, e)
        } else {
            Error::Http(e)
        }
    }
}

async fn build_http_client(remote: &RemoteConfig, config: &ProviderConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.request_timeout_secs));

    if remote.scheme == Scheme::Https {
        let cert_path = config.client_cert_path();
        let key_path = config.client_key_path();
        if cert_path.exists() && key_path.exists() {
            let mut pem = tokio::fs::read(&cert_path).await?;
            pem.extend(tokio::fs::read(&key_path).await?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| Error::InvalidConfig(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        } else {
            debug!("No client certificate in {}", config.config_dir.display());
        }

        let server_cert = config.server_cert_path(&remote.name);
        if server_cert.exists() {
            let pem = tokio::fs::read(&server_cert).await?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::InvalidConfig(format!("invalid server certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if config.accept_remote_certificate {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder
        .build()
        .map_err(|e| Error::connection(&remote.name, e))
}
