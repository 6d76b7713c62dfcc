//! In-process fake LXD server for integration tests
//!
//! Implements the slice of the REST API the provider uses, with real ETags,
//! cluster-member scoped storage pools and certificate trust.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lxd_common::{
    CertificatesPost, Network, NetworkPut, NetworksPost, Response as LxdResponse, ResponseType,
    ServerInfo, StoragePool, StoragePoolPut, StoragePoolsPost,
};
use parking_lot::Mutex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use terraform_provider_lxd::{LxdProvider, ProviderConfig, ProviderContext, RemoteConfig, Scheme};

pub const REMOTE: &str = "fake";

#[derive(Default)]
struct Inner {
    trusted: bool,
    password: Option<String>,
    networks_implemented: bool,
    networks: HashMap<String, Network>,
    pools: HashMap<String, StoragePool>,
    member_pools: HashMap<(String, String), StoragePool>,
    network_creates_in_flight: usize,
    max_network_creates_in_flight: usize,
    fail_network_reads: bool,
    /// Answer network deletes with a background operation
    async_deletes: bool,
    /// `(status_code, err)` the next operations finish with
    operation_failure: Option<(u16, String)>,
    operations: HashMap<String, (u16, String)>,
    next_operation: u64,
}

pub struct FakeLxd {
    pub addr: SocketAddr,
    state: Arc<Mutex<Inner>>,
}

#[derive(Debug, Deserialize)]
struct TargetQuery {
    target: Option<String>,
}

fn etag_of(config: &HashMap<String, String>, description: &str) -> String {
    let sorted: BTreeMap<_, _> = config.iter().collect();
    let payload = serde_json::json!({ "config": sorted, "description": description });
    hex::encode(Sha256::digest(payload.to_string().as_bytes()))
}

fn sync_response(metadata: serde_json::Value, etag: Option<String>) -> Response {
    let body = Json(LxdResponse::sync(metadata));
    match etag {
        Some(etag) => (StatusCode::OK, [(header::ETAG, etag)], body).into_response(),
        None => (StatusCode::OK, body).into_response(),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(LxdResponse::error(status.as_u16(), message))).into_response()
}

/// Register a background operation and answer with its async envelope
fn start_operation(inner: &mut Inner) -> Response {
    inner.next_operation += 1;
    let id = format!("op-{}", inner.next_operation);
    let outcome = inner
        .operation_failure
        .clone()
        .unwrap_or((200, String::new()));
    inner.operations.insert(id.clone(), outcome);

    let envelope = LxdResponse {
        kind: ResponseType::Async,
        status: "Operation created".to_string(),
        status_code: 100,
        operation: format!("/1.0/operations/{}", id),
        error_code: 0,
        error: String::new(),
        metadata: serde_json::json!({ "id": id }),
    };
    (StatusCode::ACCEPTED, Json(envelope)).into_response()
}

fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

type Shared = State<Arc<Mutex<Inner>>>;

async fn server_info(State(state): Shared) -> Response {
    let inner = state.lock();
    let info = ServerInfo {
        api_extensions: vec!["storage".to_string(), "network".to_string(), "clustering".to_string()],
        api_status: "stable".to_string(),
        api_version: "1.0".to_string(),
        auth: if inner.trusted { "trusted" } else { "untrusted" }.to_string(),
        ..Default::default()
    };
    sync_response(serde_json::to_value(info).unwrap(), None)
}

async fn add_certificate(State(state): Shared, Json(req): Json<CertificatesPost>) -> Response {
    let mut inner = state.lock();
    if inner.password.as_deref() != Some(req.password.as_str()) {
        return error_response(StatusCode::FORBIDDEN, "not authorized");
    }
    inner.trusted = true;
    sync_response(serde_json::Value::Null, None)
}

async fn create_network(State(state): Shared, Json(req): Json<NetworksPost>) -> Response {
    {
        let mut inner = state.lock();
        if !inner.networks_implemented {
            return error_response(StatusCode::NOT_IMPLEMENTED, "not implemented");
        }
        inner.network_creates_in_flight += 1;
        inner.max_network_creates_in_flight =
            inner.max_network_creates_in_flight.max(inner.network_creates_in_flight);
    }

    // Leave room for a concurrent create to overlap if the caller lets it
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut inner = state.lock();
    inner.network_creates_in_flight -= 1;
    if inner.networks.contains_key(&req.name) {
        return error_response(StatusCode::CONFLICT, "The network already exists");
    }

    let network_type = if req.network_type.is_empty() {
        "bridge".to_string()
    } else {
        req.network_type
    };
    inner.networks.insert(
        req.name.clone(),
        Network {
            name: req.name,
            description: req.put.description,
            network_type,
            managed: true,
            config: req.put.config,
            status: "Created".to_string(),
            ..Default::default()
        },
    );
    sync_response(serde_json::Value::Null, None)
}

async fn get_network(State(state): Shared, Path(name): Path<String>) -> Response {
    let inner = state.lock();
    if inner.fail_network_reads {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
    }
    match inner.networks.get(&name) {
        Some(net) => sync_response(
            serde_json::to_value(net).unwrap(),
            Some(etag_of(&net.config, &net.description)),
        ),
        None => error_response(StatusCode::NOT_FOUND, "Network not found"),
    }
}

async fn update_network(
    State(state): Shared,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(req): Json<NetworkPut>,
) -> Response {
    let mut inner = state.lock();
    let Some(net) = inner.networks.get_mut(&name) else {
        return error_response(StatusCode::NOT_FOUND, "Network not found");
    };
    if let Some(tag) = if_match(&headers) {
        if tag != etag_of(&net.config, &net.description) {
            return error_response(StatusCode::PRECONDITION_FAILED, "ETag doesn't match");
        }
    }
    net.config = req.config;
    net.description = req.description;
    sync_response(serde_json::Value::Null, None)
}

async fn delete_network(State(state): Shared, Path(name): Path<String>) -> Response {
    let mut inner = state.lock();
    if inner.async_deletes {
        if !inner.networks.contains_key(&name) {
            return error_response(StatusCode::NOT_FOUND, "Network not found");
        }
        if inner.operation_failure.is_none() {
            inner.networks.remove(&name);
        }
        return start_operation(&mut inner);
    }
    match inner.networks.remove(&name) {
        Some(_) => sync_response(serde_json::Value::Null, None),
        None => error_response(StatusCode::NOT_FOUND, "Network not found"),
    }
}

async fn wait_operation(State(state): Shared, Path(id): Path<String>) -> Response {
    let inner = state.lock();
    match inner.operations.get(&id) {
        Some((code, err)) => {
            let status = if err.is_empty() { "Success" } else { "Failure" };
            let op = serde_json::json!({
                "id": id,
                "status": status,
                "status_code": code,
                "err": err,
                "metadata": null,
            });
            sync_response(op, None)
        }
        None => error_response(StatusCode::NOT_FOUND, "Operation not found"),
    }
}

async fn create_pool(
    State(state): Shared,
    Query(query): Query<TargetQuery>,
    Json(req): Json<StoragePoolsPost>,
) -> Response {
    let mut inner = state.lock();

    if let Some(target) = query.target {
        let member = StoragePool {
            name: req.name.clone(),
            driver: req.driver.clone(),
            description: req.put.description.clone(),
            config: req.put.config,
            status: "Pending".to_string(),
            locations: vec![target.clone()],
            ..Default::default()
        };
        inner.member_pools.insert((req.name.clone(), target), member);
        inner.pools.entry(req.name.clone()).or_insert_with(|| StoragePool {
            name: req.name,
            driver: req.driver,
            status: "Pending".to_string(),
            ..Default::default()
        });
        return sync_response(serde_json::Value::Null, None);
    }

    match inner.pools.get_mut(&req.name) {
        Some(pool) if pool.status == "Pending" => {
            pool.status = "Created".to_string();
            pool.description = req.put.description;
            pool.config = req.put.config;
        }
        Some(_) => return error_response(StatusCode::CONFLICT, "Storage pool already exists"),
        None => {
            inner.pools.insert(
                req.name.clone(),
                StoragePool {
                    name: req.name,
                    driver: req.driver,
                    description: req.put.description,
                    config: req.put.config,
                    status: "Created".to_string(),
                    ..Default::default()
                },
            );
        }
    }
    sync_response(serde_json::Value::Null, None)
}

async fn get_pool(State(state): Shared, Path(name): Path<String>, Query(query): Query<TargetQuery>) -> Response {
    let inner = state.lock();
    let pool = query
        .target
        .and_then(|t| inner.member_pools.get(&(name.clone(), t)))
        .or_else(|| inner.pools.get(&name));
    match pool {
        Some(pool) => sync_response(
            serde_json::to_value(pool).unwrap(),
            Some(etag_of(&pool.config, &pool.description)),
        ),
        None => error_response(StatusCode::NOT_FOUND, "Storage pool not found"),
    }
}

async fn update_pool(
    State(state): Shared,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
    headers: HeaderMap,
    Json(req): Json<StoragePoolPut>,
) -> Response {
    let mut inner = state.lock();
    let pool = match query.target {
        Some(t) => inner.member_pools.get_mut(&(name.clone(), t)),
        None => inner.pools.get_mut(&name),
    };
    let Some(pool) = pool else {
        return error_response(StatusCode::NOT_FOUND, "Storage pool not found");
    };
    if let Some(tag) = if_match(&headers) {
        if tag != etag_of(&pool.config, &pool.description) {
            return error_response(StatusCode::PRECONDITION_FAILED, "ETag doesn't match");
        }
    }
    pool.config = req.config;
    pool.description = req.description;
    sync_response(serde_json::Value::Null, None)
}

async fn delete_pool(State(state): Shared, Path(name): Path<String>) -> Response {
    let mut inner = state.lock();
    if inner.pools.remove(&name).is_none() {
        return error_response(StatusCode::NOT_FOUND, "Storage pool not found");
    }
    inner.member_pools.retain(|(pool, _), _| pool != &name);
    sync_response(serde_json::Value::Null, None)
}

impl FakeLxd {
    /// Trusted server with network support
    pub async fn start() -> Self {
        Self::start_with(|inner| {
            inner.trusted = true;
            inner.networks_implemented = true;
        })
        .await
    }

    /// Server that answers network creation with "not implemented"
    pub async fn without_networks() -> Self {
        Self::start_with(|inner| inner.trusted = true).await
    }

    /// Server that only trusts clients presenting `password`
    pub async fn with_password(password: &str) -> Self {
        let password = password.to_string();
        Self::start_with(move |inner| {
            inner.password = Some(password);
            inner.networks_implemented = true;
        })
        .await
    }

    async fn start_with(setup: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = Inner::default();
        setup(&mut inner);
        let state = Arc::new(Mutex::new(inner));

        let app = Router::new()
            .route("/1.0", get(server_info))
            .route("/1.0/certificates", post(add_certificate))
            .route("/1.0/networks", post(create_network))
            .route(
                "/1.0/networks/:name",
                get(get_network).put(update_network).delete(delete_network),
            )
            .route("/1.0/operations/:id/wait", get(wait_operation))
            .route("/1.0/storage-pools", post(create_pool))
            .route(
                "/1.0/storage-pools/:name",
                get(get_pool).put(update_pool).delete(delete_pool),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn remote(&self) -> RemoteConfig {
        RemoteConfig {
            name: REMOTE.to_string(),
            address: self.addr.ip().to_string(),
            port: self.addr.port(),
            scheme: Scheme::Http,
            password: None,
            default: true,
        }
    }

    pub fn config(&self) -> ProviderConfig {
        ProviderConfig {
            remotes: vec![self.remote()],
            ..Default::default()
        }
    }

    pub fn context(&self) -> ProviderContext {
        ProviderContext::new(self.config())
    }

    pub fn provider(&self) -> LxdProvider {
        LxdProvider::with_config(self.config())
    }

    pub fn network(&self, name: &str) -> Option<Network> {
        self.state.lock().networks.get(name).cloned()
    }

    pub fn pool(&self, name: &str) -> Option<StoragePool> {
        self.state.lock().pools.get(name).cloned()
    }

    pub fn member_pool(&self, name: &str, target: &str) -> Option<StoragePool> {
        self.state
            .lock()
            .member_pools
            .get(&(name.to_string(), target.to_string()))
            .cloned()
    }

    /// Change a network behind the provider's back
    pub fn edit_network(&self, name: &str, description: &str) {
        if let Some(net) = self.state.lock().networks.get_mut(name) {
            net.description = description.to_string();
        }
    }

    pub fn remove_network(&self, name: &str) {
        self.state.lock().networks.remove(name);
    }

    /// Make every network read fail with a server error
    pub fn fail_network_reads(&self) {
        self.state.lock().fail_network_reads = true;
    }

    /// Answer network deletes with background operations that end in
    /// `failure` (`status_code`, `err`), or succeed when `None`
    pub fn use_async_deletes(&self, failure: Option<(u16, &str)>) {
        let mut inner = self.state.lock();
        inner.async_deletes = true;
        inner.operation_failure = failure.map(|(code, err)| (code, err.to_string()));
    }

    pub fn max_concurrent_network_creates(&self) -> usize {
        self.state.lock().max_network_creates_in_flight
    }
}

/// Config for a remote nothing listens on
pub fn unreachable_config() -> ProviderConfig {
    let mut remote = RemoteConfig::new(REMOTE, "127.0.0.1");
    remote.port = 1;
    remote.scheme = Scheme::Http;
    remote.default = true;
    ProviderConfig {
        remotes: vec![remote],
        request_timeout_secs: 2,
        ..Default::default()
    }
}
