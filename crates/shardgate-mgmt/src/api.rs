use crate::auth::{Caller, Role, TokenIssuer};
use crate::config::MgmtConfig;
use crate::error::{MgmtError, MgmtResult};
use crate::nodes::{
    ConnectVendorRequest, CreateNodeReply, CreateNodeRequest, GroupBy, HeartbeatRequest, NodeInfo, NodeQuery,
    NodeRegistry, UpdateNodeRequest,
};
use crate::redirector::{HttpClusterRpc, PeerConnection, Redirector};
use crate::security::AuthRateLimiter;
use crate::store::{MemoryStore, NodeStore, TierRecord};
use crate::vendor::{HttpAgentConnector, VendorInfo};
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shardgate_storage::{ChunkInfo, ChunkRecord, ObjectId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Bearer token of the current request, forwarded unchanged on broadcast.
#[derive(Debug, Clone, Default)]
pub struct AuthToken(pub Option<String>);

#[derive(Debug, Deserialize)]
struct NodeNames {
    nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupRequest {
    #[serde(default)]
    group_by: GroupBy,
}

#[derive(Debug, Deserialize)]
struct NamedNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamedUpdate {
    name: String,
    #[serde(flatten)]
    update: UpdateNodeRequest,
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct AlertRequest {
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct PeerQuery {
    address: String,
}

#[derive(Clone, Copy)]
enum PeerKind {
    Cluster,
    Alerts,
}

pub struct AdminApi {
    config: Arc<MgmtConfig>,
    registry: Arc<NodeRegistry>,
    redirector: Arc<Redirector>,
    issuer: Option<TokenIssuer>,
    rate_limiter: Arc<AuthRateLimiter>,
}

impl AdminApi {
    pub fn new(config: Arc<MgmtConfig>, registry: Arc<NodeRegistry>, redirector: Arc<Redirector>) -> Self {
        let issuer = config.auth_secret.as_deref().map(TokenIssuer::new);
        if issuer.is_none() {
            tracing::warn!(
                system = %config.default_system,
                "[SECURITY WARNING] admin API is running without authentication, set auth_secret in config"
            );
        }
        Self {
            config,
            registry,
            redirector,
            issuer,
            rate_limiter: Arc::new(AuthRateLimiter::new()),
        }
    }

    /// Wires the in-memory store, HTTP agent dispatch and HTTP cluster RPC.
    pub async fn from_config(config: MgmtConfig) -> MgmtResult<Self> {
        let store = Arc::new(MemoryStore::new());
        for tier in &config.tiers {
            store
                .insert_tier(TierRecord {
                    id: ObjectId::new(),
                    system: config.default_system.clone(),
                    name: tier.clone(),
                })
                .await?;
        }
        let connector = Arc::new(HttpAgentConnector::new(config.rpc_timeout())?);
        let registry = Arc::new(NodeRegistry::new(&config, store, connector));
        let rpc = Arc::new(HttpClusterRpc::new(config.rpc_timeout())?);
        let redirector = Arc::new(Redirector::new(config.advertise_addr.clone(), rpc));
        Ok(Self::new(Arc::new(config), registry, redirector))
    }

    pub fn router(self: Arc<Self>) -> Router {
        let protected = Router::new()
            .route("/api/v1/nodes", get(list_nodes_handler).post(create_node_handler))
            .route("/api/v1/nodes/group", post(group_nodes_handler))
            .route("/api/v1/nodes/start", post(start_nodes_handler))
            .route("/api/v1/nodes/stop", post(stop_nodes_handler))
            .route("/api/v1/nodes/status", post(agents_status_handler))
            .route(
                "/api/v1/nodes/:name",
                get(read_node_handler)
                    .patch(update_node_handler)
                    .delete(delete_node_handler),
            )
            .route("/api/v1/nodes/:name/heartbeat", post(heartbeat_handler))
            .route("/api/v1/vendors", post(connect_vendor_handler))
            .route("/api/v1/chunks", post(record_chunk_handler))
            .route("/api/v1/redirector/cluster", get(cluster_socket_handler))
            .route("/api/v1/redirector/alerts", get(alerts_socket_handler))
            .route("/api/v1/redirector/publish_to_cluster", post(publish_to_cluster_handler))
            .route("/api/v1/redirector/publish_alerts", post(publish_alerts_handler))
            .route("/api/v1/rpc/:method", post(rpc_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.clone(),
                auth_middleware,
            ));

        let public = Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler));

        Router::new()
            .merge(protected)
            .merge(public)
            .layer(axum::middleware::from_fn(
                crate::security::security_headers_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr;
        let redirector = self.redirector.clone();
        let limiter = self.rate_limiter.clone();
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Admin API listening on {}", addr);

        let pruner = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                limiter.prune();
            }
        });

        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for shutdown signal: {}", e);
                }
            })
            .await?;

        pruner.abort();
        redirector.shutdown();
        tracing::info!("Admin API stopped");
        Ok(())
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> MgmtResult<T> {
    serde_json::from_value(params).map_err(|e| MgmtError::InvalidQuery(format!("bad params: {}", e)))
}

fn to_json<T: Serialize>(value: T) -> MgmtResult<Value> {
    serde_json::to_value(value).map_err(|e| MgmtError::Internal(e.to_string()))
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The connecting peer, or the client it forwards for when the peer is a
/// trusted proxy.
fn client_ip(config: &MgmtConfig, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let peer = peer?.ip();
    if config.is_trusted_proxy(peer) {
        if let Some(forwarded) = forwarded_ip(headers) {
            return Some(forwarded);
        }
    }
    Some(peer.to_string())
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_node_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateNodeRequest>,
) -> MgmtResult<Json<CreateNodeReply>> {
    Ok(Json(state.registry.create(&caller, req).await?))
}

async fn list_nodes_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<NodeQuery>,
) -> MgmtResult<Json<Value>> {
    let nodes = state.registry.list(&caller, &query).await?;
    Ok(Json(json!({ "nodes": to_json(nodes)? })))
}

async fn read_node_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Path(name): Path<String>,
) -> MgmtResult<Json<NodeInfo>> {
    Ok(Json(state.registry.read(&caller, &name).await?))
}

async fn update_node_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Path(name): Path<String>,
    Json(req): Json<UpdateNodeRequest>,
) -> MgmtResult<Json<Value>> {
    state.registry.update(&caller, &name, req).await?;
    Ok(Json(json!({})))
}

async fn delete_node_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Path(name): Path<String>,
) -> MgmtResult<Json<Value>> {
    state.registry.delete(&caller, &name).await?;
    Ok(Json(json!({})))
}

async fn group_nodes_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<GroupRequest>,
) -> MgmtResult<Json<Value>> {
    let groups = state.registry.group(&caller, req.group_by).await?;
    Ok(Json(json!({ "groups": to_json(groups)? })))
}

async fn start_nodes_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<NodeNames>,
) -> MgmtResult<Json<Value>> {
    let outcomes = state.registry.start_nodes(&caller, &req.nodes).await?;
    Ok(Json(json!({ "nodes": to_json(outcomes)? })))
}

async fn stop_nodes_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<NodeNames>,
) -> MgmtResult<Json<Value>> {
    let outcomes = state.registry.stop_nodes(&caller, &req.nodes).await?;
    Ok(Json(json!({ "nodes": to_json(outcomes)? })))
}

async fn agents_status_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<NodeNames>,
) -> MgmtResult<Json<Value>> {
    let status = state.registry.get_agents_status(&caller, &req.nodes).await?;
    Ok(Json(json!({ "nodes": to_json(status)? })))
}

async fn heartbeat_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Path(name): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> MgmtResult<Json<NodeInfo>> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let remote_ip = client_ip(&state.config, &headers, peer);
    Ok(Json(state.registry.heartbeat(&caller, &name, req, remote_ip).await?))
}

async fn connect_vendor_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ConnectVendorRequest>,
) -> MgmtResult<Json<VendorInfo>> {
    Ok(Json(state.registry.connect_node_vendor(&caller, req).await?))
}

async fn record_chunk_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Json(record): Json<ChunkRecord>,
) -> MgmtResult<Json<ChunkInfo>> {
    Ok(Json(state.registry.record_chunk(&caller, record).await?))
}

async fn cluster_socket_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Query(peer): Query<PeerQuery>,
    ws: WebSocketUpgrade,
) -> MgmtResult<Response> {
    caller.require(&[Role::Admin])?;
    Ok(ws.on_upgrade(move |socket| serve_peer(socket, state, peer.address, PeerKind::Cluster)))
}

async fn alerts_socket_handler(
    State(state): State<Arc<AdminApi>>,
    Query(peer): Query<PeerQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_peer(socket, state, peer.address, PeerKind::Alerts))
}

/// Holds the peer registered for as long as its socket stays open.
async fn serve_peer(mut socket: WebSocket, state: Arc<AdminApi>, address: String, kind: PeerKind) {
    let conn = PeerConnection::new(address);
    match kind {
        PeerKind::Cluster => state.redirector.register_to_cluster(conn.clone()),
        PeerKind::Alerts => state.redirector.register_for_alerts(conn.clone()),
    };
    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    conn.close();
}

async fn publish_to_cluster_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Extension(token): Extension<AuthToken>,
    Json(req): Json<PublishRequest>,
) -> MgmtResult<Json<Value>> {
    caller.require(&[Role::Admin])?;
    let aggregated = state
        .redirector
        .publish_to_cluster(&req.method, &req.params, token.0.as_deref())
        .await?;
    Ok(Json(json!({ "redirect_reply": { "aggregated": aggregated } })))
}

async fn publish_alerts_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Extension(token): Extension<AuthToken>,
    Json(req): Json<AlertRequest>,
) -> MgmtResult<Json<Value>> {
    caller.require(&[Role::Admin])?;
    state.redirector.publish_alerts(&req.params, token.0.as_deref()).await;
    Ok(Json(json!({})))
}

/// Receiving end of cluster broadcasts.
async fn rpc_handler(
    State(state): State<Arc<AdminApi>>,
    Extension(caller): Extension<Caller>,
    Path(method): Path<String>,
    Json(params): Json<Value>,
) -> MgmtResult<Json<Value>> {
    let registry = &state.registry;
    let reply = match method.as_str() {
        "create_node" => to_json(registry.create(&caller, parse(params)?).await?)?,
        "update_node" => {
            let req: NamedUpdate = parse(params)?;
            registry.update(&caller, &req.name, req.update).await?;
            json!({})
        }
        "delete_node" => {
            let req: NamedNode = parse(params)?;
            registry.delete(&caller, &req.name).await?;
            json!({})
        }
        "start_nodes" => {
            let req: NodeNames = parse(params)?;
            json!({ "nodes": to_json(registry.start_nodes(&caller, &req.nodes).await?)? })
        }
        "stop_nodes" => {
            let req: NodeNames = parse(params)?;
            json!({ "nodes": to_json(registry.stop_nodes(&caller, &req.nodes).await?)? })
        }
        "connect_node_vendor" => to_json(registry.connect_node_vendor(&caller, parse(params)?).await?)?,
        "record_chunk" => to_json(registry.record_chunk(&caller, parse(params)?).await?)?,
        "alert" => {
            tracing::info!(target: "alerts", system = %caller.system, %params, "received alert");
            json!({})
        }
        other => return Err(MgmtError::not_found("rpc method", other)),
    };
    Ok(Json(reply))
}

async fn auth_middleware(
    State(state): State<Arc<AdminApi>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&state.config, request.headers(), peer).unwrap_or_else(|| "unknown".to_string());

    if state.rate_limiter.is_rate_limited(&ip) {
        return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    }

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(issuer) = state.issuer.as_ref() else {
        request
            .extensions_mut()
            .insert(Caller::admin(state.config.default_system.clone()));
        request.extensions_mut().insert(AuthToken(bearer));
        return next.run(request).await;
    };

    match bearer.as_deref().map(|token| issuer.verify(token)) {
        Some(Ok(caller)) => {
            request.extensions_mut().insert(caller);
            request.extensions_mut().insert(AuthToken(bearer));
            next.run(request).await
        }
        failed => {
            if let Some(Err(e)) = failed {
                tracing::debug!(%ip, error = %e, "rejected bearer token");
            }
            state.rate_limiter.record_failure(&ip);
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, r#"Bearer realm="shardgate-mgmt""#)],
                "Unauthorized",
            )
                .into_response()
        }
    }
}
