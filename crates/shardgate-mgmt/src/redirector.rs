//! Cluster redirector: live peer registries and cluster-wide broadcast.
//!
//! Two registries track connected cluster members and alert subscribers.
//! A connection is removed automatically when it closes. Broadcasts to the
//! cluster are all-or-nothing; alert delivery is best-effort.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MgmtError, MgmtResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live connection from a peer, identified by the address it can be called back on.
#[derive(Debug)]
pub struct PeerConnection {
    id: u64,
    address: String,
    closed: CancellationToken,
}

impl PeerConnection {
    pub fn new(address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            address: address.into(),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fires the close event; registries drop the connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Set of live connections keyed by connection id.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    name: &'static str,
    members: Arc<Mutex<BTreeMap<u64, Arc<PeerConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            members: Arc::default(),
        }
    }

    fn members(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<PeerConnection>>> {
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds `conn` unless already present and removes it once it closes.
    ///
    /// Returns whether the connection was newly added. Must be called
    /// within a tokio runtime.
    pub fn register(&self, conn: Arc<PeerConnection>) -> bool {
        if conn.is_closed() {
            return false;
        }
        {
            let mut members = self.members();
            if members.contains_key(&conn.id) {
                return false;
            }
            members.insert(conn.id, conn.clone());
        }
        info!(registry = self.name, address = %conn.address, id = conn.id, "registered connection");

        let registry = self.clone();
        tokio::spawn(async move {
            conn.closed.cancelled().await;
            registry.members().remove(&conn.id);
            debug!(registry = registry.name, address = %conn.address, id = conn.id, "connection closed");
        });
        true
    }

    /// Distinct addresses of live connections, in registration order.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::new();
        for conn in self.members().values() {
            if !addresses.contains(&conn.address) {
                addresses.push(conn.address.clone());
            }
        }
        addresses
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and drops every connection.
    pub fn clear(&self) {
        let drained: Vec<Arc<PeerConnection>> = std::mem::take(&mut *self.members()).into_values().collect();
        for conn in drained {
            conn.close();
        }
    }
}

/// Outbound calls to cluster members and alert subscribers.
#[async_trait]
pub trait ClusterRpc: Send + Sync {
    /// Invokes `method` at `address` with `params`, forwarding `auth` unchanged.
    async fn call(&self, address: &str, method: &str, params: &Value, auth: Option<&str>) -> MgmtResult<Value>;

    async fn alert(&self, address: &str, params: &Value, auth: Option<&str>) -> MgmtResult<()>;
}

/// Posts to `{address}/api/v1/rpc/{method}`.
pub struct HttpClusterRpc {
    client: Client,
}

impl HttpClusterRpc {
    pub fn new(timeout: Duration) -> MgmtResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MgmtError::Config(format!("failed to build rpc client: {}", e)))?;
        Ok(Self { client })
    }

    async fn post(&self, address: &str, method: &str, params: &Value, auth: Option<&str>) -> MgmtResult<reqwest::Response> {
        let url = format!("{}/api/v1/rpc/{}", address.trim_end_matches('/'), method);
        let mut request = self.client.post(&url).json(params);
        if let Some(token) = auth {
            request = request.bearer_auth(token);
        }
        let rpc_err = |message: String| MgmtError::Rpc {
            address: address.to_string(),
            message,
        };
        let response = request.send().await.map_err(|e| rpc_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(rpc_err(format!("{} returned {}", method, response.status())));
        }
        Ok(response)
    }
}

#[async_trait]
impl ClusterRpc for HttpClusterRpc {
    async fn call(&self, address: &str, method: &str, params: &Value, auth: Option<&str>) -> MgmtResult<Value> {
        let response = self.post(address, method, params, auth).await?;
        response.json().await.map_err(|e| MgmtError::Rpc {
            address: address.to_string(),
            message: format!("bad reply to {}: {}", method, e),
        })
    }

    async fn alert(&self, address: &str, params: &Value, auth: Option<&str>) -> MgmtResult<()> {
        self.post(address, "alert", params, auth).await?;
        Ok(())
    }
}

/// Owns the cluster and alert registries of this process.
pub struct Redirector {
    self_address: String,
    cluster: ConnectionRegistry,
    alerts: ConnectionRegistry,
    rpc: Arc<dyn ClusterRpc>,
}

impl Redirector {
    pub fn new(self_address: impl Into<String>, rpc: Arc<dyn ClusterRpc>) -> Self {
        Self {
            self_address: self_address.into(),
            cluster: ConnectionRegistry::new("cluster"),
            alerts: ConnectionRegistry::new("alerts"),
            rpc,
        }
    }

    pub fn register_to_cluster(&self, conn: Arc<PeerConnection>) -> bool {
        self.cluster.register(conn)
    }

    pub fn register_for_alerts(&self, conn: Arc<PeerConnection>) -> bool {
        self.alerts.register(conn)
    }

    pub fn cluster(&self) -> &ConnectionRegistry {
        &self.cluster
    }

    pub fn alerts(&self) -> &ConnectionRegistry {
        &self.alerts
    }

    /// This member first, then every registered cluster member, deduplicated.
    pub fn cluster_addresses(&self) -> Vec<String> {
        let mut addresses = vec![self.self_address.clone()];
        for address in self.cluster.addresses() {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        addresses
    }

    /// Calls `method` on every cluster member; fails if any member fails.
    ///
    /// Returns the per-member replies in address order.
    pub async fn publish_to_cluster(&self, method: &str, params: &Value, auth: Option<&str>) -> MgmtResult<Vec<Value>> {
        let addresses = self.cluster_addresses();
        info!(method, targets = addresses.len(), "publishing to cluster");
        try_join_all(
            addresses
                .iter()
                .map(|address| self.rpc.call(address, method, params, auth)),
        )
        .await
    }

    /// Delivers an alert to every subscriber. Failures are logged, never returned.
    pub async fn publish_alerts(&self, params: &Value, auth: Option<&str>) {
        let addresses = self.alerts.addresses();
        debug!(targets = addresses.len(), "publishing alerts");
        let results = join_all(
            addresses
                .iter()
                .map(|address| self.rpc.alert(address, params, auth)),
        )
        .await;
        for (address, result) in addresses.iter().zip(results) {
            if let Err(e) = result {
                warn!(%address, error = %e, "alert delivery failed");
            }
        }
    }

    /// Drops all connections.
    pub fn shutdown(&self) {
        self.cluster.clear();
        self.alerts.clear();
    }
}
