//! Node registry and capacity accounting.
//!
//! All operations are scoped to the caller's system and ignore soft-deleted
//! nodes. Lifecycle dispatch to agent hosts is best-effort: every target is
//! attempted under a bounded-concurrency limiter and each outcome is reported
//! on its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shardgate_storage::{ChunkDb, ChunkInfo, ChunkRecord, Identified, ObjectId};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::auth::{Caller, Role, TokenIssuer};
use crate::config::MgmtConfig;
use crate::error::{MgmtError, MgmtResult};
use crate::store::{NodeRecord, NodeStorage, NodeStore, NodeUpdate, TierRecord, VendorRecord};
use crate::vendor::{AgentConnector, VendorInfo, VendorKind};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    /// Tier name within the caller's system, or a tier id.
    pub tier: String,
    #[serde(default)]
    pub geolocation: Option<String>,
    #[serde(default)]
    pub storage_alloc: u64,
    #[serde(default)]
    pub is_server: bool,
    /// Name of the vendor hosting the node's agent.
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub vendor_node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeReply {
    /// Agent token, issued only to `create_node` callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateNodeRequest {
    #[serde(default)]
    pub is_server: Option<bool>,
    #[serde(default)]
    pub geolocation: Option<String>,
    #[serde(default)]
    pub storage_alloc: Option<u64>,
    /// Always rejected.
    #[serde(default)]
    pub tier: Option<String>,
}

/// List filter. `name` and `geolocation` are regular expressions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub geolocation: Option<String>,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct GroupBy {
    #[serde(default)]
    pub tier: bool,
    #[serde(default)]
    pub geolocation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub count: u64,
    pub storage: NodeStorage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub geolocation: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub device_info: Option<serde_json::Value>,
    #[serde(default)]
    pub storage_alloc: Option<u64>,
    #[serde(default)]
    pub storage_used: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectVendorRequest {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Read-facing node shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub geolocation: Option<String>,
    pub ip: String,
    pub port: u16,
    pub heartbeat: String,
    pub storage: NodeStorage,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_node_id: Option<String>,
    pub device_info: serde_json::Value,
}

/// Result of one start/stop dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub name: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub status: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentAction {
    Start,
    Stop,
    Status,
}

pub struct NodeRegistry {
    store: Arc<dyn NodeStore>,
    connector: Arc<dyn AgentConnector>,
    issuer: Option<TokenIssuer>,
    agent_concurrency: usize,
    online_threshold: chrono::Duration,
}

impl NodeRegistry {
    pub fn new(config: &MgmtConfig, store: Arc<dyn NodeStore>, connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            store,
            connector,
            issuer: config.auth_secret.as_deref().map(TokenIssuer::new),
            agent_concurrency: config.agent_concurrency.max(1),
            online_threshold: config.online_threshold(),
        }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn node_info(&self, node: &NodeRecord) -> NodeInfo {
        let online = Utc::now()
            .checked_sub_signed(self.online_threshold)
            .map_or(true, |min_heartbeat| node.heartbeat >= min_heartbeat);
        NodeInfo {
            name: node.name.clone(),
            geolocation: node.geolocation.clone(),
            ip: node.ip.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
            port: node.port.unwrap_or(0),
            heartbeat: node.heartbeat.to_rfc3339(),
            storage: node.storage,
            online,
            vendor: node.vendor.map(|v| v.to_hex()),
            vendor_node_id: node.vendor_node_id.clone(),
            device_info: node
                .device_info
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        }
    }

    async fn find_live(&self, system: &str, name: &str) -> MgmtResult<NodeRecord> {
        self.store
            .find_node(system, name)
            .await?
            .ok_or_else(|| MgmtError::not_found("node", name))
    }

    /// Live nodes matching `names`, in request order; unknown names are skipped.
    async fn find_named(&self, system: &str, names: &[String]) -> MgmtResult<Vec<NodeRecord>> {
        let all = self.store.list_nodes(system).await?;
        let mut found: Vec<NodeRecord> = Vec::with_capacity(names.len());
        for name in names {
            if found.iter().any(|n| &n.name == name) {
                continue;
            }
            match all.iter().find(|n| &n.name == name) {
                Some(node) => found.push(node.clone()),
                None => debug!(node = %name, "skipping unknown node"),
            }
        }
        Ok(found)
    }

    pub async fn create(&self, caller: &Caller, req: CreateNodeRequest) -> MgmtResult<CreateNodeReply> {
        caller.require(&[Role::Admin, Role::CreateNode])?;
        let system = caller.system.as_str();

        let tier = self.resolve_tier(system, &req.tier).await?;

        let vendor = match &req.vendor {
            Some(name) => Some(
                self.store
                    .find_vendor(system, name)
                    .await?
                    .ok_or_else(|| MgmtError::not_found("vendor", name))?
                    .id,
            ),
            None => None,
        };

        let node = NodeRecord {
            id: ObjectId::new(),
            system: system.to_string(),
            name: req.name,
            tier: tier.id,
            is_server: req.is_server,
            geolocation: req.geolocation,
            ip: None,
            port: None,
            heartbeat: Utc::now(),
            storage: NodeStorage {
                alloc: req.storage_alloc,
                used: 0,
            },
            vendor,
            vendor_node_id: req.vendor_node_id,
            device_info: None,
            started: false,
            deleted: None,
        };
        let node_id = node.id;
        let node_name = node.name.clone();
        self.store.insert_node(node).await?;
        info!(node = %node_name, id = %node_id, tier = %tier.name, system, "created node");

        let token = if caller.role == Role::CreateNode {
            let issuer = self
                .issuer
                .as_ref()
                .ok_or_else(|| MgmtError::Config("no auth_secret to issue agent tokens".into()))?;
            Some(issuer.issue_agent_token(system, node_id)?)
        } else {
            None
        };
        Ok(CreateNodeReply { token })
    }

    /// Looks `tier` up by name within `system`, then by id. An id that
    /// belongs to another system is a `SystemMismatch`.
    async fn resolve_tier(&self, system: &str, tier: &str) -> MgmtResult<TierRecord> {
        if let Some(found) = self.store.find_tier(system, tier).await? {
            return Ok(found);
        }
        let by_id = match tier.parse::<ObjectId>() {
            Ok(id) => self.store.get_tier(id).await?,
            Err(_) => None,
        };
        let found = by_id.ok_or_else(|| MgmtError::not_found("tier", tier))?;
        if found.system != system {
            error!(tier = %found.name, owner = %found.system, system, "tier system mismatch");
            return Err(MgmtError::SystemMismatch {
                kind: "tier",
                name: tier.to_string(),
                owner: found.system,
                system: system.to_string(),
            });
        }
        Ok(found)
    }

    pub async fn read(&self, caller: &Caller, name: &str) -> MgmtResult<NodeInfo> {
        caller.require(&[Role::Admin])?;
        let node = self.find_live(&caller.system, name).await?;
        Ok(self.node_info(&node))
    }

    pub async fn list(&self, caller: &Caller, query: &NodeQuery) -> MgmtResult<Vec<NodeInfo>> {
        caller.require(&[Role::Admin])?;
        let system = caller.system.as_str();

        let compile = |pattern: &Option<String>| -> MgmtResult<Option<Regex>> {
            pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| MgmtError::InvalidQuery(e.to_string()))
        };
        let name_re = compile(&query.name)?;
        let geo_re = compile(&query.geolocation)?;

        let tier = match &query.tier {
            Some(name) => match self.store.find_tier(system, name).await? {
                Some(tier) => Some(tier.id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let nodes = self.store.list_nodes(system).await?;
        Ok(nodes
            .iter()
            .filter(|n| name_re.as_ref().map_or(true, |re| re.is_match(&n.name)))
            .filter(|n| tier.map_or(true, |t| n.tier == t))
            .filter(|n| {
                geo_re.as_ref().map_or(true, |re| {
                    n.geolocation.as_deref().map_or(false, |g| re.is_match(g))
                })
            })
            .skip(query.skip.unwrap_or(0))
            .take(query.limit.filter(|l| *l > 0).unwrap_or(usize::MAX))
            .map(|n| self.node_info(n))
            .collect())
    }

    pub async fn update(&self, caller: &Caller, name: &str, req: UpdateNodeRequest) -> MgmtResult<()> {
        caller.require(&[Role::Admin])?;
        if let Some(tier) = req.tier {
            return Err(MgmtError::UnsupportedMutation(format!(
                "moving node {} to tier {} requires decommission",
                name, tier
            )));
        }
        let node = self.find_live(&caller.system, name).await?;
        self.store
            .update_node(
                &caller.system,
                node.id,
                NodeUpdate {
                    is_server: req.is_server,
                    geolocation: req.geolocation,
                    storage_alloc: req.storage_alloc,
                    ..NodeUpdate::default()
                },
            )
            .await?;
        info!(node = %name, "updated node");
        Ok(())
    }

    /// Soft delete. Rebuild of the node's blocks is left to whoever watches deletions.
    pub async fn delete(&self, caller: &Caller, name: &str) -> MgmtResult<()> {
        caller.require(&[Role::Admin])?;
        let node = self.find_live(&caller.system, name).await?;
        self.store
            .update_node(
                &caller.system,
                node.id,
                NodeUpdate {
                    deleted: Some(Utc::now()),
                    ..NodeUpdate::default()
                },
            )
            .await?;
        info!(node = %name, id = %node.id, "deleted node");
        Ok(())
    }

    /// Node count and storage totals per distinct (tier, geolocation) key.
    pub async fn group(&self, caller: &Caller, group_by: GroupBy) -> MgmtResult<Vec<NodeGroup>> {
        caller.require(&[Role::Admin])?;
        let nodes = self.store.list_nodes(&caller.system).await?;

        let mut groups: BTreeMap<(Option<ObjectId>, Option<String>), (u64, NodeStorage)> = BTreeMap::new();
        for node in &nodes {
            let key = (
                group_by.tier.then_some(node.tier),
                if group_by.geolocation {
                    node.geolocation.clone()
                } else {
                    None
                },
            );
            let (count, storage) = groups.entry(key).or_default();
            *count += 1;
            storage.alloc = storage.alloc.saturating_add(node.storage.alloc);
            storage.used = storage.used.saturating_add(node.storage.used);
        }

        Ok(groups
            .into_iter()
            .map(|((tier, geolocation), (count, storage))| NodeGroup {
                count,
                storage,
                tier: tier.map(|t| t.to_hex()),
                geolocation,
            })
            .collect())
    }

    /// Refreshes address and liveness, and recomputes used storage from blocks.
    ///
    /// The agent's reported usage is only compared and its reported
    /// allocation is never applied; server-side values are authoritative.
    pub async fn heartbeat(
        &self,
        caller: &Caller,
        name: &str,
        req: HeartbeatRequest,
        remote_ip: Option<String>,
    ) -> MgmtResult<NodeInfo> {
        caller.require(&[Role::Admin, Role::Agent])?;
        let node = self.find_live(&caller.system, name).await?;
        if let (Role::Agent, Some(agent_node)) = (caller.role, caller.node_id) {
            if agent_node != node.id {
                return Err(MgmtError::Unauthorized(format!(
                    "agent token is not valid for node {}",
                    name
                )));
            }
        }

        let used = self.store.sum_block_sizes(node.id).await?;
        let ip = req
            .ip
            .filter(|ip| !ip.is_empty() && ip != "0.0.0.0")
            .or(remote_ip);

        let mut update = NodeUpdate {
            heartbeat: Some(Utc::now()),
            geolocation: req.geolocation.clone(),
            ip: ip.clone(),
            port: req.port,
            device_info: req.device_info,
            ..NodeUpdate::default()
        };

        if node.storage.used != used {
            debug!(node = %name, from = node.storage.used, to = used, "recomputed used storage");
            update.storage_used = Some(used);
        }
        if let Some(reported) = req.storage_used {
            if reported != used {
                warn!(target: "audit", node = %name, reported, actual = used, "agent used storage not in sync");
            }
        }
        if let Some(alloc) = req.storage_alloc {
            if alloc != node.storage.alloc {
                info!(target: "audit", node = %name, from = node.storage.alloc, to = alloc, "ignoring agent allocation change");
            }
        }
        if req.geolocation.is_some() && req.geolocation != node.geolocation {
            info!(target: "audit", node = %name, from = ?node.geolocation, to = ?req.geolocation, "geolocation changed");
        }
        let new_ip = ip.as_ref().or(node.ip.as_ref());
        let new_port = req.port.or(node.port);
        if new_ip != node.ip.as_ref() || new_port != node.port {
            info!(
                target: "audit",
                node = %name,
                from = %format!("{}:{}", node.ip.as_deref().unwrap_or("-"), node.port.unwrap_or(0)),
                to = %format!("{}:{}", new_ip.map(String::as_str).unwrap_or("-"), new_port.unwrap_or(0)),
                "address changed"
            );
        }

        let updated = self.store.update_node(&caller.system, node.id, update).await?;
        Ok(self.node_info(&updated))
    }

    pub async fn start_nodes(&self, caller: &Caller, names: &[String]) -> MgmtResult<Vec<AgentOutcome>> {
        self.set_started(caller, names, true).await
    }

    pub async fn stop_nodes(&self, caller: &Caller, names: &[String]) -> MgmtResult<Vec<AgentOutcome>> {
        self.set_started(caller, names, false).await
    }

    /// Flips `started` on nodes not already in the target state and
    /// dispatches the matching agent call to those nodes only.
    ///
    /// A node whose flag update fails is reported as a failed outcome and is
    /// not dispatched; the other nodes proceed.
    async fn set_started(&self, caller: &Caller, names: &[String], started: bool) -> MgmtResult<Vec<AgentOutcome>> {
        caller.require(&[Role::Admin])?;
        let changed: Vec<NodeRecord> = self
            .find_named(&caller.system, names)
            .await?
            .into_iter()
            .filter(|n| n.started != started)
            .collect();

        let limiter = Arc::new(Semaphore::new(self.agent_concurrency));
        let updates = join_all(changed.into_iter().map(|node| {
            let limiter = limiter.clone();
            async move {
                let result = match limiter.acquire().await {
                    Ok(_permit) => {
                        self.store
                            .update_node(
                                &caller.system,
                                node.id,
                                NodeUpdate {
                                    started: Some(started),
                                    ..NodeUpdate::default()
                                },
                            )
                            .await
                    }
                    Err(_) => Err(MgmtError::Config("update limiter closed".into())),
                };
                (node, result)
            }
        }))
        .await;

        let mut outcomes = Vec::new();
        let mut flipped = Vec::new();
        for (node, result) in updates {
            match result {
                Ok(updated) => flipped.push(updated),
                Err(e) => {
                    warn!(node = %node.name, started, error = %e, "failed to update started state");
                    outcomes.push(AgentOutcome {
                        name: node.name,
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        info!(
            started,
            changed = flipped.len(),
            failed = outcomes.len(),
            requested = names.len(),
            "updated node started state"
        );

        let action = if started { AgentAction::Start } else { AgentAction::Stop };
        outcomes.extend(
            self.dispatch(&flipped, action)
                .await
                .into_iter()
                .map(|(name, result)| AgentOutcome {
                    name,
                    ok: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }),
        );
        Ok(outcomes)
    }

    /// Asks every named node's agent for its status; unreachable or unconfigured agents report `false`.
    pub async fn get_agents_status(&self, caller: &Caller, names: &[String]) -> MgmtResult<Vec<AgentStatus>> {
        let nodes = self.find_named(&caller.system, names).await?;
        Ok(self
            .dispatch(&nodes, AgentAction::Status)
            .await
            .into_iter()
            .map(|(name, result)| AgentStatus {
                name,
                status: matches!(result, Ok(true)),
            })
            .collect())
    }

    /// Persists the placed blocks of an allocated chunk so that heartbeats
    /// count them towards each node's used storage.
    ///
    /// Every fragment must carry a role index and every placed block must sit
    /// on a live node of the caller's system; otherwise nothing is stored.
    /// Blocks still waiting for a node are not stored.
    pub async fn record_chunk(&self, caller: &Caller, record: ChunkRecord) -> MgmtResult<ChunkInfo> {
        caller.require(&[Role::Admin])?;
        let chunk = ChunkDb::new(record)?;
        for frag in chunk.frags() {
            frag.role()?;
        }

        let mut placed = Vec::new();
        for block in chunk.blocks() {
            let Some(node_id) = block.node_id() else {
                continue;
            };
            if self.store.get_node(&caller.system, node_id).await?.is_none() {
                return Err(MgmtError::not_found("node", node_id.to_string()));
            }
            placed.push(block.to_record());
        }

        let stored = placed.len();
        let bytes = placed.iter().fold(0u64, |acc, b| acc.saturating_add(b.size));
        self.store.insert_blocks(placed).await?;
        info!(chunk = %chunk.id(), blocks = stored, bytes, system = %caller.system, "recorded chunk blocks");
        Ok(chunk.to_info(None))
    }

    /// Finds or creates the vendor, then restarts every node it hosts.
    pub async fn connect_node_vendor(&self, caller: &Caller, req: ConnectVendorRequest) -> MgmtResult<VendorInfo> {
        caller.require(&[Role::Admin])?;
        let system = caller.system.as_str();

        let vendor = match self.store.find_vendor(system, &req.name).await? {
            Some(vendor) => vendor,
            None => {
                let vendor = VendorRecord {
                    id: ObjectId::new(),
                    system: system.to_string(),
                    name: req.name.clone(),
                    category: req.category,
                    kind: req.kind,
                    details: req.details,
                };
                match self.store.insert_vendor(vendor.clone()).await {
                    Ok(()) => {
                        info!(vendor = %vendor.name, kind = %vendor.kind, "registered vendor");
                        vendor
                    }
                    // lost a race with a concurrent registration
                    Err(MgmtError::AlreadyExists { .. }) => self
                        .store
                        .find_vendor(system, &req.name)
                        .await?
                        .ok_or_else(|| MgmtError::not_found("vendor", &req.name))?,
                    Err(e) => return Err(e),
                }
            }
        };

        let hosted = self.store.nodes_by_vendor(system, vendor.id).await?;
        let outcomes = self.dispatch(&hosted, AgentAction::Start).await;
        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        info!(vendor = %vendor.name, nodes = hosted.len(), failed, "restarted vendor nodes");

        Ok(VendorInfo::from(&vendor))
    }

    /// Runs `action` against each node's agent host, at most
    /// `agent_concurrency` at a time, and collects every outcome.
    async fn dispatch(&self, nodes: &[NodeRecord], action: AgentAction) -> Vec<(String, MgmtResult<bool>)> {
        let limiter = Arc::new(Semaphore::new(self.agent_concurrency));
        join_all(nodes.iter().map(|node| {
            let limiter = limiter.clone();
            async move {
                let result = match limiter.acquire().await {
                    Ok(_permit) => self.agent_call(node, action).await,
                    Err(_) => Err(MgmtError::Agent("dispatch limiter closed".into())),
                };
                if let Err(e) = &result {
                    warn!(node = %node.name, ?action, error = %e, "agent call failed");
                }
                (node.name.clone(), result)
            }
        }))
        .await
    }

    async fn agent_call(&self, node: &NodeRecord, action: AgentAction) -> MgmtResult<bool> {
        let vendor_id = node
            .vendor
            .ok_or_else(|| MgmtError::Agent(format!("node {} has no vendor", node.name)))?;
        let vendor = self
            .store
            .get_vendor(vendor_id)
            .await?
            .ok_or_else(|| MgmtError::not_found("vendor", vendor_id.to_string()))?;
        VendorKind::parse(&vendor.kind)?;
        let host = self.connector.connect(&vendor)?;

        match action {
            AgentAction::Start => host
                .start_agent(&node.name, node.geolocation.as_deref())
                .await
                .map(|_| true),
            AgentAction::Stop => host.stop_agent(&node.name).await.map(|_| true),
            AgentAction::Status => host.get_agent_status(&node.name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TierRecord};
    use crate::vendor::AgentHost;
    use async_trait::async_trait;
    use shardgate_storage::{BlockRecord, FragRecord, StorageError};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const SYSTEM: &str = "acme";

    #[derive(Default)]
    struct MockHost {
        calls: Mutex<Vec<String>>,
        failing: HashSet<String>,
        running: HashSet<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockHost {
        async fn record(&self, call: String, name: &str) -> MgmtResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(call);
            if self.failing.contains(name) {
                return Err(MgmtError::Agent(format!("{} unreachable", name)));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl AgentHost for MockHost {
        async fn start_agent(&self, name: &str, _geolocation: Option<&str>) -> MgmtResult<()> {
            self.record(format!("start:{}", name), name).await
        }

        async fn stop_agent(&self, name: &str) -> MgmtResult<()> {
            self.record(format!("stop:{}", name), name).await
        }

        async fn get_agent_status(&self, name: &str) -> MgmtResult<bool> {
            self.record(format!("status:{}", name), name).await?;
            Ok(self.running.contains(name))
        }
    }

    struct MockConnector {
        host: Arc<MockHost>,
    }

    impl AgentConnector for MockConnector {
        fn connect(&self, _vendor: &VendorRecord) -> MgmtResult<Arc<dyn AgentHost>> {
            Ok(self.host.clone())
        }
    }

    async fn setup(host: MockHost) -> (NodeRegistry, Arc<MemoryStore>, Arc<MockHost>) {
        let store = Arc::new(MemoryStore::new());
        for name in ["gold", "silver"] {
            store
                .insert_tier(TierRecord {
                    id: ObjectId::new(),
                    system: SYSTEM.to_string(),
                    name: name.to_string(),
                })
                .await
                .unwrap();
        }
        store
            .insert_tier(TierRecord {
                id: ObjectId::new(),
                system: "other".to_string(),
                name: "foreign".to_string(),
            })
            .await
            .unwrap();

        let host = Arc::new(host);
        let config = MgmtConfig {
            auth_secret: Some("secret".to_string()),
            ..MgmtConfig::default()
        };
        let registry = NodeRegistry::new(
            &config,
            store.clone(),
            Arc::new(MockConnector { host: host.clone() }),
        );
        (registry, store, host)
    }

    fn admin() -> Caller {
        Caller::admin(SYSTEM)
    }

    fn create_req(name: &str, tier: &str, geo: Option<&str>) -> CreateNodeRequest {
        CreateNodeRequest {
            name: name.to_string(),
            tier: tier.to_string(),
            geolocation: geo.map(str::to_string),
            storage_alloc: 1000,
            is_server: false,
            vendor: None,
            vendor_node_id: None,
        }
    }

    async fn connect_vendor(registry: &NodeRegistry, name: &str, kind: &str) -> VendorInfo {
        registry
            .connect_node_vendor(
                &admin(),
                ConnectVendorRequest {
                    name: name.to_string(),
                    category: None,
                    kind: kind.to_string(),
                    details: serde_json::json!({"address": "http://agents"}),
                },
            )
            .await
            .unwrap()
    }

    async fn create_hosted(registry: &NodeRegistry, names: &[&str], vendor: &str) {
        for name in names {
            let mut req = create_req(name, "gold", None);
            req.vendor = Some(vendor.to_string());
            registry.create(&admin(), req).await.unwrap();
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// One data fragment per placement, each with a single block.
    fn chunk_on(placements: &[(Option<ObjectId>, u64)]) -> ChunkRecord {
        let (id, system, bucket) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let frags = placements
            .iter()
            .enumerate()
            .map(|(i, &(node, size))| {
                let frag = ObjectId::new();
                FragRecord {
                    id: frag,
                    data_index: Some(i as u32),
                    parity_index: None,
                    lrc_index: None,
                    digest: None,
                    blocks: vec![BlockRecord {
                        id: ObjectId::new(),
                        system,
                        bucket,
                        chunk: id,
                        frag,
                        node,
                        pool: node.map(|_| ObjectId::new()),
                        size,
                    }],
                }
            })
            .collect();
        ChunkRecord {
            id,
            system,
            bucket,
            tier: ObjectId::new(),
            chunk_config: ObjectId::new(),
            size: 64,
            compress_size: 64,
            frag_size: 64,
            digest: None,
            cipher_key: None,
            cipher_iv: None,
            cipher_auth_tag: None,
            frags,
            parts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_read_defaults() {
        let (registry, _, _) = setup(MockHost::default()).await;
        let reply = registry.create(&admin(), create_req("n1", "gold", Some("us-east"))).await.unwrap();
        assert!(reply.token.is_none());

        let info = registry.read(&admin(), "n1").await.unwrap();
        assert_eq!(info.name, "n1");
        assert_eq!(info.ip, "0.0.0.0");
        assert_eq!(info.port, 0);
        assert_eq!(info.storage, NodeStorage { alloc: 1000, used: 0 });
        assert!(info.online);
        assert!(info.vendor.is_none());
        assert_eq!(info.device_info, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_create_duplicate_name() {
        let (registry, _, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        let err = registry.create(&admin(), create_req("n1", "silver", None)).await.unwrap_err();
        assert!(matches!(err, MgmtError::AlreadyExists { kind: "node", .. }));
    }

    #[tokio::test]
    async fn test_create_with_foreign_or_unknown_tier() {
        let (registry, _, _) = setup(MockHost::default()).await;
        let unknown_id = ObjectId::new().to_hex();
        for tier in ["foreign", "missing", unknown_id.as_str()] {
            let err = registry.create(&admin(), create_req("n1", tier, None)).await.unwrap_err();
            assert!(matches!(err, MgmtError::NotFound { kind: "tier", .. }));
        }
    }

    #[tokio::test]
    async fn test_create_by_tier_id_checks_system() {
        let (registry, store, _) = setup(MockHost::default()).await;
        let foreign = store.find_tier("other", "foreign").await.unwrap().unwrap();
        let err = registry
            .create(&admin(), create_req("n1", &foreign.id.to_hex(), None))
            .await
            .unwrap_err();
        match err {
            MgmtError::SystemMismatch { kind, owner, system, .. } => {
                assert_eq!(kind, "tier");
                assert_eq!(owner, "other");
                assert_eq!(system, SYSTEM);
            }
            other => panic!("expected SystemMismatch, got {:?}", other),
        }
        assert!(store.find_node(SYSTEM, "n1").await.unwrap().is_none());

        let gold = store.find_tier(SYSTEM, "gold").await.unwrap().unwrap();
        registry
            .create(&admin(), create_req("n1", &gold.id.to_hex(), None))
            .await
            .unwrap();
        assert_eq!(store.find_node(SYSTEM, "n1").await.unwrap().unwrap().tier, gold.id);
    }

    #[tokio::test]
    async fn test_create_node_role_gets_agent_token() {
        let (registry, store, _) = setup(MockHost::default()).await;
        let caller = Caller {
            system: SYSTEM.to_string(),
            role: Role::CreateNode,
            node_id: None,
        };
        let token = registry
            .create(&caller, create_req("n1", "gold", None))
            .await
            .unwrap()
            .token
            .unwrap();

        let agent = TokenIssuer::new("secret").verify(&token).unwrap();
        let node = store.find_node(SYSTEM, "n1").await.unwrap().unwrap();
        assert_eq!(agent.role, Role::Agent);
        assert_eq!(agent.node_id, Some(node.id));

        // create_node callers may only create
        assert!(matches!(registry.read(&caller, "n1").await, Err(MgmtError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let (registry, _, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("web-1", "gold", Some("us-east"))).await.unwrap();
        registry.create(&admin(), create_req("web-2", "silver", Some("eu-west"))).await.unwrap();
        registry.create(&admin(), create_req("db-1", "gold", Some("us-west"))).await.unwrap();

        let all = registry.list(&admin(), &NodeQuery::default()).await.unwrap();
        let all: Vec<&str> = all.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(all, vec!["db-1", "web-2", "web-1"]);

        let query = NodeQuery {
            name: Some("^web".into()),
            ..NodeQuery::default()
        };
        assert_eq!(registry.list(&admin(), &query).await.unwrap().len(), 2);

        let query = NodeQuery {
            tier: Some("gold".into()),
            geolocation: Some("^us-".into()),
            ..NodeQuery::default()
        };
        assert_eq!(registry.list(&admin(), &query).await.unwrap().len(), 2);

        let query = NodeQuery {
            skip: Some(1),
            limit: Some(1),
            ..NodeQuery::default()
        };
        let page = registry.list(&admin(), &query).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "web-2");

        let query = NodeQuery {
            tier: Some("bronze".into()),
            ..NodeQuery::default()
        };
        assert!(registry.list(&admin(), &query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_bad_regex() {
        let (registry, _, _) = setup(MockHost::default()).await;
        let query = NodeQuery {
            name: Some("(".into()),
            ..NodeQuery::default()
        };
        assert!(matches!(
            registry.list(&admin(), &query).await,
            Err(MgmtError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_update_rejects_tier_change() {
        let (registry, _, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();

        let err = registry
            .update(
                &admin(),
                "n1",
                UpdateNodeRequest {
                    tier: Some("silver".into()),
                    ..UpdateNodeRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MgmtError::UnsupportedMutation(_)));

        registry
            .update(
                &admin(),
                "n1",
                UpdateNodeRequest {
                    geolocation: Some("ap-south".into()),
                    storage_alloc: Some(5000),
                    ..UpdateNodeRequest::default()
                },
            )
            .await
            .unwrap();
        let info = registry.read(&admin(), "n1").await.unwrap();
        assert_eq!(info.geolocation.as_deref(), Some("ap-south"));
        assert_eq!(info.storage.alloc, 5000);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let (registry, store, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        registry.delete(&admin(), "n1").await.unwrap();

        assert!(matches!(
            registry.read(&admin(), "n1").await,
            Err(MgmtError::NotFound { kind: "node", .. })
        ));
        assert!(registry.list(&admin(), &NodeQuery::default()).await.unwrap().is_empty());
        assert!(matches!(
            registry.delete(&admin(), "n1").await,
            Err(MgmtError::NotFound { .. })
        ));
        // name is free again once the old record is deleted
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        assert_eq!(store.list_nodes(SYSTEM).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_group_by_tier_and_geolocation() {
        let (registry, store, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("a", "gold", Some("us"))).await.unwrap();
        registry.create(&admin(), create_req("b", "gold", Some("us"))).await.unwrap();
        registry.create(&admin(), create_req("c", "gold", Some("eu"))).await.unwrap();
        registry.create(&admin(), create_req("d", "silver", Some("us"))).await.unwrap();
        let gold = store.find_tier(SYSTEM, "gold").await.unwrap().unwrap();

        let by_tier = registry
            .group(&admin(), GroupBy { tier: true, geolocation: false })
            .await
            .unwrap();
        assert_eq!(by_tier.len(), 2);
        let gold_group = by_tier.iter().find(|g| g.tier == Some(gold.id.to_hex())).unwrap();
        assert_eq!(gold_group.count, 3);
        assert_eq!(gold_group.storage.alloc, 3000);
        assert!(gold_group.geolocation.is_none());

        let both = registry
            .group(&admin(), GroupBy { tier: true, geolocation: true })
            .await
            .unwrap();
        assert_eq!(both.len(), 3);
        assert_eq!(both.iter().map(|g| g.count).sum::<u64>(), 4);

        let total = registry.group(&admin(), GroupBy::default()).await.unwrap();
        assert_eq!(total.len(), 1);
        assert_eq!(total[0].count, 4);
        assert_eq!(total[0].storage.alloc, 4000);
    }

    #[tokio::test]
    async fn test_heartbeat_recomputes_used_from_blocks() {
        let (registry, store, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        let node = store.find_node(SYSTEM, "n1").await.unwrap().unwrap();
        let placed = Some(node.id);
        registry
            .record_chunk(&admin(), chunk_on(&[(placed, 10), (placed, 20), (placed, 5)]))
            .await
            .unwrap();

        let info = registry
            .heartbeat(
                &admin(),
                "n1",
                HeartbeatRequest {
                    geolocation: Some("us-east".into()),
                    ip: Some("0.0.0.0".into()),
                    port: Some(9999),
                    storage_alloc: Some(123_456),
                    storage_used: Some(999),
                    ..HeartbeatRequest::default()
                },
                Some("10.1.2.3".into()),
            )
            .await
            .unwrap();

        assert_eq!(info.storage.used, 35);
        assert_eq!(info.storage.alloc, 1000);
        assert_eq!(info.ip, "10.1.2.3");
        assert_eq!(info.port, 9999);
        assert_eq!(info.geolocation.as_deref(), Some("us-east"));
    }

    #[tokio::test]
    async fn test_record_chunk_stores_nothing_on_invalid_input() {
        let (registry, store, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        registry
            .create(&Caller::admin("other"), create_req("x1", "foreign", None))
            .await
            .unwrap();
        let n1 = store.find_node(SYSTEM, "n1").await.unwrap().unwrap().id;
        let x1 = store.find_node("other", "x1").await.unwrap().unwrap().id;

        let err = registry
            .record_chunk(&admin(), chunk_on(&[(Some(n1), 10), (Some(x1), 10)]))
            .await
            .unwrap_err();
        assert!(matches!(err, MgmtError::NotFound { kind: "node", .. }));

        let mut misparented = chunk_on(&[(Some(n1), 10)]);
        misparented.frags[0].blocks[0].chunk = ObjectId::new();
        assert!(matches!(
            registry.record_chunk(&admin(), misparented).await,
            Err(MgmtError::Storage(StorageError::ParentMismatch { .. }))
        ));

        let mut unlabeled = chunk_on(&[(Some(n1), 10)]);
        unlabeled.frags[0].data_index = None;
        assert!(matches!(
            registry.record_chunk(&admin(), unlabeled).await,
            Err(MgmtError::Storage(StorageError::InvalidFragment { .. }))
        ));

        let agent = Caller {
            system: SYSTEM.to_string(),
            role: Role::Agent,
            node_id: Some(n1),
        };
        assert!(matches!(
            registry.record_chunk(&agent, chunk_on(&[(Some(n1), 10)])).await,
            Err(MgmtError::Unauthorized(_))
        ));

        assert_eq!(store.sum_block_sizes(n1).await.unwrap(), 0);
        assert_eq!(store.sum_block_sizes(x1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_chunk_skips_pending_blocks_and_never_double_counts() {
        let (registry, store, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        let n1 = store.find_node(SYSTEM, "n1").await.unwrap().unwrap().id;

        let record = chunk_on(&[(Some(n1), 10), (None, 99)]);
        let info = registry.record_chunk(&admin(), record.clone()).await.unwrap();
        assert_eq!(info.id, record.id.to_hex());
        assert_eq!(info.frags.len(), 2);
        assert_eq!(store.sum_block_sizes(n1).await.unwrap(), 10);

        let err = registry.record_chunk(&admin(), record).await.unwrap_err();
        assert!(matches!(err, MgmtError::AlreadyExists { kind: "block", .. }));
        assert_eq!(store.sum_block_sizes(n1).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_heartbeat_prefers_reported_ip() {
        let (registry, _, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        let info = registry
            .heartbeat(
                &admin(),
                "n1",
                HeartbeatRequest {
                    ip: Some("192.168.0.7".into()),
                    ..HeartbeatRequest::default()
                },
                Some("10.1.2.3".into()),
            )
            .await
            .unwrap();
        assert_eq!(info.ip, "192.168.0.7");
    }

    #[tokio::test]
    async fn test_agent_heartbeat_scoped_to_own_node() {
        let (registry, store, _) = setup(MockHost::default()).await;
        registry.create(&admin(), create_req("n1", "gold", None)).await.unwrap();
        registry.create(&admin(), create_req("n2", "gold", None)).await.unwrap();
        let n1 = store.find_node(SYSTEM, "n1").await.unwrap().unwrap();
        let agent = Caller {
            system: SYSTEM.to_string(),
            role: Role::Agent,
            node_id: Some(n1.id),
        };

        tokio_test::assert_ok!(
            registry
                .heartbeat(&agent, "n1", HeartbeatRequest::default(), None)
                .await
        );
        assert!(matches!(
            registry.heartbeat(&agent, "n2", HeartbeatRequest::default(), None).await,
            Err(MgmtError::Unauthorized(_))
        ));
        assert!(matches!(
            registry.list(&agent, &NodeQuery::default()).await,
            Err(MgmtError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_start_skips_nodes_already_started() {
        let (registry, store, host) = setup(MockHost::default()).await;
        connect_vendor(&registry, "host-1", "agent_host").await;
        create_hosted(&registry, &["n1", "n2"], "host-1").await;

        let outcomes = registry.start_nodes(&admin(), &names(&["n1"])).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].ok);

        let outcomes = registry.start_nodes(&admin(), &names(&["n1", "n2", "ghost"])).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "n2");

        assert_eq!(host.calls(), vec!["start:n1", "start:n2"]);
        assert!(store.find_node(SYSTEM, "n2").await.unwrap().unwrap().started);
    }

    #[tokio::test]
    async fn test_stop_is_best_effort() {
        let host = MockHost {
            failing: ["n2".to_string()].into_iter().collect(),
            ..MockHost::default()
        };
        let (registry, store, host) = setup(host).await;
        connect_vendor(&registry, "host-1", "agent_host").await;
        create_hosted(&registry, &["n1", "n2", "n3"], "host-1").await;
        registry.start_nodes(&admin(), &names(&["n1", "n2", "n3"])).await.unwrap();

        let outcomes = registry.stop_nodes(&admin(), &names(&["n1", "n2", "n3"])).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        let failed: Vec<&str> = outcomes.iter().filter(|o| !o.ok).map(|o| o.name.as_str()).collect();
        assert_eq!(failed, vec!["n2"]);
        assert!(outcomes.iter().find(|o| o.name == "n2").unwrap().error.is_some());

        for name in ["n1", "n2", "n3"] {
            assert!(!store.find_node(SYSTEM, name).await.unwrap().unwrap().started);
        }
        assert_eq!(host.calls().iter().filter(|c| c.starts_with("stop:")).count(), 3);
    }

    /// Rejects started-flag updates for one node name.
    struct RejectingStarts {
        inner: MemoryStore,
        reject: String,
    }

    #[async_trait]
    impl NodeStore for RejectingStarts {
        async fn insert_tier(&self, tier: TierRecord) -> MgmtResult<()> {
            self.inner.insert_tier(tier).await
        }

        async fn find_tier(&self, system: &str, name: &str) -> MgmtResult<Option<TierRecord>> {
            self.inner.find_tier(system, name).await
        }

        async fn get_tier(&self, id: ObjectId) -> MgmtResult<Option<TierRecord>> {
            self.inner.get_tier(id).await
        }

        async fn insert_node(&self, node: NodeRecord) -> MgmtResult<()> {
            self.inner.insert_node(node).await
        }

        async fn find_node(&self, system: &str, name: &str) -> MgmtResult<Option<NodeRecord>> {
            self.inner.find_node(system, name).await
        }

        async fn get_node(&self, system: &str, id: ObjectId) -> MgmtResult<Option<NodeRecord>> {
            self.inner.get_node(system, id).await
        }

        async fn list_nodes(&self, system: &str) -> MgmtResult<Vec<NodeRecord>> {
            self.inner.list_nodes(system).await
        }

        async fn update_node(&self, system: &str, id: ObjectId, update: NodeUpdate) -> MgmtResult<NodeRecord> {
            let rejected = update.started.is_some()
                && self
                    .inner
                    .get_node(system, id)
                    .await?
                    .map_or(false, |n| n.name == self.reject);
            if rejected {
                return Err(MgmtError::Internal(format!("write to {} failed", self.reject)));
            }
            self.inner.update_node(system, id, update).await
        }

        async fn nodes_by_vendor(&self, system: &str, vendor: ObjectId) -> MgmtResult<Vec<NodeRecord>> {
            self.inner.nodes_by_vendor(system, vendor).await
        }

        async fn insert_vendor(&self, vendor: VendorRecord) -> MgmtResult<()> {
            self.inner.insert_vendor(vendor).await
        }

        async fn find_vendor(&self, system: &str, name: &str) -> MgmtResult<Option<VendorRecord>> {
            self.inner.find_vendor(system, name).await
        }

        async fn get_vendor(&self, id: ObjectId) -> MgmtResult<Option<VendorRecord>> {
            self.inner.get_vendor(id).await
        }

        async fn insert_blocks(&self, blocks: Vec<BlockRecord>) -> MgmtResult<()> {
            self.inner.insert_blocks(blocks).await
        }

        async fn sum_block_sizes(&self, node: ObjectId) -> MgmtResult<u64> {
            self.inner.sum_block_sizes(node).await
        }
    }

    #[tokio::test]
    async fn test_failed_flag_update_reported_and_not_dispatched() {
        let store = Arc::new(RejectingStarts {
            inner: MemoryStore::new(),
            reject: "n2".to_string(),
        });
        store
            .insert_tier(TierRecord {
                id: ObjectId::new(),
                system: SYSTEM.to_string(),
                name: "gold".to_string(),
            })
            .await
            .unwrap();
        let host = Arc::new(MockHost::default());
        let registry = NodeRegistry::new(
            &MgmtConfig::default(),
            store.clone(),
            Arc::new(MockConnector { host: host.clone() }),
        );
        connect_vendor(&registry, "host-1", "agent_host").await;
        create_hosted(&registry, &["n1", "n2", "n3"], "host-1").await;

        let outcomes = registry.start_nodes(&admin(), &names(&["n1", "n2", "n3"])).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        let n2 = outcomes.iter().find(|o| o.name == "n2").unwrap();
        assert!(!n2.ok);
        assert_eq!(n2.error.as_deref(), Some("internal error: write to n2 failed"));
        assert!(outcomes.iter().filter(|o| o.name != "n2").all(|o| o.ok));

        assert_eq!(host.calls(), vec!["start:n1", "start:n3"]);
        for (name, started) in [("n1", true), ("n2", false), ("n3", true)] {
            assert_eq!(store.find_node(SYSTEM, name).await.unwrap().unwrap().started, started);
        }
    }

    #[tokio::test]
    async fn test_dispatch_concurrency_is_bounded() {
        let (registry, _, host) = setup(MockHost::default()).await;
        connect_vendor(&registry, "host-1", "agent_host").await;
        let all: Vec<String> = (0..10).map(|i| format!("n{}", i)).collect();
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();
        create_hosted(&registry, &refs, "host-1").await;

        let outcomes = registry.start_nodes(&admin(), &all).await.unwrap();
        assert_eq!(outcomes.len(), 10);
        let max = host.max_in_flight.load(Ordering::SeqCst);
        assert!(max >= 1 && max <= 3, "max in flight {}", max);
    }

    #[tokio::test]
    async fn test_agents_status() {
        let host = MockHost {
            running: ["n1".to_string()].into_iter().collect(),
            ..MockHost::default()
        };
        let (registry, _, _) = setup(host).await;
        connect_vendor(&registry, "host-1", "agent_host").await;
        connect_vendor(&registry, "cloud-1", "cloud_vm").await;
        create_hosted(&registry, &["n1", "n2"], "host-1").await;
        create_hosted(&registry, &["n3"], "cloud-1").await;
        registry.create(&admin(), create_req("n4", "gold", None)).await.unwrap();

        let agent = Caller {
            system: SYSTEM.to_string(),
            role: Role::Agent,
            node_id: None,
        };
        let status = registry
            .get_agents_status(&agent, &names(&["n1", "n2", "n3", "n4"]))
            .await
            .unwrap();
        let status: Vec<(&str, bool)> = status.iter().map(|s| (s.name.as_str(), s.status)).collect();
        assert_eq!(
            status,
            vec![("n1", true), ("n2", false), ("n3", false), ("n4", false)]
        );
    }

    #[tokio::test]
    async fn test_unsupported_vendor_kind_fails_per_node() {
        let (registry, _, host) = setup(MockHost::default()).await;
        connect_vendor(&registry, "cloud-1", "cloud_vm").await;
        create_hosted(&registry, &["n1"], "cloud-1").await;

        let outcomes = registry.start_nodes(&admin(), &names(&["n1"])).await.unwrap();
        assert!(!outcomes[0].ok);
        assert!(outcomes[0].error.as_deref().unwrap().contains("cloud_vm"));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_vendor_idempotent_and_restarts_nodes() {
        let (registry, _, host) = setup(MockHost::default()).await;
        let first = connect_vendor(&registry, "host-1", "agent_host").await;
        assert!(host.calls().is_empty());

        create_hosted(&registry, &["n1", "n2"], "host-1").await;
        let second = connect_vendor(&registry, "host-1", "agent_host").await;

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "host-1");
        assert_eq!(second.kind, "agent_host");
        assert_eq!(host.calls(), vec!["start:n1", "start:n2"]);
    }

    #[tokio::test]
    async fn test_create_with_unknown_vendor() {
        let (registry, _, _) = setup(MockHost::default()).await;
        let mut req = create_req("n1", "gold", None);
        req.vendor = Some("nope".into());
        assert!(matches!(
            registry.create(&admin(), req).await,
            Err(MgmtError::NotFound { kind: "vendor", .. })
        ));
    }
}
