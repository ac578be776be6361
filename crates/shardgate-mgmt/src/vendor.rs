//! Vendors and dispatch to the agent hosts that run node agents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{MgmtError, MgmtResult};
use crate::store::VendorRecord;

/// Vendor kinds with a dispatch implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorKind {
    AgentHost,
}

impl VendorKind {
    pub fn parse(kind: &str) -> MgmtResult<Self> {
        match kind {
            "agent_host" => Ok(VendorKind::AgentHost),
            other => Err(MgmtError::UnsupportedVendorKind(other.to_string())),
        }
    }
}

/// Read-facing vendor shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorInfo {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub kind: String,
    pub details: serde_json::Value,
}

impl From<&VendorRecord> for VendorInfo {
    fn from(vendor: &VendorRecord) -> Self {
        Self {
            id: vendor.id.to_hex(),
            name: vendor.name.clone(),
            category: vendor.category.clone(),
            kind: vendor.kind.clone(),
            details: vendor.details.clone(),
        }
    }
}

/// Lifecycle calls understood by an agent host.
#[async_trait]
pub trait AgentHost: Send + Sync {
    async fn start_agent(&self, name: &str, geolocation: Option<&str>) -> MgmtResult<()>;

    async fn stop_agent(&self, name: &str) -> MgmtResult<()>;

    /// Whether the agent for `name` is running.
    async fn get_agent_status(&self, name: &str) -> MgmtResult<bool>;
}

/// Resolves the agent host client for a vendor.
pub trait AgentConnector: Send + Sync {
    fn connect(&self, vendor: &VendorRecord) -> MgmtResult<Arc<dyn AgentHost>>;
}

/// Connects to agent hosts over HTTP; the vendor's `details.address` is the base URL.
pub struct HttpAgentConnector {
    client: Client,
}

impl HttpAgentConnector {
    pub fn new(timeout: Duration) -> MgmtResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MgmtError::Config(format!("failed to build agent client: {}", e)))?;
        Ok(Self { client })
    }
}

impl AgentConnector for HttpAgentConnector {
    fn connect(&self, vendor: &VendorRecord) -> MgmtResult<Arc<dyn AgentHost>> {
        match VendorKind::parse(&vendor.kind)? {
            VendorKind::AgentHost => {
                let address = vendor
                    .details
                    .get("address")
                    .and_then(|a| a.as_str())
                    .ok_or_else(|| MgmtError::Agent(format!("vendor {} has no address", vendor.name)))?;
                Ok(Arc::new(HttpAgentHost {
                    client: self.client.clone(),
                    base: address.trim_end_matches('/').to_string(),
                }))
            }
        }
    }
}

pub struct HttpAgentHost {
    client: Client,
    base: String,
}

#[derive(Serialize)]
struct AgentParams<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    geolocation: Option<&'a str>,
}

#[derive(Deserialize)]
struct AgentStatusReply {
    #[serde(default)]
    status: bool,
}

impl HttpAgentHost {
    async fn post(&self, method: &str, params: &AgentParams<'_>) -> MgmtResult<reqwest::Response> {
        let url = format!("{}/api/v1/agent_host/{}", self.base, method);
        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| MgmtError::Agent(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(MgmtError::Agent(format!("{}: {}", url, response.status())));
        }
        Ok(response)
    }
}

#[async_trait]
impl AgentHost for HttpAgentHost {
    async fn start_agent(&self, name: &str, geolocation: Option<&str>) -> MgmtResult<()> {
        self.post("start_agent", &AgentParams { name, geolocation }).await?;
        Ok(())
    }

    async fn stop_agent(&self, name: &str) -> MgmtResult<()> {
        self.post("stop_agent", &AgentParams { name, geolocation: None }).await?;
        Ok(())
    }

    async fn get_agent_status(&self, name: &str) -> MgmtResult<bool> {
        let reply: AgentStatusReply = self
            .post("get_agent_status", &AgentParams { name, geolocation: None })
            .await?
            .json()
            .await
            .map_err(|e| MgmtError::Agent(format!("bad status reply: {}", e)))?;
        Ok(reply.status)
    }
}
