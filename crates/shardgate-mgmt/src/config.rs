use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MgmtConfig {
    pub bind_addr: SocketAddr,
    /// This member's own address; always a target of cluster broadcasts.
    pub advertise_addr: String,
    /// HS256 secret for bearer tokens. `None` runs the API unauthenticated.
    pub auth_secret: Option<String>,
    pub default_system: String,
    pub online_threshold_secs: u64,
    /// Cap on concurrent agent calls and started-flag updates.
    pub agent_concurrency: usize,
    pub rpc_timeout_secs: u64,
    /// Tiers seeded for `default_system` at startup.
    pub tiers: Vec<String>,
    /// Peers whose `X-Forwarded-For` header names the real client.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            advertise_addr: String::from("http://127.0.0.1:8443"),
            auth_secret: None,
            default_system: String::from("default"),
            online_threshold_secs: 300,
            agent_concurrency: 3,
            rpc_timeout_secs: 30,
            tiers: vec![String::from("default")],
            trusted_proxies: Vec::new(),
        }
    }
}

impl MgmtConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: MgmtConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.agent_concurrency == 0 {
            anyhow::bail!("agent_concurrency must be at least 1");
        }
        if self.default_system.is_empty() {
            anyhow::bail!("default_system must not be empty");
        }
        Ok(())
    }

    pub fn online_threshold(&self) -> chrono::Duration {
        let secs = i64::try_from(self.online_threshold_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn is_trusted_proxy(&self, peer: IpAddr) -> bool {
        self.trusted_proxies.contains(&peer)
    }
}
