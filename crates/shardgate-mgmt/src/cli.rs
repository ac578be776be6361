use crate::api::AdminApi;
use crate::config::MgmtConfig;
use crate::nodes::{AgentOutcome, AgentStatus, NodeGroup, NodeInfo};
use anyhow::Result;
use clap::{Parser, Subcommand};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sg-mgmt")]
#[command(about = "ShardGate management CLI", long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value = "http://localhost:8443")]
    pub server: String,

    #[arg(short, long, env = "SG_ADMIN_TOKEN")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Node {
        #[command(subcommand)]
        cmd: NodeCmd,
    },
    /// Node counts and storage totals
    Group {
        #[arg(long)]
        tier: bool,
        #[arg(long)]
        geolocation: bool,
    },
    Vendor {
        #[command(subcommand)]
        cmd: VendorCmd,
    },
    Serve {
        #[arg(short, long, default_value = "/etc/shardgate/mgmt.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
pub enum NodeCmd {
    List {
        /// Name regex
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        tier: Option<String>,
        #[arg(long)]
        geolocation: Option<String>,
    },
    Show {
        name: String,
    },
    Create {
        name: String,
        #[arg(long)]
        tier: String,
        #[arg(long)]
        geolocation: Option<String>,
        #[arg(long, default_value = "0")]
        storage_alloc: u64,
        #[arg(long)]
        vendor: Option<String>,
    },
    Delete {
        name: String,
    },
    Start {
        #[arg(required = true)]
        names: Vec<String>,
    },
    Stop {
        #[arg(required = true)]
        names: Vec<String>,
    },
    Status {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum VendorCmd {
    Connect {
        name: String,
        #[arg(long, default_value = "agent_host")]
        kind: String,
        #[arg(long)]
        category: Option<String>,
        /// Base URL of the agent host
        #[arg(long)]
        address: String,
    },
}

#[derive(Deserialize)]
struct NodeList {
    nodes: Vec<NodeInfo>,
}

#[derive(Deserialize)]
struct GroupList {
    groups: Vec<NodeGroup>,
}

#[derive(Deserialize)]
struct OutcomeList {
    nodes: Vec<AgentOutcome>,
}

#[derive(Deserialize)]
struct StatusList {
    nodes: Vec<AgentStatus>,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Node { ref cmd } => self.node(cmd).await,
            Command::Group { tier, geolocation } => self.group(tier, geolocation).await,
            Command::Vendor { ref cmd } => self.vendor(cmd).await,
            Command::Serve { ref config } => serve(config).await,
        }
    }

    fn build_request(&self, method: Method, path: &str, query: &[(&str, &str)], body: Option<Value>) -> RequestBuilder {
        let url = format!("{}{}", self.server.trim_end_matches('/'), path);

        let mut request = Client::new().request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn request<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T> {
        self.send(self.build_request(method, path, &[], body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_default();
            anyhow::bail!("Request failed: {} {}", status, message);
        }

        Ok(response.json().await?)
    }

    async fn node(&self, cmd: &NodeCmd) -> Result<()> {
        match cmd {
            NodeCmd::List { name, tier, geolocation } => {
                let query: Vec<(&str, &str)> = [("name", name), ("tier", tier), ("geolocation", geolocation)]
                    .into_iter()
                    .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
                    .collect();
                let request = self.build_request(Method::GET, "/api/v1/nodes", &query, None);
                let list: NodeList = self.send(request).await?;
                print_nodes(&list.nodes);
                Ok(())
            }
            NodeCmd::Show { name } => {
                let node: NodeInfo = self
                    .request(Method::GET, &format!("/api/v1/nodes/{}", name), None)
                    .await?;
                println!("Name: {}", node.name);
                println!("Address: {}:{}", node.ip, node.port);
                println!("Geolocation: {}", node.geolocation.as_deref().unwrap_or("-"));
                println!("Online: {}", node.online);
                println!("Heartbeat: {}", node.heartbeat);
                println!("Storage Alloc: {}", format_bytes(node.storage.alloc));
                println!("Storage Used: {}", format_bytes(node.storage.used));
                if let Some(vendor) = node.vendor {
                    println!("Vendor: {}", vendor);
                }
                Ok(())
            }
            NodeCmd::Create {
                name,
                tier,
                geolocation,
                storage_alloc,
                vendor,
            } => {
                let body = json!({
                    "name": name,
                    "tier": tier,
                    "geolocation": geolocation,
                    "storage_alloc": storage_alloc,
                    "vendor": vendor,
                });
                let reply: Value = self.request(Method::POST, "/api/v1/nodes", Some(body)).await?;
                println!("Created node {}", name);
                if let Some(token) = reply.get("token").and_then(|t| t.as_str()) {
                    println!("Agent token: {}", token);
                }
                Ok(())
            }
            NodeCmd::Delete { name } => {
                let _: Value = self
                    .request(Method::DELETE, &format!("/api/v1/nodes/{}", name), None)
                    .await?;
                println!("Deleted node {}", name);
                Ok(())
            }
            NodeCmd::Start { names } => self.lifecycle("start", names).await,
            NodeCmd::Stop { names } => self.lifecycle("stop", names).await,
            NodeCmd::Status { names } => {
                let list: StatusList = self
                    .request(Method::POST, "/api/v1/nodes/status", Some(json!({ "nodes": names })))
                    .await?;
                println!("{:<30} {:<10}", "NODE", "RUNNING");
                println!("{}", "-".repeat(41));
                for status in list.nodes {
                    println!("{:<30} {:<10}", status.name, status.status);
                }
                Ok(())
            }
        }
    }

    async fn lifecycle(&self, action: &str, names: &[String]) -> Result<()> {
        let list: OutcomeList = self
            .request(
                Method::POST,
                &format!("/api/v1/nodes/{}", action),
                Some(json!({ "nodes": names })),
            )
            .await?;
        if list.nodes.is_empty() {
            println!("No node changed state");
            return Ok(());
        }
        println!("{:<30} {:<6} {}", "NODE", "OK", "ERROR");
        println!("{}", "-".repeat(60));
        for outcome in list.nodes {
            println!(
                "{:<30} {:<6} {}",
                outcome.name,
                outcome.ok,
                outcome.error.as_deref().unwrap_or("")
            );
        }
        Ok(())
    }

    async fn group(&self, tier: bool, geolocation: bool) -> Result<()> {
        let body = json!({ "group_by": { "tier": tier, "geolocation": geolocation } });
        let list: GroupList = self.request(Method::POST, "/api/v1/nodes/group", Some(body)).await?;

        println!("{:<26} {:<16} {:>8} {:>15} {:>15}", "TIER", "GEOLOCATION", "NODES", "ALLOC", "USED");
        println!("{}", "-".repeat(84));
        for group in list.groups {
            println!(
                "{:<26} {:<16} {:>8} {:>15} {:>15}",
                group.tier.as_deref().unwrap_or("*"),
                group.geolocation.as_deref().unwrap_or("*"),
                group.count,
                format_bytes(group.storage.alloc),
                format_bytes(group.storage.used)
            );
        }
        Ok(())
    }

    async fn vendor(&self, cmd: &VendorCmd) -> Result<()> {
        match cmd {
            VendorCmd::Connect {
                name,
                kind,
                category,
                address,
            } => {
                let body = json!({
                    "name": name,
                    "kind": kind,
                    "category": category,
                    "details": { "address": address },
                });
                let vendor: Value = self.request(Method::POST, "/api/v1/vendors", Some(body)).await?;
                println!("{}", serde_json::to_string_pretty(&vendor)?);
                Ok(())
            }
        }
    }
}

pub async fn serve(config_path: &Path) -> Result<()> {
    let config = MgmtConfig::load_or_default(config_path)?;
    let api = AdminApi::from_config(config).await?;
    api.serve().await
}

fn print_nodes(nodes: &[NodeInfo]) {
    println!(
        "{:<24} {:<22} {:<12} {:<8} {:>12} {:>12}",
        "NAME", "ADDRESS", "GEO", "ONLINE", "ALLOC", "USED"
    );
    println!("{}", "-".repeat(95));
    for node in nodes {
        println!(
            "{:<24} {:<22} {:<12} {:<8} {:>12} {:>12}",
            node.name,
            format!("{}:{}", node.ip, node.port),
            node.geolocation.as_deref().unwrap_or("-"),
            node.online,
            format_bytes(node.storage.alloc),
            format_bytes(node.storage.used)
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
