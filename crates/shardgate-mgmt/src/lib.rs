//! ShardGate management subsystem: node registry, agent dispatch, cluster redirector, admin API, CLI

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod nodes;
pub mod redirector;
pub mod security;
pub mod store;
pub mod vendor;

pub use api::AdminApi;
pub use auth::{Caller, Claims, Role, TokenIssuer};
pub use config::MgmtConfig;
pub use error::{MgmtError, MgmtResult};
pub use nodes::{
    AgentOutcome, AgentStatus, ConnectVendorRequest, CreateNodeReply, CreateNodeRequest, GroupBy, HeartbeatRequest,
    NodeGroup, NodeInfo, NodeQuery, NodeRegistry, UpdateNodeRequest,
};
pub use redirector::{ClusterRpc, ConnectionRegistry, HttpClusterRpc, PeerConnection, Redirector};
pub use security::AuthRateLimiter;
pub use store::{MemoryStore, NodeRecord, NodeStorage, NodeStore, NodeUpdate, TierRecord, VendorRecord};
pub use vendor::{AgentConnector, AgentHost, HttpAgentConnector, VendorInfo, VendorKind};
