//! Bearer-token authentication and role checks.
//!
//! Tokens are HS256 JWTs scoped to one system (tenant). The role decides
//! which registry operations the caller may invoke; agent tokens also carry
//! the node they were issued for.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shardgate_storage::ObjectId;

use crate::error::{MgmtError, MgmtResult};

/// Lifetime of tokens handed to newly created nodes.
const AGENT_TOKEN_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    CreateNode,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub system: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<ObjectId>,
    pub exp: i64,
}

/// Identity of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub system: String,
    pub role: Role,
    pub node_id: Option<ObjectId>,
}

impl Caller {
    pub fn admin(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            role: Role::Admin,
            node_id: None,
        }
    }

    /// Fails unless the caller holds one of `roles`.
    pub fn require(&self, roles: &[Role]) -> MgmtResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(MgmtError::Unauthorized(format!(
                "role {:?} may not perform this operation",
                self.role
            )))
        }
    }
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Self {
            system: claims.system,
            role: claims.role,
            node_id: claims.node_id,
        }
    }
}

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, claims: &Claims) -> MgmtResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| MgmtError::Config(format!("failed to sign token: {}", e)))
    }

    /// Token for the agent of a freshly created node.
    pub fn issue_agent_token(&self, system: &str, node_id: ObjectId) -> MgmtResult<String> {
        self.issue(&Claims {
            system: system.to_string(),
            role: Role::Agent,
            node_id: Some(node_id),
            exp: (Utc::now() + chrono::Duration::days(AGENT_TOKEN_TTL_DAYS)).timestamp(),
        })
    }

    pub fn verify(&self, token: &str) -> MgmtResult<Caller> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims.into())
            .map_err(|e| MgmtError::Unauthorized(format!("invalid token: {}", e)))
    }
}
