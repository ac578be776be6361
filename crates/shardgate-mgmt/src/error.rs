//! Error types for the management subsystem.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shardgate_storage::StorageError;
use thiserror::Error;

/// Result type alias for management operations.
pub type MgmtResult<T> = Result<T, MgmtError>;

/// Errors surfaced by the node registry, agent dispatch and the redirector.
#[derive(Debug, Error)]
pub enum MgmtError {
    /// Record missing or soft-deleted.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Record kind ("node", "tier", "vendor").
        kind: &'static str,
        /// Name or id that was looked up.
        name: String,
    },

    /// Unique-key collision on create.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Record kind.
        kind: &'static str,
        /// Colliding name.
        name: String,
    },

    /// A referenced record belongs to another tenant.
    #[error("{kind} {name} belongs to system {owner}, not {system}")]
    SystemMismatch {
        /// Record kind.
        kind: &'static str,
        /// Referenced name.
        name: String,
        /// Tenant that owns the record.
        owner: String,
        /// Tenant of the caller.
        system: String,
    },

    /// A vendor's kind has no dispatch implementation.
    #[error("vendor kind not implemented: {0}")]
    UnsupportedVendorKind(String),

    /// A requested change is not supported by update.
    #[error("unsupported mutation: {0}")]
    UnsupportedMutation(String),

    /// Malformed list filter.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Caller lacks a required role or presented a bad token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A single agent call failed.
    #[error("agent call failed: {0}")]
    Agent(String),

    /// A cluster broadcast target failed.
    #[error("rpc to {address} failed: {message}")]
    Rpc {
        /// Target address.
        address: String,
        /// Failure description.
        message: String,
    },

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Entity model error.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MgmtError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        MgmtError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// HTTP status the admin API answers with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // cross-tenant references look like missing records to the caller
            MgmtError::NotFound { .. } | MgmtError::SystemMismatch { .. } => StatusCode::NOT_FOUND,
            MgmtError::AlreadyExists { .. } => StatusCode::CONFLICT,
            MgmtError::UnsupportedMutation(_) | MgmtError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            MgmtError::Unauthorized(_) => StatusCode::FORBIDDEN,
            MgmtError::Agent(_) | MgmtError::Rpc { .. } => StatusCode::BAD_GATEWAY,
            MgmtError::Storage(StorageError::InvalidFragment { .. } | StorageError::ParentMismatch { .. }) => {
                StatusCode::BAD_REQUEST
            }
            MgmtError::Storage(StorageError::FragmentNotFound { .. }) => StatusCode::NOT_FOUND,
            MgmtError::UnsupportedVendorKind(_)
            | MgmtError::Config(_)
            | MgmtError::Internal(_)
            | MgmtError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to API callers.
    fn public_message(&self) -> String {
        match self {
            MgmtError::SystemMismatch { kind, name, .. } => format!("{} not found: {}", kind, name),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for MgmtError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.public_message() }))).into_response()
    }
}
