//! Error taxonomy for the incident core.
//!
//! Validation and not-found failures surface to the caller. Integration
//! failures from the responder directory or the messaging channel are
//! downgraded by the assignment engine and the dispatcher, so callers of
//! `ingest` only see them when they use those collaborators directly.

use thiserror::Error;
use uuid::Uuid;

use crate::incident::Role;

#[derive(Debug, Error)]
pub enum IncidentError {
    /// Missing or malformed input, rejected before any store access.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("incident {0} is already verified")]
    AlreadyVerified(Uuid),

    #[error("role {role} is not allowed to {action}")]
    Forbidden { role: Role, action: &'static str },

    /// Geospatial query or message send failed in a collaborator.
    #[error("integration failure: {0}")]
    TransientIntegration(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl IncidentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn incident_not_found(id: Uuid) -> Self {
        Self::NotFound {
            kind: "incident",
            id: id.to_string(),
        }
    }

    pub fn responder_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "responder",
            id: id.to_string(),
        }
    }
}

pub type Result<T, E = IncidentError> = std::result::Result<T, E>;
