//! Role handshake exchanged as the first frame on every connection.
//!
//! No command traffic is accepted from a peer before its handshake is
//! acknowledged. Scenes declare the session they are authoritative for;
//! issuers just declare the `agent` role.

use serde::{Deserialize, Serialize};

/// Which side of the relay a connection is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Command executor embedded in the live scene.
    Scene,
    /// Command issuer (agent-facing tooling).
    Agent,
}

/// First frame sent by a connecting peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Declared role.
    pub role: PeerRole,
    /// Session the peer announces (scenes only; omitted means default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Handshake {
    /// Handshake for a scene announcing `session_id`.
    pub fn scene(session_id: impl Into<String>) -> Self {
        Self {
            role: PeerRole::Scene,
            session_id: Some(session_id.into()),
        }
    }

    /// Handshake for an issuer connection.
    pub fn agent() -> Self {
        Self {
            role: PeerRole::Agent,
            session_id: None,
        }
    }

    /// The announced session, defaulting the omitted case.
    pub fn session(&self) -> &str {
        self.session_id.as_deref().unwrap_or(prism_core::DEFAULT_SESSION)
    }
}

/// Acknowledgement status for a handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Scene accepted and bound.
    Ready,
    /// Issuer accepted.
    Ok,
    /// Handshake rejected.
    Error,
}

/// Bridge reply to a handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    /// Outcome of the handshake.
    pub status: AckStatus,
    /// The session the scene was bound to (on `ready`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Rejection reason (on `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HandshakeAck {
    /// Ack confirming a scene binding.
    pub fn ready(session_id: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Ready,
            session_id: Some(session_id.into()),
            message: None,
        }
    }

    /// Ack confirming an issuer connection.
    pub fn ok() -> Self {
        Self {
            status: AckStatus::Ok,
            session_id: None,
            message: None,
        }
    }

    /// Rejection with a reason.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Error,
            session_id: None,
            message: Some(message.into()),
        }
    }

    /// Whether the handshake was accepted (either role).
    pub fn accepted(&self) -> bool {
        matches!(self.status, AckStatus::Ready | AckStatus::Ok)
    }
}
