//! Relay failure taxonomy.
//!
//! Every way a routed command can fail maps onto one [`RelayError`] variant.
//! The wire format carries only a human-readable message, so the variant is
//! the in-process source of truth and [`RelayError::to_string`] is what goes
//! out in the response envelope.

/// Failure modes of the command relay.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// Payload could not be parsed, or a required field is missing.
    /// Rejected at the boundary; never reaches routing state.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What is wrong with the payload.
        reason: String,
    },

    /// No scene connection is currently bound for the target session.
    #[error("no scene is connected for session '{session_id}'")]
    NoActiveSession {
        /// The session that was looked up.
        session_id: String,
    },

    /// No terminal response arrived before the deadline.
    #[error("timed out waiting for scene response")]
    Timeout,

    /// The scene explicitly returned `status: "error"`; the message is
    /// passed through unmodified.
    #[error("{message}")]
    ExecutorError {
        /// Scene-supplied failure message.
        message: String,
    },

    /// A caller reused a request identifier still in flight on the same
    /// connection.
    #[error("request id '{request_id}' is already in flight")]
    DuplicateRequestId {
        /// The reused identifier.
        request_id: String,
    },

    /// The underlying connection went away before a response was delivered.
    #[error("connection dropped: {reason}")]
    TransportDropped {
        /// Short description of what dropped.
        reason: String,
    },
}

impl RelayError {
    /// Short machine-readable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::NoActiveSession { .. } => "no_active_session",
            Self::Timeout => "timeout",
            Self::ExecutorError { .. } => "executor_error",
            Self::DuplicateRequestId { .. } => "duplicate_request_id",
            Self::TransportDropped { .. } => "transport_dropped",
        }
    }

    /// Whether the failure was synthesized locally rather than reported by
    /// the scene.
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::ExecutorError { .. })
    }
}
