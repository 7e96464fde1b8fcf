//! # prism-protocol
//!
//! JSON wire format shared by the bridge, scenes, and issuer clients.
//!
//! - **Envelopes**: [`CommandRequest`] / [`CommandResponse`], one per text frame
//! - **Handshake**: first frame from every peer, declaring its role
//! - **Validation**: malformed payloads are rejected here, at the boundary,
//!   and never reach routing state
//!
//! The relay treats `type` and `params` as opaque; only the identifiers and
//! the response status are interpreted.

#![deny(unsafe_code)]

pub mod envelope;
pub mod handshake;

pub use envelope::{CommandRequest, CommandResponse, EnvelopeError, ResponseStatus};
pub use handshake::{AckStatus, Handshake, HandshakeAck, PeerRole};

/// WebSocket close codes used when a handshake goes wrong.
pub mod close {
    /// Peer did not hand-shake within the deadline.
    pub const HANDSHAKE_TIMEOUT: u16 = 4000;
    /// First frame was not a parseable handshake.
    pub const INVALID_HANDSHAKE: u16 = 4001;
    /// Handshake declared a role the bridge does not know.
    pub const UNKNOWN_ROLE: u16 = 4002;
}
