//! # prism-client
//!
//! The issuer side of the relay: a persistent WebSocket connection to the
//! bridge with `send(type, params, timeout) → result | error` on top.
//!
//! One background task owns the socket and a pending-request table; any
//! number of concurrent callers multiplex over it, each suspended only on
//! its own request. Outward-facing tool surfaces (MCP servers and the like)
//! build on this crate and never touch the wire format directly.

#![deny(unsafe_code)]

mod client;

pub use client::{BridgeClient, ClientConfig, ClientError};
