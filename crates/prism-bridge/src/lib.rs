//! # prism-bridge
//!
//! The relay broker between command issuers and scene executors.
//!
//! - **Correlator**: per-connection table matching outstanding request ids to
//!   write-once result slots with deadlines
//! - **Session Registry**: which scene connection is authoritative for each
//!   session id (single writer per session)
//! - **Relay**: validate → route → forward → await → respond
//! - **Server**: axum WebSocket endpoint both sides connect to, plus
//!   `/health`
//! - Heartbeat liveness, graceful shutdown via `CancellationToken`
//!
//! Scene state itself never lives here; the bridge only moves envelopes.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod correlator;
pub mod health;
pub mod heartbeat;
pub mod registry;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use config::BridgeConfig;
pub use correlator::{CommandResult, Correlator, Waiter};
pub use registry::{SceneHandle, SessionRegistry};
pub use relay::RelayBroker;
pub use server::BridgeServer;
