//! # prism-core
//!
//! Foundation types shared by every Prism crate:
//!
//! - **Branded IDs**: `RequestId` and `SceneId` as newtypes for type safety
//! - **Errors**: the `RelayError` taxonomy via `thiserror`
//! - **Backoff**: exponential backoff calculation for the reconnect loop

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod ids;

pub use backoff::BackoffConfig;
pub use errors::RelayError;
pub use ids::{RequestId, SceneId};

/// Well-known session identifier used when a deployment runs a single scene.
pub const DEFAULT_SESSION: &str = "default";
