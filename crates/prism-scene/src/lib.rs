//! # prism-scene
//!
//! The executor side of the relay: everything a scene process needs to serve
//! commands through the bridge.
//!
//! - **Command registry**: named [`CommandHandler`]s dispatched per request,
//!   concurrently and out of order (correlation is by id, not arrival)
//! - **Controller**: the `Disconnected → Connecting → Announcing → Attached`
//!   loop that keeps the scene attached to the bridge across drops, with
//!   bounded exponential backoff
//!
//! Scene state itself (the document being manipulated) lives behind the
//! handlers; this crate only moves envelopes and keeps the connection alive.

#![deny(unsafe_code)]

pub mod controller;
pub mod registry;

pub use controller::{ControllerState, SceneConfig, SceneController};
pub use registry::{CommandError, CommandHandler, CommandRegistry};
