//! Command registry and async dispatch.
//!
//! The relay treats commands as opaque `(type, params)` pairs; this registry
//! is where they stop being opaque. Handlers are registered by name and each
//! dispatch produces exactly one response envelope, including for unknown
//! commands and handler timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use prism_protocol::{CommandRequest, CommandResponse};

/// Error returned by a command handler.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// The command ran and failed.
    #[error("{message}")]
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

impl CommandError {
    /// Convenience constructor for parameter validation failures.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Convenience constructor for execution failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Trait implemented by every scene command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute the command with its params.
    async fn handle(&self, params: Value) -> Result<Value, CommandError>;
}

/// Registry mapping command names to handlers.
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    /// Maximum time a single handler is allowed to run.
    ///
    /// Longer than any sane bridge-side response timeout, so the bridge
    /// deadline is what issuers actually observe.
    const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry with the built-in `ping` liveness command.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ping", PingHandler);
        registry
    }

    /// Register a handler for a command name.
    pub fn register(&mut self, command: &str, handler: impl CommandHandler + 'static) {
        let _ = self.handlers.insert(command.to_owned(), Arc::new(handler));
    }

    /// Dispatch one request to its handler, producing the response envelope.
    pub async fn dispatch(&self, request: CommandRequest) -> CommandResponse {
        let Some(handler) = self.handlers.get(&request.command) else {
            warn!(command = request.command, "unknown command");
            return CommandResponse::error(
                request.request_id,
                format!("unknown command '{}'", request.command),
            );
        };

        let result =
            tokio::time::timeout(Self::HANDLER_TIMEOUT, handler.handle(request.params)).await;

        match result {
            Ok(Ok(value)) => CommandResponse::ok(request.request_id, value),
            Ok(Err(err)) => CommandResponse::error(request.request_id, err.to_string()),
            Err(_elapsed) => {
                warn!(command = request.command, "handler timed out");
                CommandResponse::error(
                    request.request_id,
                    format!("handler for '{}' timed out", request.command),
                )
            }
        }
    }

    /// List all registered command names (sorted).
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a command is registered.
    pub fn has_command(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in liveness probe.
struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, _params: Value) -> Result<Value, CommandError> {
        Ok(json!({ "alive": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, params: Value) -> Result<Value, CommandError> {
            Ok(params)
        }
    }

    struct FailHandler;

    #[async_trait]
    impl CommandHandler for FailHandler {
        async fn handle(&self, _params: Value) -> Result<Value, CommandError> {
            Err(CommandError::failed("boom"))
        }
    }

    fn request(id: &str, command: &str, params: Value) -> CommandRequest {
        CommandRequest {
            session_id: None,
            request_id: id.into(),
            command: command.into(),
            params,
        }
    }

    #[tokio::test]
    async fn dispatch_success_echoes_request_id() {
        let mut registry = CommandRegistry::new();
        registry.register("echo", EchoHandler);

        let resp = registry
            .dispatch(request("r1", "echo", json!({"v": 1})))
            .await;
        assert!(resp.is_ok());
        assert_eq!(resp.request_id.as_deref(), Some("r1"));
        assert_eq!(resp.result.unwrap()["v"], 1);
    }

    #[tokio::test]
    async fn dispatch_unknown_command() {
        let registry = CommandRegistry::new();
        let resp = registry.dispatch(request("r2", "no_such", json!({}))).await;
        assert!(!resp.is_ok());
        assert_eq!(resp.request_id.as_deref(), Some("r2"));
        assert!(resp.message.unwrap().contains("no_such"));
    }

    #[tokio::test]
    async fn dispatch_handler_failure() {
        let mut registry = CommandRegistry::new();
        registry.register("fail", FailHandler);

        let resp = registry.dispatch(request("r3", "fail", json!({}))).await;
        assert!(!resp.is_ok());
        assert_eq!(resp.message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn invalid_params_message_passes_through() {
        struct StrictHandler;

        #[async_trait]
        impl CommandHandler for StrictHandler {
            async fn handle(&self, params: Value) -> Result<Value, CommandError> {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CommandError::invalid_params("missing 'name'"))?;
                Ok(json!({ "hello": name }))
            }
        }

        let mut registry = CommandRegistry::new();
        registry.register("greet", StrictHandler);

        let resp = registry.dispatch(request("r4", "greet", json!({}))).await;
        assert_eq!(resp.message.as_deref(), Some("missing 'name'"));

        let resp = registry
            .dispatch(request("r5", "greet", json!({"name": "sam"})))
            .await;
        assert_eq!(resp.result.unwrap()["hello"], "sam");
    }

    #[tokio::test]
    async fn builtin_ping_answers() {
        let registry = CommandRegistry::with_builtins();
        assert!(registry.has_command("ping"));

        let resp = registry.dispatch(request("r6", "ping", json!({}))).await;
        assert!(resp.is_ok());
        assert_eq!(resp.result.unwrap()["alive"], true);
    }

    #[tokio::test]
    async fn commands_sorted() {
        let mut registry = CommandRegistry::new();
        registry.register("b", EchoHandler);
        registry.register("a", EchoHandler);
        assert_eq!(registry.commands(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn register_overwrites_previous() {
        let mut registry = CommandRegistry::new();
        registry.register("cmd", EchoHandler);
        registry.register("cmd", FailHandler);

        let resp = registry.dispatch(request("r7", "cmd", json!({}))).await;
        assert!(!resp.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        struct SlowHandler;

        #[async_trait]
        impl CommandHandler for SlowHandler {
            async fn handle(&self, _params: Value) -> Result<Value, CommandError> {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(json!({}))
            }
        }

        let mut registry = CommandRegistry::new();
        registry.register("slow", SlowHandler);

        let resp = registry.dispatch(request("r8", "slow", json!({}))).await;
        assert!(!resp.is_ok());
        assert!(resp.message.unwrap().contains("timed out"));
    }

    #[test]
    fn default_registry_is_empty() {
        let registry = CommandRegistry::default();
        assert!(registry.commands().is_empty());
        assert!(!registry.has_command("ping"));
    }
}
