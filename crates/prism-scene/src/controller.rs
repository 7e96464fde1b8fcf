//! The scene's attachment loop: connect, announce, serve, back off, repeat.
//!
//! State machine: `Disconnected → Connecting → Announcing → Attached`, back
//! to `Disconnected` on any transport drop, from any state. The loop never
//! terminates on its own; only the cancellation token stops it. A response
//! whose connection is gone by the time it is ready is simply lost — the
//! issuer observes that as a timeout, not a distinguishable error.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prism_core::BackoffConfig;
use prism_protocol::{CommandRequest, Handshake, HandshakeAck};

use crate::registry::CommandRegistry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Buffer for responses awaiting the write half.
const RESPONSE_BUFFER: usize = 64;

/// Configuration for a scene's bridge attachment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneConfig {
    /// Bridge WebSocket endpoint.
    pub bridge_url: String,
    /// Session identity this scene announces.
    pub session_id: String,
    /// Connection-establishment (and ack) deadline in seconds.
    pub connect_timeout_secs: u64,
    /// Reconnect backoff parameters.
    pub backoff: BackoffConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            bridge_url: "ws://127.0.0.1:8765/ws".into(),
            session_id: prism_core::DEFAULT_SESSION.into(),
            connect_timeout_secs: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SceneConfig {
    /// Connection-establishment deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where the attachment loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    /// Not connected; waiting out backoff or not yet started.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake sent, waiting for the ack.
    Announcing,
    /// Steady state: serving commands.
    Attached,
}

impl ControllerState {
    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Announcing => "announcing",
            Self::Attached => "attached",
        }
    }
}

/// Errors from one attach attempt.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// Could not open the transport.
    #[error("failed to connect to bridge: {reason}")]
    Connect {
        /// What went wrong.
        reason: String,
    },

    /// Handshake exchange failed mechanically.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// What went wrong.
        reason: String,
    },

    /// The bridge refused the handshake.
    #[error("bridge rejected handshake: {message}")]
    Rejected {
        /// Bridge-supplied reason.
        message: String,
    },

    /// Transport error before reaching steady state.
    #[error("transport error: {reason}")]
    Transport {
        /// What went wrong.
        reason: String,
    },
}

/// Keeps one scene attached to the bridge and serving commands.
pub struct SceneController {
    config: SceneConfig,
    registry: Arc<CommandRegistry>,
    state_tx: watch::Sender<ControllerState>,
}

impl SceneController {
    /// Create a controller over a command registry.
    pub fn new(config: SceneConfig, registry: CommandRegistry) -> Self {
        let (state_tx, _) = watch::channel(ControllerState::Disconnected);
        Self {
            config,
            registry: Arc::new(registry),
            state_tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    /// The attachment loop. Runs until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(ControllerState::Connecting);
            let failed = match self.attach_once(&cancel).await {
                Ok(()) => {
                    // Was attached and dropped; backoff restarts from base.
                    attempt = 0;
                    false
                }
                Err(err) => {
                    warn!(error = %err, attempt, "attach attempt failed");
                    true
                }
            };
            self.set_state(ControllerState::Disconnected);

            if cancel.is_cancelled() {
                break;
            }

            let delay =
                Duration::from_millis(self.config.backoff.delay_ms(attempt, rand::random()));
            if failed {
                attempt = attempt.saturating_add(1);
            }
            debug!(?delay, "reconnecting after backoff");

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ControllerState::Disconnected);
    }

    /// One connect → announce → serve cycle.
    ///
    /// `Ok(())` means the scene reached `Attached` and the connection later
    /// ended (drop or shutdown); errors mean it never got that far.
    async fn attach_once(&self, cancel: &CancellationToken) -> Result<(), SceneError> {
        let connect = connect_async(self.config.bridge_url.as_str());
        let (ws, _response) = tokio::time::timeout(self.config.connect_timeout(), connect)
            .await
            .map_err(|_| SceneError::Connect {
                reason: format!("timed out connecting to {}", self.config.bridge_url),
            })?
            .map_err(|err| SceneError::Connect {
                reason: err.to_string(),
            })?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        self.set_state(ControllerState::Announcing);
        let hello = serde_json::to_string(&Handshake::scene(&self.config.session_id)).map_err(
            |err| SceneError::Handshake {
                reason: err.to_string(),
            },
        )?;
        ws_tx
            .send(Message::Text(hello.into()))
            .await
            .map_err(|err| SceneError::Transport {
                reason: err.to_string(),
            })?;
        self.await_ready(&mut ws_rx).await?;

        self.set_state(ControllerState::Attached);
        info!(session_id = self.config.session_id, "attached to bridge");

        self.serve(ws_tx, ws_rx, cancel).await;
        Ok(())
    }

    /// Wait for the bridge's `ready` ack. No commands are processed before
    /// this completes.
    async fn await_ready(&self, ws_rx: &mut WsSource) -> Result<(), SceneError> {
        loop {
            let frame = tokio::time::timeout(self.config.connect_timeout(), ws_rx.next())
                .await
                .map_err(|_| SceneError::Handshake {
                    reason: "timed out waiting for handshake ack".into(),
                })?;

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let ack: HandshakeAck =
                        serde_json::from_str(text.as_str()).map_err(|err| {
                            SceneError::Handshake {
                                reason: format!("invalid ack: {err}"),
                            }
                        })?;
                    return if ack.accepted() {
                        Ok(())
                    } else {
                        Err(SceneError::Rejected {
                            message: ack
                                .message
                                .unwrap_or_else(|| "handshake rejected".to_owned()),
                        })
                    };
                }
                Some(Ok(_)) => {} // pings etc. before the ack
                Some(Err(err)) => {
                    return Err(SceneError::Transport {
                        reason: err.to_string(),
                    });
                }
                None => {
                    return Err(SceneError::Transport {
                        reason: "connection closed during handshake".into(),
                    });
                }
            }
        }
    }

    /// Steady state: dispatch each request on its own task, write responses
    /// as they complete.
    async fn serve(&self, mut ws_tx: WsSink, mut ws_rx: WsSource, cancel: &CancellationToken) {
        let (out_tx, mut out_rx) = mpsc::channel::<String>(RESPONSE_BUFFER);

        loop {
            tokio::select! {
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.dispatch_frame(text.as_str(), &out_tx);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("bridge closed the connection");
                            return;
                        }
                        // Ping/pong handled by the protocol layer.
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "transport dropped");
                            return;
                        }
                    }
                }
                Some(frame) = out_rx.recv() => {
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        // Response lost with the connection; the issuer sees
                        // a timeout.
                        return;
                    }
                }
                () = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    }

    /// Hand one inbound frame to the registry; responses may complete out of
    /// arrival order.
    fn dispatch_frame(&self, text: &str, out_tx: &mpsc::Sender<String>) {
        match CommandRequest::parse(text) {
            Ok(request) => {
                debug!(
                    request_id = request.request_id,
                    command = request.command,
                    "dispatching"
                );
                let registry = self.registry.clone();
                let out = out_tx.clone();
                drop(tokio::spawn(async move {
                    let response = registry.dispatch(request).await;
                    let _ = out.send(response.to_json()).await;
                }));
            }
            Err(rejection) => {
                warn!(reason = rejection.reason, "rejecting malformed request");
                let _ = out_tx.try_send(rejection.to_response().to_json());
            }
        }
    }

    fn set_state(&self, state: ControllerState) {
        if *self.state_tx.borrow() != state {
            debug!(state = state.as_str(), "controller state");
        }
        // send_replace updates the value even with no subscribers.
        let _ = self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(url: &str) -> SceneConfig {
        SceneConfig {
            bridge_url: url.into(),
            session_id: "test".into(),
            connect_timeout_secs: 1,
            backoff: BackoffConfig {
                base_delay_ms: 10,
                max_delay_ms: 40,
                jitter_factor: 0.0,
            },
        }
    }

    #[test]
    fn config_defaults() {
        let config = SceneConfig::default();
        assert_eq!(config.bridge_url, "ws://127.0.0.1:8765/ws");
        assert_eq!(config.session_id, "default");
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.backoff.base_delay_ms, 500);
    }

    #[test]
    fn config_serde_fills_defaults() {
        let config: SceneConfig =
            serde_json::from_str(r#"{"sessionId":"lab"}"#).unwrap();
        assert_eq!(config.session_id, "lab");
        assert_eq!(config.bridge_url, "ws://127.0.0.1:8765/ws");
    }

    #[test]
    fn starts_disconnected() {
        let controller =
            SceneController::new(SceneConfig::default(), CommandRegistry::with_builtins());
        assert_eq!(controller.state(), ControllerState::Disconnected);
    }

    #[test]
    fn state_labels() {
        assert_eq!(ControllerState::Disconnected.as_str(), "disconnected");
        assert_eq!(ControllerState::Connecting.as_str(), "connecting");
        assert_eq!(ControllerState::Announcing.as_str(), "announcing");
        assert_eq!(ControllerState::Attached.as_str(), "attached");
    }

    #[tokio::test]
    async fn cancelled_before_start_exits_immediately() {
        let controller = SceneController::new(
            fast_config("ws://127.0.0.1:1/ws"),
            CommandRegistry::with_builtins(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        controller.run(cancel).await;
        assert_eq!(controller.state(), ControllerState::Disconnected);
    }

    #[tokio::test]
    async fn keeps_retrying_until_cancelled() {
        // Nothing listens on port 1; every attempt fails fast.
        let controller = Arc::new(SceneController::new(
            fast_config("ws://127.0.0.1:1/ws"),
            CommandRegistry::with_builtins(),
        ));
        let mut states = controller.watch_state();
        let cancel = CancellationToken::new();

        let runner = {
            let controller = controller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(cancel).await })
        };

        // Observe at least two Connecting transitions: the loop retries
        // rather than giving up.
        let mut connecting_seen = 0;
        while connecting_seen < 2 {
            states.changed().await.unwrap();
            if *states.borrow() == ControllerState::Connecting {
                connecting_seen += 1;
            }
        }

        cancel.cancel();
        runner.await.unwrap();
        assert_eq!(controller.state(), ControllerState::Disconnected);
    }

    #[tokio::test]
    async fn attach_to_nothing_reports_connect_error() {
        let controller = SceneController::new(
            fast_config("ws://127.0.0.1:1/ws"),
            CommandRegistry::with_builtins(),
        );
        let err = controller
            .attach_once(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SceneError::Connect { .. }));
    }
}
