//! Bridge client — thin multiplexed layer over `tokio-tungstenite`.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use prism_core::RequestId;
use prism_protocol::{CommandRequest, CommandResponse, Handshake, HandshakeAck, ResponseStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Result slot for one in-flight send.
type PendingTx = oneshot::Sender<Result<Value, ClientError>>;

/// Buffer between callers and the connection task.
const COMMAND_BUFFER: usize = 64;

/// Configuration for a bridge client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Bridge WebSocket endpoint.
    pub bridge_url: String,
    /// Session to address; `None` targets the well-known default session.
    pub session_id: Option<String>,
    /// Connection-establishment (and ack) deadline in seconds.
    pub connect_timeout_secs: u64,
    /// Default per-request deadline in seconds.
    pub response_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bridge_url: "ws://127.0.0.1:8765/ws".into(),
            session_id: None,
            connect_timeout_secs: 5,
            response_timeout_secs: 15,
        }
    }
}

impl ClientConfig {
    /// Connection-establishment deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Default per-request deadline.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// Failures surfaced to issuer-side callers.
///
/// Local timeouts are structurally distinct from bridge- or scene-reported
/// errors so callers can tell "never answered" from "answered with failure".
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not reach the bridge.
    #[error("failed to connect to bridge: {reason}")]
    Connect {
        /// What went wrong.
        reason: String,
    },

    /// The bridge did not accept the connection.
    #[error("bridge rejected connection: {reason}")]
    Handshake {
        /// What went wrong.
        reason: String,
    },

    /// The bridge or scene answered with `status: "error"`.
    #[error("{message}")]
    Rejected {
        /// Error message, passed through unmodified.
        message: String,
    },

    /// No response arrived before the deadline.
    #[error("timed out waiting for response to '{command}'")]
    Timeout {
        /// The command that went unanswered.
        command: String,
    },

    /// The connection (or its background task) is gone.
    #[error("connection to bridge closed")]
    Closed,
}

enum ClientCommand {
    Send {
        frame: String,
        request_id: String,
        response_tx: PendingTx,
    },
    Cancel {
        request_id: String,
    },
}

/// Persistent, multiplexed connection to the bridge.
#[derive(Debug)]
pub struct BridgeClient {
    config: ClientConfig,
    cmd_tx: mpsc::Sender<ClientCommand>,
    _handler: JoinHandle<()>,
}

impl BridgeClient {
    /// Connect, hand-shake as an issuer, and start the connection task.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let connect = connect_async(config.bridge_url.as_str());
        let (mut ws, _response) = tokio::time::timeout(config.connect_timeout(), connect)
            .await
            .map_err(|_| ClientError::Connect {
                reason: format!("timed out connecting to {}", config.bridge_url),
            })?
            .map_err(|err| ClientError::Connect {
                reason: err.to_string(),
            })?;

        let hello =
            serde_json::to_string(&Handshake::agent()).map_err(|err| ClientError::Handshake {
                reason: err.to_string(),
            })?;
        ws.send(Message::Text(hello.into()))
            .await
            .map_err(|err| ClientError::Handshake {
                reason: err.to_string(),
            })?;
        await_ack(&mut ws, config.connect_timeout()).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let handler = tokio::spawn(connection_loop(ws, cmd_rx));

        debug!(bridge_url = config.bridge_url, "connected to bridge");
        Ok(Self {
            config,
            cmd_tx,
            _handler: handler,
        })
    }

    /// Send a command with the default timeout and a fresh request id.
    pub async fn send(&self, command: &str, params: Value) -> Result<Value, ClientError> {
        self.send_with_timeout(command, params, self.config.response_timeout())
            .await
    }

    /// Send a command with an explicit timeout.
    pub async fn send_with_timeout(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let request = CommandRequest {
            session_id: self.config.session_id.clone(),
            request_id: RequestId::new().into_inner(),
            command: command.to_owned(),
            params,
        };
        self.send_request(request, timeout).await
    }

    /// Send a fully formed request envelope (caller controls id and session).
    pub async fn send_request(
        &self,
        request: CommandRequest,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let command = request.command.clone();
        let request_id = request.request_id.clone();
        let frame = serde_json::to_string(&request).map_err(|err| ClientError::Rejected {
            message: format!("unserializable request: {err}"),
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::Send {
                frame,
                request_id: request_id.clone(),
                response_tx,
            })
            .await
            .map_err(|_| ClientError::Closed)?;

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_dropped)) => Err(ClientError::Closed),
            Err(_elapsed) => {
                // Local cancellation: remove the slot so a late response is
                // dropped instead of piling up.
                let _ = self
                    .cmd_tx
                    .send(ClientCommand::Cancel { request_id })
                    .await;
                Err(ClientError::Timeout { command })
            }
        }
    }

    /// This client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Wait for the bridge's handshake ack.
async fn await_ack(ws: &mut WsStream, deadline: Duration) -> Result<(), ClientError> {
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .map_err(|_| ClientError::Handshake {
                reason: "timed out waiting for bridge acknowledgement".into(),
            })?;

        match frame {
            Some(Ok(Message::Text(text))) => {
                let ack: HandshakeAck = serde_json::from_str(text.as_str()).map_err(|err| {
                    ClientError::Handshake {
                        reason: format!("invalid ack: {err}"),
                    }
                })?;
                return if ack.accepted() {
                    Ok(())
                } else {
                    Err(ClientError::Handshake {
                        reason: ack
                            .message
                            .unwrap_or_else(|| "bridge rejected connection".to_owned()),
                    })
                };
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                return Err(ClientError::Handshake {
                    reason: err.to_string(),
                });
            }
            None => {
                return Err(ClientError::Handshake {
                    reason: "connection closed during handshake".into(),
                });
            }
        }
    }
}

/// Connection task: sends frames, routes responses back by request id.
async fn connection_loop(ws: WsStream, mut cmd_rx: mpsc::Receiver<ClientCommand>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<String, PendingTx> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send { frame, request_id, response_tx }) => {
                        let _ = pending.insert(request_id, response_tx);
                        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(ClientCommand::Cancel { request_id }) => {
                        let _ = pending.remove(&request_id);
                    }
                    None => break,
                }
            }
            frame = ws_rx.next() => {
                let Some(Ok(message)) = frame else { break };
                let Message::Text(text) = message else { continue };
                let Ok(response) = CommandResponse::parse(text.as_str()) else {
                    warn!("discarding malformed bridge frame");
                    continue;
                };
                let request_id = response.request_id.clone().unwrap_or_default();
                let Some(tx) = pending.remove(&request_id) else {
                    // Already timed out locally, or never ours: drop it.
                    debug!(request_id, "dropping response for unknown request id");
                    continue;
                };
                let outcome = match response.status {
                    ResponseStatus::Ok => {
                        Ok(response.result.unwrap_or_else(|| Value::Object(Default::default())))
                    }
                    ResponseStatus::Error => Err(ClientError::Rejected {
                        message: response
                            .message
                            .unwrap_or_else(|| "bridge reported an error".to_owned()),
                    }),
                };
                let _ = tx.send(outcome);
            }
        }
    }

    // The socket is gone; every caller still waiting gets a terminal error.
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ClientError::Closed));
    }
}
