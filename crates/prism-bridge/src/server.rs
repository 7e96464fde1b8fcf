//! Axum server exposing the bridge: `/ws` for both peer roles, `/health`.
//!
//! Every socket must hand-shake within the configured deadline before any
//! command traffic. Scenes get bound into the session registry and their
//! frames flow into the connection's correlator; issuers get each request
//! relayed on its own task so one slow command never blocks the next.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::{Json, Response};
use axum::routing::get;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prism_protocol::{CommandRequest, Handshake, HandshakeAck, PeerRole, close};

use crate::config::BridgeConfig;
use crate::connection::{OUTBOUND_BUFFER, PeerConnection};
use crate::correlator::Correlator;
use crate::health::{self, HealthResponse};
use crate::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::registry::{SceneHandle, SessionRegistry};
use crate::relay::RelayBroker;
use crate::shutdown::ShutdownCoordinator;

/// Shared state for axum handlers and connection tasks.
#[derive(Clone)]
pub struct AppState {
    /// Routing component.
    pub relay: Arc<RelayBroker>,
    /// Session bindings.
    pub registry: Arc<SessionRegistry>,
    /// Shutdown fan-out.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: BridgeConfig,
    /// When the server started.
    pub start_time: Instant,
    /// Live connection count (both roles).
    connections: Arc<AtomicUsize>,
    /// Monotonic connection identity source.
    next_conn_id: Arc<AtomicU64>,
}

/// The bridge server.
pub struct BridgeServer {
    state: AppState,
}

impl BridgeServer {
    /// Create a server from config, with fresh routing state.
    pub fn new(config: BridgeConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let relay = Arc::new(RelayBroker::new(
            registry.clone(),
            config.response_timeout(),
        ));
        Self {
            state: AppState {
                relay,
                registry,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config,
                start_time: Instant::now(),
                connections: Arc::new(AtomicUsize::new(0)),
                next_conn_id: Arc::new(AtomicU64::new(1)),
            },
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
    }

    /// Bind the configured address and start serving.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "bridge listening");

        let app = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned());
            if let Err(err) = serve.await {
                warn!(error = %err, "bridge server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    /// Live connection count.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.load(Ordering::Relaxed),
        state.registry.active_sessions(),
    ))
}

/// GET /ws — WebSocket upgrade for both peer roles.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(state, socket))
}

type WsSink = SplitSink<WebSocket, Message>;
type WsSource = SplitStream<WebSocket>;

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut source) = socket.split();

    // No command traffic before a completed handshake.
    let handshake = match read_handshake(&mut source, state.config.handshake_timeout()).await {
        Ok(handshake) => handshake,
        Err(failure) => {
            debug!(reason = failure.reason, "handshake rejected");
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: failure.code,
                    reason: failure.reason.into(),
                })))
                .await;
            return;
        }
    };

    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let (out_tx, out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let conn = PeerConnection::new(conn_id, out_tx);

    // Ack before spawning the write task so the ack is the first frame out.
    let ack = match handshake.role {
        PeerRole::Scene => HandshakeAck::ready(handshake.session()),
        PeerRole::Agent => HandshakeAck::ok(),
    };
    let ack_json = serde_json::to_string(&ack).unwrap_or_default();
    if sink.send(Message::Text(ack_json.into())).await.is_err() {
        return;
    }

    let _ = state.connections.fetch_add(1, Ordering::Relaxed);
    let cancel = state.shutdown.token().child_token();
    let writer = tokio::spawn(write_loop(
        sink,
        out_rx,
        state.config.heartbeat_interval(),
        cancel.clone(),
    ));

    let hb = tokio::spawn(watch_liveness(conn.clone(), state.clone(), cancel.clone()));

    match handshake.role {
        PeerRole::Scene => {
            let session_id = handshake.session().to_owned();
            let correlator = Correlator::new();
            state.registry.bind(
                &session_id,
                SceneHandle::new(conn.clone(), correlator.clone()),
            );
            info!(conn_id, session_id, "scene attached");

            scene_read_loop(&state, &conn, &correlator, &mut source).await;

            // Fail-fast policy: a dropped scene immediately fails everything
            // still in flight on it rather than letting deadlines ride out.
            let _ = state.registry.unbind(conn_id);
            correlator.fail_all(&prism_core::RelayError::TransportDropped {
                reason: "scene disconnected".into(),
            });
            info!(conn_id, session_id, "scene detached");
        }
        PeerRole::Agent => {
            info!(conn_id, "issuer attached");
            agent_read_loop(&state, &conn, &mut source).await;
            info!(conn_id, "issuer detached");
        }
    }

    cancel.cancel();
    let _ = state.connections.fetch_sub(1, Ordering::Relaxed);
    hb.abort();
    let _ = writer.await;
}

struct HandshakeFailure {
    code: u16,
    reason: String,
}

/// Read and validate the first frame as a role handshake.
async fn read_handshake(
    source: &mut WsSource,
    deadline: Duration,
) -> Result<Handshake, HandshakeFailure> {
    let frame = tokio::time::timeout(deadline, source.next()).await;
    let message = match frame {
        Err(_elapsed) => {
            return Err(HandshakeFailure {
                code: close::HANDSHAKE_TIMEOUT,
                reason: "handshake timeout".into(),
            });
        }
        Ok(None | Some(Err(_))) => {
            return Err(HandshakeFailure {
                code: close::INVALID_HANDSHAKE,
                reason: "connection closed before handshake".into(),
            });
        }
        Ok(Some(Ok(message))) => message,
    };

    let Message::Text(text) = message else {
        return Err(HandshakeFailure {
            code: close::INVALID_HANDSHAKE,
            reason: "handshake must be a text frame".into(),
        });
    };

    let value: serde_json::Value = serde_json::from_str(text.as_str()).map_err(|_| {
        HandshakeFailure {
            code: close::INVALID_HANDSHAKE,
            reason: "invalid handshake payload".into(),
        }
    })?;

    serde_json::from_value::<Handshake>(value.clone()).map_err(|_| {
        // Distinguish a structurally valid frame with a role we don't know.
        if value.get("role").is_some() {
            HandshakeFailure {
                code: close::UNKNOWN_ROLE,
                reason: "unknown role".into(),
            }
        } else {
            HandshakeFailure {
                code: close::INVALID_HANDSHAKE,
                reason: "handshake missing role".into(),
            }
        }
    })
}

/// Drain queued frames to the socket, interleaving protocol pings.
async fn write_loop(
    mut sink: WsSink,
    mut out_rx: mpsc::Receiver<String>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let mut pings = tokio::time::interval(ping_interval);
    pings.tick().await; // immediate first tick

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            _ = pings.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Close the connection when the peer stops answering pings.
async fn watch_liveness(conn: Arc<PeerConnection>, state: AppState, cancel: CancellationToken) {
    let result = run_heartbeat(
        conn.clone(),
        state.config.heartbeat_interval(),
        state.config.heartbeat_timeout(),
        cancel.clone(),
    )
    .await;
    if result == HeartbeatResult::TimedOut {
        warn!(conn_id = conn.id, "peer stopped answering pings, closing");
        cancel.cancel();
    }
}

/// Scene connections only ever send responses; feed them to the correlator.
async fn scene_read_loop(
    state: &AppState,
    conn: &Arc<PeerConnection>,
    correlator: &Arc<Correlator>,
    source: &mut WsSource,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                conn.mark_alive();
                state.relay.process_scene_frame(correlator, text.as_str());
            }
            Ok(Message::Pong(_)) => conn.mark_alive(),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(conn_id = conn.id, error = %err, "scene socket error");
                break;
            }
        }
    }
}

/// Issuer connections send requests; each is relayed on its own task.
async fn agent_read_loop(state: &AppState, conn: &Arc<PeerConnection>, source: &mut WsSource) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                conn.mark_alive();
                match CommandRequest::parse(text.as_str()) {
                    Ok(request) => {
                        let relay = state.relay.clone();
                        let conn = conn.clone();
                        // Suspends only this request, never the read loop.
                        let _: JoinHandle<()> = tokio::spawn(async move {
                            let response = relay.relay(request).await;
                            let _ = conn.send_response(&response).await;
                        });
                    }
                    Err(rejection) => {
                        // Malformed: answered locally, nothing reaches routing.
                        let _ = conn.send_response(&rejection.to_response()).await;
                    }
                }
            }
            Ok(Message::Pong(_)) => conn.mark_alive(),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(conn_id = conn.id, error = %err, "issuer socket error");
                break;
            }
        }
    }
}
