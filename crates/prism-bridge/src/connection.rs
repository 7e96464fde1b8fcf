//! Per-socket connection state shared between the read loop, the relay, and
//! the heartbeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use prism_protocol::CommandResponse;

/// Buffer size of the per-connection outbound channel.
pub const OUTBOUND_BUFFER: usize = 64;

/// One connected peer (issuer or scene).
///
/// Frames queued here are drained by the connection's write task; identity is
/// the numeric `id`, which the registry uses to tell a superseded connection
/// from the current one.
pub struct PeerConnection {
    /// Unique connection identity (monotonic per server).
    pub id: u64,
    /// Outbound frames to the write task.
    tx: mpsc::Sender<String>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the peer has responded since the last liveness check.
    pub is_alive: AtomicBool,
    /// When the last pong (or any activity) was seen.
    last_pong: Mutex<Instant>,
    /// Frames dropped because the peer stopped draining its channel.
    dropped_frames: AtomicU64,
}

impl PeerConnection {
    /// Create a connection wrapping the write task's channel.
    pub fn new(id: u64, tx: mpsc::Sender<String>) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        })
    }

    /// Queue a text frame for the peer.
    ///
    /// Returns `false` once the write task is gone (socket closed). A full
    /// channel is waited out rather than dropped: losing a response frame
    /// would turn into a spurious issuer-side timeout.
    pub async fn send(&self, frame: String) -> bool {
        if self.tx.send(frame).await.is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a response envelope.
    pub async fn send_response(&self, response: &CommandResponse) -> bool {
        self.send(response.to_json()).await
    }

    /// Total frames that could not be delivered.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or traffic received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last sign of life.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for the heartbeat loop.
    ///
    /// Returns `true` if the peer was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
