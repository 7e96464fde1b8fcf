//! Ping/pong liveness monitoring for bridge connections.
//!
//! A scene that vanishes without a close frame would otherwise keep its
//! session binding and blackhole every routed request until the per-request
//! deadlines fire; the heartbeat notices the silence and lets the server tear
//! the connection down.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::connection::PeerConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally (connection closed normally).
    Cancelled,
}

/// Watch a connection's alive flag until it goes quiet or the token fires.
///
/// At each `interval` tick the flag (set by the read loop on any pong or
/// traffic) is checked and reset. After `timeout / interval` consecutive
/// silent ticks (at least one) the connection is declared dead.
pub async fn run_heartbeat(
    connection: Arc<PeerConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticks = time::interval(interval);
    // The first tick completes immediately; consume it so the first real
    // check happens one interval in.
    ticks.tick().await;

    let interval_secs = interval.as_secs().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = (timeout.as_secs() / interval_secs).max(1) as u32;
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
                connection.is_alive.store(false, Ordering::Relaxed);
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OUTBOUND_BUFFER;
    use tokio::sync::mpsc;

    fn make_connection() -> Arc<PeerConnection> {
        let (tx, _rx) = mpsc::channel(OUTBOUND_BUFFER);
        PeerConnection::new(1, tx)
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let handle = tokio::spawn(run_heartbeat(
            conn,
            Duration::from_secs(60),
            Duration::from_secs(180),
            child,
        ));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let conn = make_connection();
        conn.is_alive.store(false, Ordering::Relaxed);

        let result = run_heartbeat(
            conn,
            Duration::from_millis(100),
            Duration::from_millis(100),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn max_missed_derives_from_timeout() {
        // timeout 300ms at 100ms intervals: three strikes.
        let conn = make_connection();
        conn.is_alive.store(false, Ordering::Relaxed);

        let start = tokio::time::Instant::now();
        let result = run_heartbeat(
            conn,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
        // First check at 100ms, third strike at 300ms (after the consumed
        // immediate tick).
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn responsive_peer_survives() {
        let conn = make_connection();
        let watched = conn.clone();
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let handle = tokio::spawn(run_heartbeat(
            watched,
            Duration::from_millis(40),
            Duration::from_millis(120),
            child,
        ));

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            conn.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn pong_resets_the_strike_count() {
        let conn = make_connection();
        let watched = conn.clone();
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        // Two strikes allowed; keep marking alive inside every window.
        let handle = tokio::spawn(run_heartbeat(
            watched,
            Duration::from_millis(100),
            Duration::from_millis(200),
            child,
        ));

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            conn.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
