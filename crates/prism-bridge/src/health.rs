//! `/health` endpoint payload.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count (both roles).
    pub connections: usize,
    /// Sessions with a bound scene.
    pub active_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions: sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0);
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn uptime_reflects_start_time() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(120))
            .unwrap();
        let resp = health_check(start, 0, 0);
        assert!(resp.uptime_secs >= 119);
    }

    #[test]
    fn counters_pass_through() {
        let resp = health_check(Instant::now(), 4, 2);
        assert_eq!(resp.connections, 4);
        assert_eq!(resp.active_sessions, 2);
    }

    #[test]
    fn serializes_expected_fields() {
        let resp = health_check(Instant::now(), 1, 1);
        let v: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        assert_eq!(v["status"], "ok");
        assert!(v["uptime_secs"].is_number());
        assert_eq!(v["connections"], 1);
        assert_eq!(v["active_sessions"], 1);
    }
}
