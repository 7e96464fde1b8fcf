//! Request routing: the only component that spans both sides of the bridge.
//!
//! Issuer path: look up the target session, register the request with the
//! scene connection's correlator, forward the envelope verbatim, await the
//! outcome, and answer the issuer with exactly one terminal envelope. A
//! missing session fails fast; the broker never queues for a scene that is
//! not there and never retries on the issuer's behalf.
//!
//! Scene path: resolve the embedded request id against that connection's
//! correlator; unknown or duplicate ids are dropped, not errored back.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use prism_core::RelayError;
use prism_protocol::{CommandRequest, CommandResponse, ResponseStatus};

use crate::correlator::Correlator;
use crate::registry::SessionRegistry;

/// Routes validated request envelopes to scenes and outcomes back to issuers.
pub struct RelayBroker {
    registry: Arc<SessionRegistry>,
    response_timeout: Duration,
}

impl RelayBroker {
    /// Create a broker over a session registry.
    pub fn new(registry: Arc<SessionRegistry>, response_timeout: Duration) -> Self {
        Self {
            registry,
            response_timeout,
        }
    }

    /// The registry this broker routes through.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Relay one validated request and produce the issuer's response.
    ///
    /// Every call yields exactly one envelope: the scene's own `ok`/`error`,
    /// or a locally synthesized error (no session, duplicate id, transport
    /// drop, timeout). Callers run this on its own task so one slow command
    /// never blocks another.
    pub async fn relay(&self, request: CommandRequest) -> CommandResponse {
        let request_id = request.request_id.clone();
        let session = request.session().to_owned();
        counter!("relay_requests_total").increment(1);

        let Some(handle) = self.registry.lookup(&session) else {
            return self.fail(
                &request_id,
                &RelayError::NoActiveSession {
                    session_id: session,
                },
            );
        };

        let waiter = match handle.correlator.register(&request_id, self.response_timeout) {
            Ok(waiter) => waiter,
            Err(err) => return self.fail(&request_id, &err),
        };

        let frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(err) => {
                return self.fail(
                    &request_id,
                    &RelayError::MalformedEnvelope {
                        reason: err.to_string(),
                    },
                );
            }
        };

        // Forward with the same requestId; the waiter's deadline is already
        // armed. If the scene's channel is gone the request fails here and
        // the waiter drop removes the correlator entry.
        if !handle.conn.send(frame).await {
            return self.fail(
                &request_id,
                &RelayError::TransportDropped {
                    reason: "scene disconnected".into(),
                },
            );
        }

        debug!(request_id, session, command = request.command, "forwarded");

        match waiter.wait().await {
            Ok(result) => CommandResponse::ok(request_id, result),
            Err(err) => self.fail(&request_id, &err),
        }
    }

    /// Feed one frame received from a scene connection into its correlator.
    pub fn process_scene_frame(&self, correlator: &Correlator, text: &str) {
        match CommandResponse::parse(text) {
            Ok(response) => {
                // parse() guarantees the id is present.
                let request_id = response.request_id.clone().unwrap_or_default();
                let outcome = match response.status {
                    ResponseStatus::Ok => {
                        Ok(response.result.unwrap_or_else(|| Value::Object(Default::default())))
                    }
                    ResponseStatus::Error => Err(RelayError::ExecutorError {
                        message: response
                            .message
                            .unwrap_or_else(|| "scene reported an error".to_owned()),
                    }),
                };
                correlator.resolve(&request_id, outcome);
            }
            Err(err) => {
                warn!(reason = err.reason, "discarding malformed scene frame");
            }
        }
    }

    fn fail(&self, request_id: &str, err: &RelayError) -> CommandResponse {
        counter!("relay_errors_total", "kind" => err.kind()).increment(1);
        debug!(request_id, kind = err.kind(), "relay failed");
        CommandResponse::error(request_id, err.to_string())
    }
}
