//! Request/response envelopes and boundary validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command request as it travels issuer → bridge → scene.
///
/// The bridge forwards the envelope verbatim; `type` and `params` are opaque
/// to everything except the scene-side dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// Target session; omitted means the well-known default session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Caller-generated correlation token, unique per connection.
    pub request_id: String,
    /// Command name (e.g. `create_entity`), opaque to the relay.
    #[serde(rename = "type")]
    pub command: String,
    /// Command-specific parameters, opaque to the relay.
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Binary outcome of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Command succeeded; `result` is present.
    Ok,
    /// Command failed; `message` is present.
    Error,
}

/// A command response as it travels scene → bridge → issuer.
///
/// `request_id` is optional only so rejections of payloads that carried no
/// extractable id can share the shape; every routed response echoes the id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Echoed correlation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Whether the command succeeded.
    pub status: ResponseStatus,
    /// Result payload (present on `ok`, may be an empty object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Human-readable failure message (present on `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandRequest {
    /// The effective target session, defaulting the omitted case.
    pub fn session(&self) -> &str {
        self.session_id.as_deref().unwrap_or(prism_core::DEFAULT_SESSION)
    }

    /// Parse and validate one inbound text frame as a request.
    ///
    /// Returns [`EnvelopeError`] carrying the extracted `requestId` (when one
    /// was present) so the rejection can still echo it.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| EnvelopeError::new(format!("invalid JSON: {e}"), None))?;
        if !value.is_object() {
            return Err(EnvelopeError::new("payload is not an object", None));
        }

        let request_id = value
            .get("requestId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let Some(request_id) = request_id else {
            return Err(EnvelopeError::new("commands must include requestId", None));
        };

        let has_type = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if !has_type {
            return Err(EnvelopeError::new(
                "commands must include a type",
                Some(request_id),
            ));
        }

        serde_json::from_value(value)
            .map_err(|e| EnvelopeError::new(format!("invalid command: {e}"), Some(request_id)))
    }
}

impl CommandResponse {
    /// Build a success response.
    pub fn ok(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: Some(request_id.into()),
            status: ResponseStatus::Ok,
            result: Some(result),
            message: None,
        }
    }

    /// Build an error response echoing a request id.
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            status: ResponseStatus::Error,
            result: None,
            message: Some(message.into()),
        }
    }

    /// Build an error response for a payload that carried no usable id.
    pub fn error_untracked(message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            status: ResponseStatus::Error,
            result: None,
            message: Some(message.into()),
        }
    }

    /// Whether the response reports success.
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Parse one inbound text frame as a response.
    ///
    /// Responses missing a `requestId` cannot be correlated and are rejected.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let resp: Self = serde_json::from_str(text)
            .map_err(|e| EnvelopeError::new(format!("invalid JSON: {e}"), None))?;
        if resp.request_id.as_deref().is_none_or(str::is_empty) {
            return Err(EnvelopeError::new("responses must include requestId", None));
        }
        Ok(resp)
    }

    /// Serialize to the single-frame wire form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Value-only fields cannot fail to serialize; keep a fallback anyway.
            r#"{"status":"error","message":"response serialization failed"}"#.to_owned()
        })
    }
}

/// Boundary rejection of a malformed frame.
#[derive(Clone, Debug)]
pub struct EnvelopeError {
    /// What is wrong with the payload.
    pub reason: String,
    /// The `requestId` extracted from the payload, when present, so the
    /// rejection can echo it.
    pub request_id: Option<String>,
}

impl EnvelopeError {
    fn new(reason: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            reason: reason.into(),
            request_id,
        }
    }

    /// The error envelope to send back for this rejection.
    pub fn to_response(&self) -> CommandResponse {
        match &self.request_id {
            Some(id) => CommandResponse::error(id.clone(), self.reason.clone()),
            None => CommandResponse::error_untracked(self.reason.clone()),
        }
    }
}
