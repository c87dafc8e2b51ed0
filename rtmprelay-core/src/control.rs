//! Control request parsing and dispatch
//!
//! Requests arrive as JSON objects carrying a `request` field. Every
//! outcome, success or failure, becomes a JSON response object here so the
//! host never sees a bare error.

use crate::error::{ErrorBody, RelayError, Result};
use crate::session::{SessionStore, StreamContext};
use crate::types::SessionHandle;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Request kinds understood by the relay
pub const SUPPORTED_REQUESTS: &[&str] = &["start", "stop"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Start { url: String },
    Stop,
}

impl ControlRequest {
    /// Validate the shape of `message` and extract the request.
    pub fn parse(message: Option<&Value>) -> Result<Self> {
        let Some(message) = message else {
            return Err(RelayError::not_an_object("No message"));
        };
        let Some(body) = message.as_object() else {
            return Err(RelayError::not_an_object("JSON error: not an object"));
        };

        let request = string_field(body, "request")?;
        match request.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start {
                url: string_field(body, "url")?.to_string(),
            }),
            "stop" => Ok(Self::Stop),
            _ => Err(RelayError::UnknownRequest(request.to_string())),
        }
    }
}

fn string_field<'a>(body: &'a serde_json::Map<String, Value>, field: &str) -> Result<&'a str> {
    match body.get(field) {
        None => Err(RelayError::missing_element(field)),
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(RelayError::invalid_element(field, "a string")),
    }
}

/// Outcome of a streaming request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "streaming", rename_all = "lowercase")]
pub enum StreamingReply {
    Started { audio_port: u16, video_port: u16 },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Streaming(StreamingReply),
    Error(ErrorBody),
}

impl ControlResponse {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<RelayError> for ControlResponse {
    fn from(err: RelayError) -> Self {
        Self::Error(err.to_body())
    }
}

/// Route one control message for `handle` and shape the response.
pub async fn dispatch(
    store: &SessionStore,
    handle: &SessionHandle,
    message: Option<&Value>,
    ctx: StreamContext<'_>,
) -> ControlResponse {
    match process(store, handle, message, ctx).await {
        Ok(reply) => ControlResponse::Streaming(reply),
        Err(e) => {
            warn!(session = %handle, code = e.code(), "Request failed: {e}");
            e.into()
        }
    }
}

async fn process(
    store: &SessionStore,
    handle: &SessionHandle,
    message: Option<&Value>,
    ctx: StreamContext<'_>,
) -> Result<StreamingReply> {
    store.ensure_ready()?;
    let session = store.lookup(handle).ok_or(RelayError::NoSession)?;

    let request = ControlRequest::parse(message)?;
    debug!(session = %handle, ?request, "Handling request");

    match request {
        ControlRequest::Start { url } => {
            let ports = session.start(&url, ctx).await?;
            Ok(StreamingReply::Started {
                audio_port: ports.audio,
                video_port: ports.video,
            })
        }
        ControlRequest::Stop => {
            session.stop().await?;
            Ok(StreamingReply::Stopped)
        }
    }
}
