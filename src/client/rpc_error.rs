use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::client::constants::UNAUTHORIZED;
use crate::client::transport::SenderError;
use crate::error::{request_cancelled, transport_error, unauthorized, PolybaseError};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ServerError>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps a sender failure onto the client error taxonomy.
pub fn map_sender_error(err: SenderError) -> PolybaseError {
    match err {
        SenderError::Cancelled => request_cancelled(),
        SenderError::Status { status, body } => map_status_error(status, body),
        SenderError::Network { message, code } => {
            let error = transport_error(format!("Request failed: {message}"));
            match code {
                Some(code) => error.with_reason(code),
                None => error,
            }
        }
    }
}

fn map_status_error(status: u16, body: Option<JsonValue>) -> PolybaseError {
    let payload = body.as_ref().and_then(extract_error_payload);
    let message = payload
        .as_ref()
        .and_then(|payload| payload.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("Request failed with status {status}"));

    let mut error = if status == UNAUTHORIZED {
        unauthorized(message)
    } else {
        transport_error(message).with_status(status)
    };
    if let Some(reason) = payload.and_then(|payload| payload.reason) {
        error = error.with_reason(reason);
    }
    match body {
        Some(body) => error.with_body(body),
        None => error,
    }
}

fn extract_error_payload(body: &JsonValue) -> Option<ServerError> {
    serde_json::from_value::<ErrorBody>(body.clone())
        .ok()
        .and_then(|parsed| parsed.error)
}
