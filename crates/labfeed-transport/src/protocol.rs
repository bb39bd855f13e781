//! Pusher protocol 7 framing.
//!
//! Every frame is a JSON object with an `event` name, an optional `channel`
//! and a `data` member. Servers send `data` as a JSON-encoded string; some
//! self-hosted servers send the object itself, so both are accepted.

use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use labfeed_config::BroadcastConfig;
use labfeed_protocols::{ChannelKey, TransportError};

pub const PROTOCOL_VERSION: u8 = 7;
pub const CLIENT_NAME: &str = "labfeed-rs";

const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
const ERROR: &str = "pusher:error";
const PING: &str = "pusher:ping";
const PONG: &str = "pusher:pong";

/// Build the WebSocket endpoint for an application key.
///
/// Without a configured host this is the hosted cluster endpoint
/// `ws-{cluster}.pusher.com`.
pub fn endpoint_url(config: &BroadcastConfig) -> Result<Url, TransportError> {
    let scheme = if config.force_tls { "wss" } else { "ws" };
    let host = match config.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => host.to_string(),
        None => format!("ws-{}.pusher.com", config.cluster.trim()),
    };
    let port = config
        .port
        .unwrap_or(if config.force_tls { 443 } else { 80 });

    let base = format!("{scheme}://{host}:{port}/app/");
    let mut url = Url::parse(&base)
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid endpoint {base}: {e}")))?;

    url.path_segments_mut()
        .map_err(|_| TransportError::ConnectionFailed(format!("invalid endpoint {base}")))?
        .pop_if_empty()
        .push(&config.app_key);

    url.query_pairs_mut()
        .append_pair("protocol", &PROTOCOL_VERSION.to_string())
        .append_pair("client", CLIENT_NAME)
        .append_pair("version", env!("CARGO_PKG_VERSION"))
        .append_pair("flash", "false");

    Ok(url)
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Subscribe(ChannelKey),
    Unsubscribe(ChannelKey),
    Ping,
    Pong,
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        let frame = match self {
            Self::Subscribe(channel) => json!({
                "event": "pusher:subscribe",
                "data": { "channel": channel.as_str() },
            }),
            Self::Unsubscribe(channel) => json!({
                "event": "pusher:unsubscribe",
                "data": { "channel": channel.as_str() },
            }),
            Self::Ping => json!({ "event": PING, "data": {} }),
            Self::Pong => json!({ "event": PONG, "data": {} }),
        };
        frame.to_string()
    }
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    ConnectionEstablished {
        socket_id: String,
        activity_timeout: Option<u64>,
    },
    SubscriptionSucceeded {
        channel: String,
    },
    Ping,
    Pong,
    Error {
        code: Option<u16>,
        message: String,
    },
    /// Application event published on a channel. `data` is the decoded
    /// payload text.
    ChannelEvent {
        channel: String,
        event: String,
        data: String,
    },
    /// Protocol frames this client has no use for.
    Other {
        event: String,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct Established {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorData {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| protocol_error(e.to_string()))?;
        let data = decode_data(raw.data);

        let frame = match raw.event.as_str() {
            CONNECTION_ESTABLISHED => {
                let established: Established = serde_json::from_str(&data)
                    .map_err(|e| protocol_error(format!("invalid connection_established data: {e}")))?;
                Self::ConnectionEstablished {
                    socket_id: established.socket_id,
                    activity_timeout: established.activity_timeout,
                }
            }
            SUBSCRIPTION_SUCCEEDED => Self::SubscriptionSucceeded {
                channel: raw.channel.unwrap_or_default(),
            },
            PING => Self::Ping,
            PONG => Self::Pong,
            ERROR => {
                let error: ErrorData = serde_json::from_str(&data)
                    .map_err(|e| protocol_error(format!("invalid error data: {e}")))?;
                Self::Error {
                    code: error.code,
                    message: error.message.unwrap_or_default(),
                }
            }
            event if event.starts_with("pusher:") || event.starts_with("pusher_internal:") => {
                Self::Other { event: raw.event }
            }
            _ => match raw.channel {
                Some(channel) => Self::ChannelEvent {
                    channel,
                    event: raw.event,
                    data,
                },
                None => Self::Other { event: raw.event },
            },
        };
        Ok(frame)
    }
}

fn decode_data(data: Option<Value>) -> String {
    match data {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn protocol_error(message: String) -> TransportError {
    TransportError::Protocol {
        code: None,
        message,
    }
}

/// What the connection does after a `pusher:error` or close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Stop; the session is not retried automatically.
    Fatal,
    /// Reconnect after the backoff delay.
    Backoff,
    /// Reconnect at once.
    Immediate,
    /// Log and carry on.
    Ignore,
}

pub fn classify(code: u16) -> ErrorAction {
    match code {
        4000..=4099 => ErrorAction::Fatal,
        4100..=4199 => ErrorAction::Backoff,
        4200..=4299 => ErrorAction::Immediate,
        _ => ErrorAction::Ignore,
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
