//! Transport connectors.
//!
//! A [`Connector`] opens one WebSocket session and exposes it as a sink and
//! a stream of text frames. The worker only ever sees these two halves, so
//! tests can replace the network with in-memory channels.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

use labfeed_protocols::TransportError;

/// Outbound half of a session.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a session. A close frame surfaces as
/// [`TransportError::Closed`] carrying the close code.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open transport session.
pub struct Session {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Session {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens transport sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the transport-level handshake. The application key is part of
    /// `url` and is not retained after the call.
    async fn connect(&self, url: &Url) -> Result<Session, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Session, TransportError> {
        debug!(host = ?url.host_str(), "Opening WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (ws_sink, ws_source) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = ws_source.filter_map(|msg| future::ready(text_frame(msg)));

        Ok(Session::new(Box::pin(sink), Box::pin(stream)))
    }
}

fn text_frame(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Close(frame)) => Some(Err(TransportError::Closed {
            code: frame.as_ref().map(|f| u16::from(f.code)),
            reason: frame
                .map(|f| f.reason.as_str().to_owned())
                .unwrap_or_default(),
        })),
        // Control frames are answered by tungstenite itself.
        Ok(_) => None,
        Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
    }
}
