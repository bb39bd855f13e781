//! In-memory broadcast server for connection tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use labfeed_config::Config;
use labfeed_protocols::{ChannelKey, InboundHandler, TransportError};
use labfeed_transport::{ConnectionHandle, ConnectionState, Connector, Session};

pub const WAIT: Duration = Duration::from_secs(5);

/// Server side of one scripted session.
pub struct ServerEnd {
    pub incoming: fmpsc::UnboundedReceiver<String>,
    pub outgoing: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ServerEnd {
    pub fn push(&self, frame: Value) {
        self.outgoing.unbounded_send(Ok(frame.to_string())).unwrap();
    }

    pub fn close_with(&self, code: u16) {
        self.outgoing
            .unbounded_send(Err(TransportError::Closed {
                code: Some(code),
                reason: "closed by test".to_string(),
            }))
            .unwrap();
    }

    /// Next frame the client sent, parsed.
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.incoming.next())
            .await
            .expect("no frame from client")
            .expect("client closed the session");
        serde_json::from_str(&text).unwrap()
    }
}

/// Connector that hands every session's server end to the test.
pub struct ScriptedConnector {
    sessions: mpsc::UnboundedSender<ServerEnd>,
    fail_next: AtomicU32,
    connects: AtomicU32,
    activity_timeout: u64,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::with_activity_timeout(120)
    }

    pub fn with_activity_timeout(
        activity_timeout: u64,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sessions: tx,
            fail_next: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            activity_timeout,
        });
        (connector, rx)
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Session, TransportError> {
        assert!(url.path().starts_with("/app/"));
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::ConnectionFailed("connection refused".to_string()));
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, TransportError>>();

        let established = json!({
            "event": "pusher:connection_established",
            "data": json!({
                "socket_id": "1234.5678",
                "activity_timeout": self.activity_timeout,
            }).to_string(),
        });
        server_tx.unbounded_send(Ok(established.to_string())).unwrap();

        let _ = self.sessions.send(ServerEnd {
            incoming: server_rx,
            outgoing: server_tx,
        });

        let sink = client_tx.sink_map_err(|e| TransportError::SendFailed(e.to_string()));
        Ok(Session::new(Box::pin(sink), Box::pin(client_rx)))
    }
}

/// Handler that forwards every channel event to the test.
pub struct ForwardingHandler {
    tx: mpsc::UnboundedSender<(ChannelKey, String, String)>,
}

impl ForwardingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(ChannelKey, String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl InboundHandler for ForwardingHandler {
    fn handle(&self, channel: &ChannelKey, event: &str, payload: &str) {
        let _ = self
            .tx
            .send((channel.clone(), event.to_string(), payload.to_string()));
    }
}

pub fn test_config() -> Arc<Config> {
    let mut config = Config::new("test-key", "mt1");
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config.reconnect.jitter = 0.0;
    Arc::new(config)
}

pub async fn next_session(sessions: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(WAIT, sessions.recv())
        .await
        .expect("no connection attempt")
        .expect("connector dropped")
}

pub async fn wait_for_state(handle: &ConnectionHandle, state: ConnectionState) {
    let mut changes = handle.state_changes();
    tokio::time::timeout(WAIT, changes.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .expect("worker stopped");
}

pub fn channel_event(channel: &str, event: &str, data: &str) -> Value {
    json!({ "event": event, "channel": channel, "data": data })
}
