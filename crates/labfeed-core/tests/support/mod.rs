//! Scripted broadcast server for end-to-end client tests.

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
use labfeed_protocols::TransportError;
use labfeed_transport::{Connector, Session};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct ServerEnd {
    pub incoming: fmpsc::UnboundedReceiver<String>,
    pub outgoing: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ServerEnd {
    pub fn push(&self, frame: Value) {
        self.outgoing.unbounded_send(Ok(frame.to_string())).unwrap();
    }

    /// Publish `data` as an application event on `channel`, double encoded
    /// the way the broadcasting service sends it.
    pub fn publish(&self, channel: &str, data: &Value) {
        self.push(json!({
            "event": "SysmexResultInserted",
            "channel": channel,
            "data": data.to_string(),
        }));
    }

    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.incoming.next())
            .await
            .expect("no frame from client")
            .expect("client closed the session");
        serde_json::from_str(&text).unwrap()
    }

    /// Round-trip a server ping so every earlier frame has been handled.
    pub async fn sync(&mut self) {
        self.push(json!({ "event": "pusher:ping", "data": {} }));
        loop {
            if self.next_frame().await["event"] == "pusher:pong" {
                return;
            }
        }
    }
}

pub struct ScriptedConnector {
    sessions: mpsc::UnboundedSender<ServerEnd>,
    connects: AtomicU32,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sessions: tx,
            connects: AtomicU32::new(0),
        });
        (connector, rx)
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &Url) -> Result<Session, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, TransportError>>();

        let established = json!({
            "event": "pusher:connection_established",
            "data": "{\"socket_id\":\"42.42\",\"activity_timeout\":120}",
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

pub fn test_config() -> Config {
    let mut config = Config::new("test-key", "mt1");
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config.reconnect.jitter = 0.0;
    config
}

pub async fn next_session(sessions: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(WAIT, sessions.recv())
        .await
        .expect("no connection attempt")
        .expect("connector dropped")
}

pub fn visit_42_envelope(locked: bool) -> Value {
    json!({
        "sysmexResult": { "id": 1, "doctorvisit_id": 42, "wbc": "6.10", "hgb": 13.4 },
        "doctorVisit": { "id": 42, "patient_id": 7, "created_at": "2024-01-01 09:30:00" },
        "patient": { "id": 7, "name": "A", "result_is_locked": locked }
    })
}
