//! Connection Manager.
//!
//! A single [`ConnectionWorker`] task owns the socket. Everything else holds a
//! [`ConnectionHandle`] and talks to the worker over an unbounded command
//! queue, so subscribing or unsubscribing never waits on the network.
//!
//! The worker keeps the set of channels that should be subscribed. Each
//! successful handshake subscribes that whole set, which is how a dropped
//! connection gets all of its channels back without caller involvement.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use labfeed_config::Config;
use labfeed_protocols::{ChannelKey, InboundHandler, SubscriptionSink, TransportError};

use crate::backoff::Backoff;
use crate::connector::{Connector, FrameSink, Session};
use crate::protocol::{classify, endpoint_url, ErrorAction, InboundFrame, OutboundFrame};
use crate::state::ConnectionState;

/// Stand-in for timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug)]
enum Command {
    Open(ChannelKey),
    Close(ChannelKey),
    Connect,
    Disconnect,
    Shutdown,
}

/// Cloneable handle to a running [`ConnectionWorker`].
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Start a session if none is running.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// End the current session. The channel set is kept and is subscribed
    /// again on the next `connect` or newly opened channel.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Stop the worker for good.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every published state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            debug!(command = ?e.0, "Connection worker has stopped, dropping command");
        }
    }
}

impl SubscriptionSink for ConnectionHandle {
    fn open(&self, channel: &ChannelKey) {
        self.send(Command::Open(channel.clone()));
    }

    fn close(&self, channel: &ChannelKey) {
        self.send(Command::Close(channel.clone()));
    }
}

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Transport dropped; reconnect after backoff.
    Dropped,
    /// Server asked for an immediate reconnect.
    Immediate,
    /// Server rejected the session; stay disconnected.
    Fatal,
    /// Disconnect or shutdown was requested.
    Stopped,
}

enum Attempt {
    Established(Session, Option<u64>),
    Failed(TransportError),
    Fatal(TransportError),
    Interrupted,
}

/// Owner of the broadcast connection.
pub struct ConnectionWorker {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    channels: BTreeSet<ChannelKey>,
    active: bool,
    shutdown: bool,
}

impl ConnectionWorker {
    /// Create a worker and the handle that drives it. Nothing happens until
    /// the worker is run and a channel is opened or `connect` is called.
    pub fn new(config: Arc<Config>, connector: Arc<dyn Connector>) -> (Self, ConnectionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let backoff = Backoff::from_config(&config.reconnect);

        let worker = Self {
            config,
            connector,
            backoff,
            commands: command_rx,
            state: state_tx,
            channels: BTreeSet::new(),
            active: false,
            shutdown: false,
        };
        let handle = ConnectionHandle {
            commands: command_tx,
            state: state_rx,
        };
        (worker, handle)
    }

    /// Run the worker on the current Tokio runtime.
    pub fn spawn(self, handler: Arc<dyn InboundHandler>) -> JoinHandle<()> {
        tokio::spawn(self.run(handler))
    }

    /// Process commands and inbound traffic until shutdown or until every
    /// handle is dropped. Channel events are passed to `handler` one at a
    /// time, in the order the transport delivered them.
    pub async fn run(mut self, handler: Arc<dyn InboundHandler>) {
        let url = match endpoint_url(&self.config.broadcast) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Cannot build broadcast endpoint");
                return;
            }
        };

        loop {
            while !self.shutdown && !self.active {
                let command = self.commands.recv().await;
                self.apply(command);
            }
            if self.shutdown {
                break;
            }

            self.maintain(&url, handler.as_ref()).await;
            self.publish(ConnectionState::Disconnected);
        }

        self.publish(ConnectionState::Disconnected);
        debug!("Connection worker stopped");
    }

    fn running(&self) -> bool {
        self.active && !self.shutdown
    }

    fn apply(&mut self, command: Option<Command>) {
        match command {
            Some(Command::Open(channel)) => {
                self.channels.insert(channel);
                self.active = true;
            }
            Some(Command::Close(channel)) => {
                self.channels.remove(&channel);
            }
            Some(Command::Connect) => self.active = true,
            Some(Command::Disconnect) => {
                info!("Disconnect requested");
                self.active = false;
            }
            Some(Command::Shutdown) | None => {
                self.shutdown = true;
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Keep a session alive until it is stopped or fails fatally.
    async fn maintain(&mut self, url: &Url, handler: &dyn InboundHandler) {
        let mut failures: u32 = 0;
        let mut dropped = false;

        while self.running() {
            self.publish(if dropped {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });

            match self.attempt(url).await {
                Attempt::Established(session, server_timeout) => {
                    failures = 0;
                    match self.drive(session, server_timeout, handler).await {
                        SessionEnd::Dropped => {
                            dropped = true;
                            failures = 1;
                        }
                        SessionEnd::Immediate => {
                            dropped = true;
                            continue;
                        }
                        SessionEnd::Fatal => {
                            self.active = false;
                            return;
                        }
                        SessionEnd::Stopped => return,
                    }
                }
                Attempt::Failed(e) => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "Connection attempt failed");
                    if !dropped {
                        self.publish(ConnectionState::Disconnected);
                    }
                }
                Attempt::Fatal(e) => {
                    error!(error = %e, "Broadcast service rejected the connection");
                    self.active = false;
                    return;
                }
                Attempt::Interrupted => return,
            }

            let delay = self.backoff.delay_for_attempt(failures.saturating_sub(1));
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            if !self.wait(delay).await {
                return;
            }
        }
    }

    /// Sleep for `delay` while still accepting commands. Returns false if
    /// the session was stopped in the meantime.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = deadline_after(delay);
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return self.running(),
                command = self.commands.recv() => {
                    self.apply(command);
                    if !self.running() {
                        return false;
                    }
                }
            }
        }
    }

    /// One connection attempt: transport handshake followed by
    /// `pusher:connection_established`, bounded by the connect timeout.
    async fn attempt(&mut self, url: &Url) -> Attempt {
        let timeout = self.config.connection.connect_timeout();
        let connector = Arc::clone(&self.connector);
        let handshake = tokio::time::timeout(timeout, async move {
            let mut session = connector.connect(url).await?;
            let activity_timeout = await_established(&mut session).await?;
            Ok::<_, TransportError>((session, activity_timeout))
        });
        tokio::pin!(handshake);

        loop {
            tokio::select! {
                result = &mut handshake => {
                    return match result {
                        Ok(Ok((session, activity_timeout))) => {
                            Attempt::Established(session, activity_timeout)
                        }
                        Ok(Err(e)) if e.code().map(classify) == Some(ErrorAction::Fatal) => {
                            Attempt::Fatal(e)
                        }
                        Ok(Err(e)) => Attempt::Failed(e),
                        Err(_) => Attempt::Failed(TransportError::HandshakeTimeout {
                            timeout_secs: timeout.as_secs(),
                        }),
                    };
                }
                command = self.commands.recv() => {
                    self.apply(command);
                    if !self.running() {
                        return Attempt::Interrupted;
                    }
                }
            }
        }
    }

    /// Serve an established session until it ends.
    async fn drive(
        &mut self,
        session: Session,
        server_timeout: Option<u64>,
        handler: &dyn InboundHandler,
    ) -> SessionEnd {
        let Session {
            mut sink,
            mut stream,
        } = session;

        let configured = self.config.connection.activity_timeout();
        let activity = server_timeout
            .map(|secs| Duration::from_secs(secs).min(configured))
            .unwrap_or(configured);
        let pong_timeout = self.config.connection.pong_timeout();

        self.publish(ConnectionState::Connected);

        let channels: Vec<ChannelKey> = self.channels.iter().cloned().collect();
        for channel in channels {
            if let Err(e) = send(&mut sink, OutboundFrame::Subscribe(channel)).await {
                warn!(error = %e, "Failed to subscribe after connect");
                return SessionEnd::Dropped;
            }
        }

        let mut deadline = deadline_after(activity);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let frame = match command {
                        Some(Command::Open(channel)) => {
                            self.active = true;
                            self.channels
                                .insert(channel.clone())
                                .then_some(OutboundFrame::Subscribe(channel))
                        }
                        Some(Command::Close(channel)) => self
                            .channels
                            .remove(&channel)
                            .then_some(OutboundFrame::Unsubscribe(channel)),
                        Some(Command::Connect) => None,
                        other => {
                            self.apply(other);
                            if let Err(e) = sink.close().await {
                                debug!(error = %e, "Error closing session");
                            }
                            return SessionEnd::Stopped;
                        }
                    };
                    if let Some(frame) = frame {
                        if let Err(e) = send(&mut sink, frame).await {
                            warn!(error = %e, "Connection lost while sending");
                            return SessionEnd::Dropped;
                        }
                    }
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => return on_transport_error(e),
                        None => {
                            warn!("Connection closed by server");
                            return SessionEnd::Dropped;
                        }
                    };
                    deadline = deadline_after(activity);
                    awaiting_pong = false;

                    match InboundFrame::parse(&text) {
                        Ok(frame) => {
                            if let Some(end) = self.on_frame(frame, &mut sink, handler).await {
                                return end;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring unreadable frame"),
                    }
                }
                _ = sleep_until(deadline) => {
                    if awaiting_pong {
                        let e = TransportError::PongTimeout {
                            timeout_secs: pong_timeout.as_secs(),
                        };
                        warn!(error = %e, "Heartbeat failed");
                        return SessionEnd::Dropped;
                    }
                    if let Err(e) = send(&mut sink, OutboundFrame::Ping).await {
                        warn!(error = %e, "Connection lost while sending ping");
                        return SessionEnd::Dropped;
                    }
                    awaiting_pong = true;
                    deadline = deadline_after(pong_timeout);
                }
            }
        }
    }

    async fn on_frame(
        &mut self,
        frame: InboundFrame,
        sink: &mut FrameSink,
        handler: &dyn InboundHandler,
    ) -> Option<SessionEnd> {
        match frame {
            InboundFrame::ChannelEvent {
                channel,
                event,
                data,
            } => {
                let key = ChannelKey::new(channel);
                if self.channels.contains(&key) {
                    handler.handle(&key, &event, &data);
                } else {
                    debug!(channel = %key, event = %event, "Ignoring event for inactive channel");
                }
                None
            }
            InboundFrame::Ping => match send(sink, OutboundFrame::Pong).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "Connection lost while sending pong");
                    Some(SessionEnd::Dropped)
                }
            },
            InboundFrame::Pong => None,
            InboundFrame::SubscriptionSucceeded { channel } => {
                info!(channel = %channel, "Subscription succeeded");
                None
            }
            InboundFrame::Error { code, message } => match code.map(classify) {
                Some(ErrorAction::Fatal) => {
                    error!(code = ?code, message = %message, "Broadcast service closed the session");
                    Some(SessionEnd::Fatal)
                }
                Some(ErrorAction::Backoff) => {
                    warn!(code = ?code, message = %message, "Reconnecting after backoff");
                    Some(SessionEnd::Dropped)
                }
                Some(ErrorAction::Immediate) => {
                    warn!(code = ?code, message = %message, "Reconnecting immediately");
                    Some(SessionEnd::Immediate)
                }
                Some(ErrorAction::Ignore) | None => {
                    warn!(code = ?code, message = %message, "Broadcast service reported an error");
                    None
                }
            },
            InboundFrame::ConnectionEstablished { socket_id, .. } => {
                debug!(socket_id = %socket_id, "Ignoring repeated connection_established");
                None
            }
            InboundFrame::Other { event } => {
                debug!(event = %event, "Ignoring protocol frame");
                None
            }
        }
    }
}

/// Read frames until the server confirms the connection. Returns the
/// server's activity timeout.
async fn await_established(session: &mut Session) -> Result<Option<u64>, TransportError> {
    while let Some(text) = session.stream.next().await {
        match InboundFrame::parse(&text?)? {
            InboundFrame::ConnectionEstablished {
                socket_id,
                activity_timeout,
            } => {
                info!(socket_id = %socket_id, "Connection established");
                return Ok(activity_timeout);
            }
            InboundFrame::Error { code, message } => {
                return Err(TransportError::Protocol { code, message });
            }
            other => debug!(frame = ?other, "Ignoring frame before handshake"),
        }
    }
    Err(TransportError::Closed {
        code: None,
        reason: "connection closed during handshake".to_string(),
    })
}

/// `now + timeout`, saturating at [`FAR_FUTURE`] when the sum does not fit.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

async fn send(sink: &mut FrameSink, frame: OutboundFrame) -> Result<(), TransportError> {
    let text = frame.to_json();
    debug!(frame = %text, "Sending frame");
    sink.send(text).await
}

fn on_transport_error(error: TransportError) -> SessionEnd {
    match error.code().map(classify) {
        Some(ErrorAction::Fatal) => {
            error!(error = %error, "Broadcast service closed the session");
            SessionEnd::Fatal
        }
        Some(ErrorAction::Immediate) => {
            warn!(error = %error, "Reconnecting immediately");
            SessionEnd::Immediate
        }
        _ => {
            warn!(error = %error, "Connection lost");
            SessionEnd::Dropped
        }
    }
}
