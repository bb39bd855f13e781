//! Feed client.
//!
//! [`FeedClient`] is the single entry point consumers use: it validates the
//! configuration, starts the connection worker and exposes subscribe,
//! unsubscribe and the advisory lock query.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use labfeed_config::{Config, ConfigValidator};
use labfeed_protocols::{
    ChannelKey, EventEnvelope, FeedError, Listener, ListenerError, PatientId,
};
use labfeed_transport::{ConnectionHandle, ConnectionState, ConnectionWorker, Connector, WsConnector};

use crate::dispatcher::{Dispatcher, StatsSnapshot};
use crate::lock::LockCoordinator;
use crate::registry::{ChannelRegistry, SubscriptionHandle};

/// Client for the real-time clinical event feed.
///
/// # Example
///
/// ```rust,ignore
/// let client = FeedClient::new(Config::new(app_key, "eu"))?;
/// let handle = client.subscribe(ChannelKey::visit(42), |envelope: &EventEnvelope| {
///     println!("result {} for visit {}", envelope.result.id, envelope.visit_id());
///     Ok(())
/// })?;
/// // ...
/// client.unsubscribe(handle);
/// client.shutdown().await;
/// ```
pub struct FeedClient {
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<Dispatcher>,
    connection: ConnectionHandle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FeedClient {
    /// Create a client that connects over WebSocket.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`FeedError::Config`] when the configuration does not validate or no
    /// runtime is available.
    pub fn new(config: Config) -> Result<Self, FeedError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a client with a custom transport connector.
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self, FeedError> {
        let validation = ConfigValidator::validate(&config);
        for warning in &validation.warnings {
            warn!(path = %warning.path, "{}", warning.message);
        }
        if !validation.is_valid() {
            return Err(FeedError::Config(validation.error_summary()));
        }

        let runtime = Handle::try_current().map_err(|_| {
            FeedError::Config("FeedClient must be created inside a Tokio runtime".to_string())
        })?;

        let (worker, connection) = ConnectionWorker::new(Arc::new(config), connector);
        let registry = Arc::new(ChannelRegistry::new(Arc::new(connection.clone())));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            Arc::new(LockCoordinator::new()),
        ));

        let task = runtime.spawn(worker.run(dispatcher.clone()));
        info!("Feed client started");

        Ok(Self {
            registry,
            dispatcher,
            connection,
            worker: Mutex::new(Some(task)),
        })
    }

    /// Subscribe a closure to a channel key.
    pub fn subscribe<F>(
        &self,
        channel: impl Into<ChannelKey>,
        listener: F,
    ) -> Result<SubscriptionHandle, FeedError>
    where
        F: Fn(&EventEnvelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.subscribe_listener(channel, Arc::new(listener))
    }

    /// Subscribe a shared listener to a channel key. Starts the connection
    /// if it is not running.
    pub fn subscribe_listener(
        &self,
        channel: impl Into<ChannelKey>,
        listener: Arc<dyn Listener>,
    ) -> Result<SubscriptionHandle, FeedError> {
        let handle = self.registry.subscribe(channel.into(), listener)?;
        self.connection.connect();
        Ok(handle)
    }

    /// Release a subscription.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.registry.unsubscribe(&handle);
    }

    /// Advisory lock state for a patient.
    ///
    /// This mirrors the most recent envelope seen for the patient and is a
    /// hint for the UI only. The REST record decides whether a result can be
    /// edited.
    pub fn is_locked(&self, patient: PatientId) -> Option<bool> {
        self.dispatcher.locks().is_locked(patient)
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    /// End the current session. Subscriptions are kept and come back on
    /// the next `connect` or subscribe.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats()
    }

    pub fn active_channels(&self) -> Vec<ChannelKey> {
        self.registry.active_channels()
    }

    /// Close the registry and stop the connection worker. Later
    /// subscriptions fail with [`FeedError::RegistryClosed`].
    pub async fn shutdown(&self) {
        self.registry.close();
        self.connection.shutdown();

        let task = self.worker.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection worker ended abnormally");
            }
            info!("Feed client stopped");
        }
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.registry.close();
        self.connection.shutdown();
    }
}
