//! Dispatcher.
//!
//! Turns raw channel messages into validated envelopes and hands them to the
//! channel's listeners in registration order. Nothing is delivered unless the
//! whole envelope validates. The lock flag is recorded after every listener
//! has run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use labfeed_protocols::{
    ChannelKey, EventEnvelope, InboundHandler, Listener, ListenerError, PayloadError,
};

use crate::lock::LockCoordinator;
use crate::registry::ChannelRegistry;

/// Outcome of delivering one envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned successfully.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Running counters, shared with the client for observability.
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    listener_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub dropped: u64,
    pub listener_failures: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ChannelRegistry>,
    locks: Arc<LockCoordinator>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(registry: Arc<ChannelRegistry>, locks: Arc<LockCoordinator>) -> Self {
        Self {
            registry,
            locks,
            stats: DispatchStats::default(),
        }
    }

    /// Validate `payload` and deliver it to the listeners of `channel`.
    ///
    /// A malformed payload invokes no listener and leaves lock state as it
    /// was.
    pub fn dispatch(
        &self,
        channel: &ChannelKey,
        payload: &str,
    ) -> Result<DispatchReport, PayloadError> {
        let envelope = match EventEnvelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let report = self.deliver(channel, &envelope);
        self.locks.observe(&envelope);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(report)
    }

    /// Invoke every listener of `channel` once, in registration order. A
    /// failing listener does not stop the others.
    pub fn deliver(&self, channel: &ChannelKey, envelope: &EventEnvelope) -> DispatchReport {
        let mut report = DispatchReport::default();

        for listener in self.registry.listeners_for(channel) {
            match invoke(listener.as_ref(), envelope) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        channel = %channel,
                        result_id = envelope.result.id,
                        error = %e,
                        "Listener failed"
                    );
                    report.failed += 1;
                    self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        report
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }
}

impl InboundHandler for Dispatcher {
    fn handle(&self, channel: &ChannelKey, event: &str, payload: &str) {
        match self.dispatch(channel, payload) {
            Ok(report) => debug!(
                channel = %channel,
                event = %event,
                delivered = report.delivered,
                failed = report.failed,
                "Dispatched envelope"
            ),
            Err(e) => warn!(channel = %channel, event = %event, error = %e, "Dropping payload"),
        }
    }
}

fn invoke(listener: &dyn Listener, envelope: &EventEnvelope) -> Result<(), ListenerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(envelope))) {
        Ok(result) => result,
        Err(payload) => Err(ListenerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
