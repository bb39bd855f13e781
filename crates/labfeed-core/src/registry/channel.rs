//! Channel registry implementation.
//!
//! A key's transport subscription lives exactly as long as the key has at
//! least one listener. Open and close signals are emitted while the map
//! entry for the key is locked, so signals for one key are never reordered.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use labfeed_protocols::{ChannelKey, FeedError, Listener, SubscriptionSink};

struct Registration {
    id: u64,
    listener: Arc<dyn Listener>,
}

/// Registry of listeners per channel key.
pub struct ChannelRegistry {
    channels: DashMap<ChannelKey, Vec<Registration>>,
    sink: Arc<dyn SubscriptionSink>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ChannelRegistry {
    /// Create a registry that reports subscription changes to `sink`.
    pub fn new(sink: Arc<dyn SubscriptionSink>) -> Self {
        Self {
            channels: DashMap::new(),
            sink,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a listener for a channel key.
    ///
    /// The first listener for a key opens its transport subscription.
    /// Returns `RegistryClosed` after [`close`](Self::close) and
    /// `InvalidChannelKey` for a blank key.
    pub fn subscribe(
        self: &Arc<Self>,
        channel: ChannelKey,
        listener: Arc<dyn Listener>,
    ) -> Result<SubscriptionHandle, FeedError> {
        if self.is_closed() {
            return Err(FeedError::RegistryClosed);
        }
        if channel.is_blank() {
            return Err(FeedError::InvalidChannelKey(channel.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration { id, listener };

        // `close` flips the flag before it walks the map, so checking it
        // under the entry lock means either it sees this key or we see the flag.
        let entry = self.channels.entry(channel.clone());
        if self.is_closed() {
            return Err(FeedError::RegistryClosed);
        }
        match entry {
            Entry::Occupied(mut entry) => entry.get_mut().push(registration),
            Entry::Vacant(entry) => {
                debug!(channel = %channel, "Opening channel");
                self.sink.open(&channel);
                entry.insert(vec![registration]);
            }
        }

        Ok(SubscriptionHandle {
            registry: Arc::downgrade(self),
            channel,
            id,
            released: AtomicBool::new(false),
        })
    }

    /// Release a subscription. Same as [`SubscriptionHandle::release`].
    ///
    /// Handles issued by another registry are left untouched.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if !std::ptr::eq(handle.registry.as_ptr(), self) {
            debug!(channel = %handle.channel, "Ignoring handle from another registry");
            return;
        }
        handle.release();
    }

    /// Listeners for a key in registration order.
    ///
    /// This is a snapshot: listeners may release handles, including their
    /// own, while the caller iterates it.
    pub fn listeners_for(&self, channel: &ChannelKey) -> Vec<Arc<dyn Listener>> {
        self.channels
            .get(channel)
            .map(|entry| entry.iter().map(|r| Arc::clone(&r.listener)).collect())
            .unwrap_or_default()
    }

    /// Keys that currently hold at least one listener.
    pub fn active_channels(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.channels.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn listener_count(&self, channel: &ChannelKey) -> usize {
        self.channels.get(channel).map(|e| e.len()).unwrap_or(0)
    }

    /// Refuse new subscriptions and close every open channel.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for channel in self.active_channels() {
            if let Some((channel, _)) = self.channels.remove(&channel) {
                debug!(channel = %channel, "Closing channel");
                self.sink.close(&channel);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn remove(&self, channel: &ChannelKey, id: u64) {
        if let Entry::Occupied(mut entry) = self.channels.entry(channel.clone()) {
            entry.get_mut().retain(|r| r.id != id);
            if entry.get().is_empty() {
                debug!(channel = %channel, "Closing channel");
                self.sink.close(channel);
                entry.remove();
            }
        }
    }
}

/// A live (channel key, listener) registration.
///
/// Dropping the handle releases it. Releasing is idempotent and safe to do
/// from inside a listener.
#[must_use = "dropping a SubscriptionHandle releases the subscription"]
pub struct SubscriptionHandle {
    registry: Weak<ChannelRegistry>,
    channel: ChannelKey,
    id: u64,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &ChannelKey {
        &self.channel
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Remove the listener. Only the first call has any effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.channel, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
