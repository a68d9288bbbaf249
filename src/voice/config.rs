use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::ErrorCallback;
use crate::internal::prelude::*;

/// Configuration for voice calls.
///
/// Every [`Call`] clones the configuration of its [`Manager`] when it is created.
///
/// [`Call`]: super::Call
/// [`Manager`]: super::Manager
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// How long each step of the voice handshake may take.
    ///
    /// Defaults to 10 seconds.
    pub handshake_timeout: Duration,
    /// How long a join waits for Discord to send the voice state and voice server.
    ///
    /// Defaults to 10 seconds.
    pub join_timeout: Duration,
    /// The fixed delay between reconnection attempts of a dropped call.
    ///
    /// Defaults to 1 second.
    pub reconnect_delay: Duration,
    /// How many received audio packets are buffered for [`Call::receiver`] before new ones are
    /// dropped.
    ///
    /// Defaults to 64, a little over a second of audio from one speaker.
    ///
    /// [`Call::receiver`]: super::Call::receiver
    pub inbound_queue_capacity: usize,
    /// How many Opus frames [`Call::audio_sender`] can queue before senders wait.
    ///
    /// Defaults to 16.
    ///
    /// [`Call::audio_sender`]: super::Call::audio_sender
    pub outbound_queue_capacity: usize,
    /// The interval of UDP keepalives.
    ///
    /// Defaults to 5 seconds.
    pub udp_keepalive: Duration,
    /// Whether the bot joins muted.
    pub self_mute: bool,
    /// Whether the bot joins deafened.
    pub self_deaf: bool,
    /// Called with the error which ended a connection: once before every reconnect, and once
    /// when a call is disconnected for good.
    pub on_error: Option<ErrorCallback>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("join_timeout", &self.join_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("inbound_queue_capacity", &self.inbound_queue_capacity)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("udp_keepalive", &self.udp_keepalive)
            .field("self_mute", &self.self_mute)
            .field("self_deaf", &self.self_deaf)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            inbound_queue_capacity: 64,
            outbound_queue_capacity: 16,
            udp_keepalive: Duration::from_secs(5),
            self_mute: false,
            self_deaf: false,
            on_error: None,
        }
    }
}

impl Config {
    /// Sets this `Config`'s handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets this `Config`'s join timeout.
    #[must_use]
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Sets this `Config`'s delay between reconnection attempts.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets this `Config`'s inbound queue capacity.
    #[must_use]
    pub fn inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound_queue_capacity = capacity;
        self
    }

    /// Sets this `Config`'s outbound queue capacity.
    #[must_use]
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Sets this `Config`'s UDP keepalive interval.
    #[must_use]
    pub fn udp_keepalive(mut self, interval: Duration) -> Self {
        self.udp_keepalive = interval;
        self
    }

    /// Sets whether calls join muted.
    #[must_use]
    pub fn self_mute(mut self, mute: bool) -> Self {
        self.self_mute = mute;
        self
    }

    /// Sets whether calls join deafened.
    #[must_use]
    pub fn self_deaf(mut self, deaf: bool) -> Self {
        self.self_deaf = deaf;
        self
    }

    /// Sets the callback receiving the errors which end a connection of a call.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}
