//! The heartbeat driver shared by gateway and voice connections.
//!
//! A connection owns a [`HeartbeatTracker`], which its receiving side feeds with acknowledgements,
//! and runs [`run`] with a [`Heartbeat`] implementation that knows how to put a beat on the wire.
//! If a beat is still unacknowledged when the next one is due, the connection is considered stale
//! and the driver returns the error provided by [`Heartbeat::stale`].

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::Result;

/// Something able to send a single heartbeat.
#[async_trait]
pub trait Heartbeat: Send {
    /// Sends one beat.
    async fn beat(&mut self) -> Result<()>;

    /// The error reported when a beat went unacknowledged for a whole interval.
    fn stale(&self) -> crate::Error;
}

#[derive(Debug, Default)]
struct Beats {
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    awaiting_ack: bool,
    latency: Option<Duration>,
}

/// Timestamps of the last heartbeat sent and acknowledged on one connection.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    beats: Mutex<Beats>,
}

impl HeartbeatTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a heartbeat as sent; it must be acknowledged before the next one is due.
    pub fn record_sent(&self) {
        let mut beats = self.beats.lock();
        beats.last_sent = Some(Instant::now());
        beats.awaiting_ack = true;
    }

    /// Marks the outstanding heartbeat as acknowledged, updating the latency.
    pub fn record_ack(&self) {
        let now = Instant::now();
        let mut beats = self.beats.lock();

        if beats.awaiting_ack {
            beats.latency = beats.last_sent.map(|sent| now.saturating_duration_since(sent));
        }

        beats.last_ack = Some(now);
        beats.awaiting_ack = false;
    }

    /// Whether the last heartbeat sent has not been acknowledged yet.
    #[must_use]
    pub fn is_awaiting_ack(&self) -> bool {
        self.beats.lock().awaiting_ack
    }

    /// The round trip of the last acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.beats.lock().latency
    }

    #[must_use]
    pub fn last_sent(&self) -> Option<Instant> {
        self.beats.lock().last_sent
    }

    #[must_use]
    pub fn last_ack(&self) -> Option<Instant> {
        self.beats.lock().last_ack
    }

    /// Forgets every timestamp, for a fresh connection.
    pub fn reset(&self) {
        *self.beats.lock() = Beats::default();
    }
}

/// Sends a heartbeat every `interval`, the first one after `first_delay`.
///
/// Returns `Ok(())` once `stop` is cancelled. Returns an error if a send fails or if the previous
/// beat was not acknowledged by the time the next one is due.
///
/// # Errors
///
/// See above.
pub async fn run<H>(
    mut heart: H,
    tracker: &HeartbeatTracker,
    interval: Duration,
    first_delay: Duration,
    stop: &CancellationToken,
) -> Result<()>
where
    H: Heartbeat,
{
    let mut ticker = interval_at(Instant::now() + first_delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => return Ok(()),
            _ = ticker.tick() => {},
        }

        if tracker.is_awaiting_ack() {
            warn!("Heartbeat not acknowledged within {:?}", interval);
            return Err(heart.stale());
        }

        tracker.record_sent();
        heart.beat().await?;
        trace!("Heartbeat sent");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::gateway::GatewayError;
    use crate::Error;

    struct CountingHeart {
        beats: Arc<AtomicUsize>,
        tracker: Option<Arc<HeartbeatTracker>>,
    }

    #[async_trait]
    impl Heartbeat for CountingHeart {
        async fn beat(&mut self) -> Result<()> {
            self.beats.fetch_add(1, Ordering::SeqCst);

            if let Some(tracker) = &self.tracker {
                tracker.record_ack();
            }

            Ok(())
        }

        fn stale(&self) -> Error {
            Error::Gateway(GatewayError::HeartbeatStale)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_beat_goes_stale_after_one_interval() {
        let tracker = HeartbeatTracker::new();
        let beats = Arc::new(AtomicUsize::new(0));
        let heart = CountingHeart {
            beats: Arc::clone(&beats),
            tracker: None,
        };
        let stop = CancellationToken::new();
        let start = Instant::now();

        let result =
            run(heart, &tracker, Duration::from_secs(40), Duration::from_secs(5), &stop).await;

        assert!(matches!(result, Err(Error::Gateway(GatewayError::HeartbeatStale))));
        assert_eq!(beats.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_beats_keep_running_until_stopped() {
        let tracker = Arc::new(HeartbeatTracker::new());
        let beats = Arc::new(AtomicUsize::new(0));
        let heart = CountingHeart {
            beats: Arc::clone(&beats),
            tracker: Some(Arc::clone(&tracker)),
        };
        let stop = CancellationToken::new();

        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(105)).await;
            stopper.cancel();
        });

        let result = run(heart, &tracker, Duration::from_secs(10), Duration::ZERO, &stop).await;

        assert!(result.is_ok());
        assert_eq!(beats.load(Ordering::SeqCst), 11);
        assert!(!tracker.is_awaiting_ack());
    }

    #[tokio::test(start_paused = true)]
    async fn ack_resets_staleness_and_measures_latency() {
        let tracker = HeartbeatTracker::new();

        tracker.record_sent();
        assert!(tracker.is_awaiting_ack());

        tokio::time::advance(Duration::from_millis(120)).await;
        tracker.record_ack();

        assert!(!tracker.is_awaiting_ack());
        assert_eq!(tracker.latency(), Some(Duration::from_millis(120)));

        tracker.reset();
        assert_eq!(tracker.latency(), None);
        assert!(tracker.last_sent().is_none());
    }
}
