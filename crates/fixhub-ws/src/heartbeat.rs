//! Push connection liveness.
//!
//! Sends a WebSocket ping after a quiet interval and treats a missing pong
//! within the timeout as a dead connection.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Beat {
    last_ping: Option<Instant>,
    last_activity: Instant,
    awaiting_pong: bool,
}

/// Tracks ping/pong timing and inbound activity for one connection.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    beat: Mutex<Beat>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            beat: Mutex::new(Beat {
                last_ping: None,
                last_activity: Instant::now(),
                awaiting_pong: false,
            }),
        }
    }

    /// Forget previous timings (called on every new connection).
    pub fn reset(&self) {
        let mut beat = self.beat.lock();
        beat.last_ping = None;
        beat.last_activity = Instant::now();
        beat.awaiting_pong = false;
    }

    pub fn record_ping(&self) {
        let mut beat = self.beat.lock();
        beat.last_ping = Some(Instant::now());
        beat.awaiting_pong = true;
    }

    pub fn record_pong(&self) {
        let mut beat = self.beat.lock();
        beat.awaiting_pong = false;
        beat.last_activity = Instant::now();
        if let Some(ping) = beat.last_ping {
            debug!(rtt_ms = ping.elapsed().as_millis() as u64, "Pong received");
        }
    }

    /// Any inbound frame counts as activity.
    pub fn record_activity(&self) {
        self.beat.lock().last_activity = Instant::now();
    }

    pub fn is_timed_out(&self) -> bool {
        let beat = self.beat.lock();
        match (beat.awaiting_pong, beat.last_ping) {
            (true, Some(ping)) => ping.elapsed() > self.timeout,
            _ => false,
        }
    }

    /// A ping is due when the line has been quiet for a full interval and
    /// no ping is outstanding.
    pub fn should_ping(&self) -> bool {
        let beat = self.beat.lock();
        !beat.awaiting_pong && beat.last_activity.elapsed() >= self.interval
    }

    /// Sleep until the next check.
    pub async fn tick(&self) {
        tokio::time::sleep(self.check_period()).await;
    }

    fn check_period(&self) -> Duration {
        (self.interval / 2).min(self.timeout).max(Duration::from_millis(10))
    }
}
