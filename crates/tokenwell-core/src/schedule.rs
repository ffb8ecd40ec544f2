//! Scheduler collaborators for the bounded wait.
//!
//! The registry never owns a loop. A host either drives a [`FrameClock`]
//! from its own frame loop, or hands the wait a free-running
//! [`IntervalTicker`]. Elapsed time is the sum of tick deltas, so a host that
//! stops advancing its clock pauses every pending wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::TickConfig;

/// Something that wakes a waiter once per tick with the time since the
/// previous tick.
#[async_trait]
pub trait TickSource: Send {
    /// Wait for the next tick. `None` means the source is closed and no
    /// further ticks will arrive.
    async fn next_tick(&mut self) -> Option<Duration>;
}

#[async_trait]
impl<S: TickSource + ?Sized> TickSource for Box<S> {
    async fn next_tick(&mut self) -> Option<Duration> {
        (**self).next_tick().await
    }
}

/// Cumulative clock reading published on every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStamp {
    pub frame: u64,
    pub elapsed: Duration,
}

/// Host-driven frame clock.
///
/// The host calls [`advance`](Self::advance) once per frame; every
/// [`FrameTicks`] handed out by [`ticks`](Self::ticks) then wakes with the
/// delta. Cloning yields another handle to the same clock.
#[derive(Clone)]
pub struct FrameClock {
    sender: Arc<watch::Sender<FrameStamp>>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(FrameStamp::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish one frame that took `delta`.
    pub fn advance(&self, delta: Duration) {
        self.sender.send_modify(|stamp| {
            stamp.frame += 1;
            stamp.elapsed = stamp.elapsed.saturating_add(delta);
        });
    }

    pub fn now(&self) -> FrameStamp {
        *self.sender.borrow()
    }

    /// A tick source that observes frames published after this call.
    pub fn ticks(&self) -> FrameTicks {
        let receiver = self.sender.subscribe();
        let last = *receiver.borrow();
        FrameTicks { receiver, last }
    }

    /// Number of live tick sources subscribed to this clock.
    pub fn waiter_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Tick source fed by a [`FrameClock`].
///
/// If the host publishes several frames between two polls they are folded
/// into a single tick whose delta covers all of them, so no time is lost.
pub struct FrameTicks {
    receiver: watch::Receiver<FrameStamp>,
    last: FrameStamp,
}

#[async_trait]
impl TickSource for FrameTicks {
    async fn next_tick(&mut self) -> Option<Duration> {
        self.receiver.changed().await.ok()?;
        let stamp = *self.receiver.borrow_and_update();
        let delta = stamp.elapsed.saturating_sub(self.last.elapsed);
        self.last = stamp;
        Some(delta)
    }
}

/// Free-running tick source over a tokio interval.
///
/// Deltas are measured, not assumed, so a stalled runtime still accounts for
/// the real time that passed.
pub struct IntervalTicker {
    interval: Interval,
    last: Instant,
}

impl Default for IntervalTicker {
    fn default() -> Self {
        Self::new(TickConfig::DEFAULT_FRAME_INTERVAL)
    }
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let period = period.max(TickConfig::MIN_FRAME_INTERVAL);
        let start = Instant::now();
        let mut interval = tokio::time::interval_at(start + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            last: start,
        }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl TickSource for IntervalTicker {
    async fn next_tick(&mut self) -> Option<Duration> {
        let now = self.interval.tick().await;
        let delta = now.saturating_duration_since(self.last);
        self.last = now;
        Some(delta)
    }
}
