//! The bounded-wait ("require") protocol.
//!
//! A wait polls for a value, then once per tick adds the tick delta to its
//! elapsed time and polls again, until a value shows up or the budget runs
//! out. [`BoundedWait`] is the state machine; [`wait_until`] drives it from a
//! [`TickSource`]. Dropping the future abandons the wait: nothing runs after
//! the drop.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RequireConfig;
use crate::error::{InjectorError, Result};
use crate::schedule::TickSource;
use crate::token::TokenType;

/// Lifecycle of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Polling,
    Satisfied,
    TimedOut,
}

/// Result of feeding one poll into a [`BoundedWait`].
#[derive(Debug, PartialEq)]
pub enum WaitStep<T> {
    Pending,
    Satisfied(T),
    TimedOut,
}

/// Explicit state object for one bounded wait.
///
/// The host (or [`wait_until`]) alternates [`observe`](Self::observe) and
/// [`advance`](Self::advance). A present value wins even when the budget is
/// already spent.
#[derive(Debug, Clone)]
pub struct BoundedWait {
    max_wait: Duration,
    elapsed: Duration,
    state: WaitState,
}

impl BoundedWait {
    /// Start a wait. `max_wait` is clamped to [`RequireConfig::MIN_MAX_WAIT`].
    pub fn new(max_wait: Duration) -> Self {
        Self {
            max_wait: RequireConfig::clamp_max_wait(max_wait),
            elapsed: Duration::ZERO,
            state: WaitState::Polling,
        }
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Feed the result of one poll.
    ///
    /// Once the wait has resolved, further observations are ignored and
    /// report `Pending`, so a resolution is handed out exactly once.
    pub fn observe<T>(&mut self, value: Option<T>) -> WaitStep<T> {
        if self.state != WaitState::Polling {
            return WaitStep::Pending;
        }
        match value {
            Some(value) => {
                self.state = WaitState::Satisfied;
                WaitStep::Satisfied(value)
            }
            None if self.elapsed >= self.max_wait => {
                self.state = WaitState::TimedOut;
                WaitStep::TimedOut
            }
            None => WaitStep::Pending,
        }
    }

    /// Account for one tick.
    pub fn advance(&mut self, delta: Duration) {
        if self.state == WaitState::Polling {
            self.elapsed = self.elapsed.saturating_add(delta);
        }
    }
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    /// The value observed, `None` on timeout.
    pub value: Option<T>,
    pub timed_out: bool,
    /// Accumulated tick time when the wait resolved.
    pub waited: Duration,
}

impl<T> Resolution<T> {
    pub fn is_satisfied(&self) -> bool {
        !self.timed_out
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Same outcome without the value.
    pub fn discard_value(&self) -> Resolution<()> {
        Resolution {
            value: self.value.as_ref().map(|_| ()),
            timed_out: self.timed_out,
            waited: self.waited,
        }
    }
}

/// Run a bounded wait for `token_type`.
///
/// `poll` is called once on entry and once after every tick. Errors from
/// `poll` and a closed tick source end the wait with `Err`.
pub async fn wait_until<T, P, S>(
    token_type: TokenType,
    max_wait: Duration,
    mut poll: P,
    ticks: &mut S,
) -> Result<Resolution<T>>
where
    P: FnMut() -> Result<Option<T>> + Send,
    S: TickSource + ?Sized,
    T: Send,
{
    let mut wait = BoundedWait::new(max_wait);
    loop {
        match wait.observe(poll()?) {
            WaitStep::Satisfied(value) => {
                debug!("{} resolved after {:?}", token_type, wait.elapsed());
                return Ok(Resolution {
                    value: Some(value),
                    timed_out: false,
                    waited: wait.elapsed(),
                });
            }
            WaitStep::TimedOut => {
                warn!(
                    "{} token is required, but none was provided after {:?} (limit {:?})",
                    token_type,
                    wait.elapsed(),
                    wait.max_wait()
                );
                return Ok(Resolution {
                    value: None,
                    timed_out: true,
                    waited: wait.elapsed(),
                });
            }
            WaitStep::Pending => {}
        }

        let delta = ticks
            .next_tick()
            .await
            .ok_or(InjectorError::TickSourceClosed { token_type })?;
        wait.advance(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Tick source replaying a fixed script, then closing.
    struct Scripted(VecDeque<Duration>);

    impl Scripted {
        fn frames(count: usize, each: Duration) -> Self {
            Self(std::iter::repeat(each).take(count).collect())
        }
    }

    #[async_trait]
    impl TickSource for Scripted {
        async fn next_tick(&mut self) -> Option<Duration> {
            self.0.pop_front()
        }
    }

    #[derive(Debug)]
    struct Level;

    #[test]
    fn test_state_machine_satisfied_on_first_poll() {
        let mut wait = BoundedWait::new(Duration::from_secs(2));
        assert_eq!(wait.observe(Some(7)), WaitStep::Satisfied(7));
        assert_eq!(wait.state(), WaitState::Satisfied);
        assert_eq!(wait.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_state_machine_times_out_at_budget() {
        let mut wait = BoundedWait::new(Duration::from_secs(1));
        assert_eq!(wait.observe::<u8>(None), WaitStep::Pending);
        wait.advance(Duration::from_millis(600));
        assert_eq!(wait.observe::<u8>(None), WaitStep::Pending);
        wait.advance(Duration::from_millis(400));
        assert_eq!(wait.observe::<u8>(None), WaitStep::TimedOut);
        assert_eq!(wait.state(), WaitState::TimedOut);
    }

    #[test]
    fn test_state_machine_value_wins_over_spent_budget() {
        let mut wait = BoundedWait::new(Duration::from_secs(1));
        wait.advance(Duration::from_secs(5));
        assert_eq!(wait.observe(Some("late")), WaitStep::Satisfied("late"));
    }

    #[test]
    fn test_state_machine_resolves_once() {
        let mut wait = BoundedWait::new(Duration::from_secs(1));
        wait.advance(Duration::from_secs(1));
        assert_eq!(wait.observe::<u8>(None), WaitStep::TimedOut);
        assert_eq!(wait.observe(Some(1)), WaitStep::Pending);
        wait.advance(Duration::from_secs(1));
        assert_eq!(wait.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_max_wait_is_clamped() {
        let wait = BoundedWait::new(Duration::ZERO);
        assert_eq!(wait.max_wait(), RequireConfig::MIN_MAX_WAIT);
    }

    #[tokio::test]
    async fn test_wait_until_present_value_needs_no_ticks() {
        let mut ticks = Scripted::frames(0, Duration::ZERO);
        let resolution = wait_until(
            TokenType::of::<Level>(),
            Duration::from_secs(1),
            || Ok(Some(3)),
            &mut ticks,
        )
        .await
        .unwrap();

        assert_eq!(resolution.value, Some(3));
        assert!(resolution.is_satisfied());
        assert_eq!(resolution.waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_wait_until_value_appears_mid_wait() {
        let mut ticks = Scripted::frames(10, Duration::from_millis(100));
        let mut polls = 0;
        let resolution = wait_until(
            TokenType::of::<Level>(),
            Duration::from_secs(1),
            || {
                polls += 1;
                Ok((polls == 4).then_some("ready"))
            },
            &mut ticks,
        )
        .await
        .unwrap();

        assert_eq!(resolution.value, Some("ready"));
        assert_eq!(resolution.waited, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let mut ticks = Scripted::frames(100, Duration::from_millis(250));
        let mut polls = 0;
        let resolution: Resolution<u8> = wait_until(
            TokenType::of::<Level>(),
            Duration::from_secs(1),
            || {
                polls += 1;
                Ok(None)
            },
            &mut ticks,
        )
        .await
        .unwrap();

        assert!(resolution.timed_out);
        assert_eq!(resolution.waited, Duration::from_secs(1));
        assert_eq!(polls, 5);
    }

    #[tokio::test]
    async fn test_wait_until_closed_source() {
        let mut ticks = Scripted::frames(2, Duration::from_millis(10));
        let err = wait_until::<u8, _, _>(
            TokenType::of::<Level>(),
            Duration::from_secs(1),
            || Ok(None),
            &mut ticks,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, InjectorError::TickSourceClosed { .. }));
    }

    #[tokio::test]
    async fn test_wait_until_propagates_poll_errors() {
        let mut ticks = Scripted::frames(2, Duration::from_millis(10));
        let err = wait_until::<u8, _, _>(
            TokenType::of::<Level>(),
            Duration::from_secs(1),
            || Err(InjectorError::RegistryDisposed),
            &mut ticks,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, InjectorError::RegistryDisposed));
    }

    #[test]
    fn test_discard_value_keeps_outcome() {
        let resolution = Resolution {
            value: Some(5),
            timed_out: false,
            waited: Duration::from_millis(40),
        };
        let bare = resolution.discard_value();
        assert_eq!(bare.value, Some(()));
        assert!(bare.is_satisfied());
        assert_eq!(bare.waited, Duration::from_millis(40));
    }
}
