//! The injector facade: one registry, one frame clock, and the bounded wait.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::config::{InjectorSettings, RequireConfig};
use crate::error::Result;
use crate::listeners::ListenerId;
use crate::provider::TokenProvider;
use crate::registry::Registry;
use crate::require::{wait_until, Resolution};
use crate::schedule::{FrameClock, TickSource};
use crate::token::{Token, TokenType, TokenValue};

static MAIN: OnceLock<RwLock<Injector>> = OnceLock::new();

/// Process-wide entry point wrapping a [`Registry`] and a [`FrameClock`].
///
/// Cloning yields another handle to the same registry, clock and default
/// wait. Production code normally goes through [`Injector::main`]; tests
/// build their own.
#[derive(Clone)]
pub struct Injector {
    registry: Registry,
    clock: FrameClock,
    // Milliseconds, shared by every clone.
    default_wait_ms: Arc<AtomicU64>,
}

fn wait_millis(wait: Duration) -> u64 {
    u64::try_from(RequireConfig::clamp_max_wait(wait).as_millis()).unwrap_or(u64::MAX)
}

impl Default for Injector {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

impl Injector {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            clock: FrameClock::new(),
            default_wait_ms: Arc::new(AtomicU64::new(wait_millis(RequireConfig::DEFAULT_MAX_WAIT))),
        }
    }

    pub fn builder() -> InjectorBuilder {
        InjectorBuilder::new()
    }

    /// The shared process-wide injector, created on first use.
    pub fn main() -> Injector {
        MAIN.get_or_init(|| RwLock::new(Injector::default()))
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dispose the process-wide injector and replace it with a fresh one.
    ///
    /// Handles obtained from [`main`](Self::main) before the reset keep
    /// pointing at the disposed instance.
    pub fn reset_main() {
        let slot = MAIN.get_or_init(|| RwLock::new(Injector::default()));
        let previous = {
            let mut main = slot.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *main)
        };
        previous.dispose();
        debug!("Main injector reset");
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The clock the host advances once per frame.
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn default_require_wait(&self) -> Duration {
        Duration::from_millis(self.default_wait_ms.load(Ordering::SeqCst))
    }

    /// Set the default maximum wait, clamped to at least one second.
    ///
    /// Visible through every handle to this injector, including later
    /// [`main`](Self::main) calls.
    pub fn set_default_require_wait(&self, wait: Duration) {
        self.default_wait_ms.store(wait_millis(wait), Ordering::SeqCst);
    }

    /// Apply runtime settings to this injector and all of its handles.
    pub fn apply_settings(&self, settings: &InjectorSettings) {
        self.set_default_require_wait(settings.default_require_wait());
    }

    pub fn clear(&self) {
        self.registry.clear();
    }

    pub fn dispose(&self) {
        self.registry.dispose();
    }

    // ========================================
    // Plain access
    // ========================================

    pub fn provider<T: TokenValue>(&self) -> Result<TokenProvider<T>> {
        self.registry.for_type::<T>()
    }

    /// Current value for `T`, or `None` if nothing is provided.
    pub fn get<T: TokenValue>(&self) -> Result<Option<T>> {
        self.registry.token_value::<T>()
    }

    /// Shorthand for `provider::<T>()?.provide(token)`.
    pub fn provide<T: TokenValue>(&self, token: Token<T>) -> Result<bool> {
        self.provider::<T>()?.provide(token)
    }

    pub fn watch<T, F>(&self, listener: F) -> Result<ListenerId>
    where
        T: TokenValue,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.registry.add_token_listener::<T, F>(listener)
    }

    pub fn unwatch<T: TokenValue>(&self, id: ListenerId) -> Result<bool> {
        self.registry.remove_token_listener::<T>(id)
    }

    // ========================================
    // Bounded waits
    // ========================================

    /// Wait for a value of `T` using this injector's frame clock.
    pub async fn resolve<T: TokenValue>(&self, max_wait: Duration) -> Result<Resolution<T>> {
        let mut ticks = self.clock.ticks();
        self.resolve_with(max_wait, &mut ticks).await
    }

    /// Wait for a value of `T`, ticking from `ticks`.
    ///
    /// "Token requested" listeners fire once, on entry, if nothing is
    /// provided yet. The provider is looked up again on every poll so a
    /// registry cleared mid-wait is picked up.
    pub async fn resolve_with<T, S>(&self, max_wait: Duration, ticks: &mut S) -> Result<Resolution<T>>
    where
        T: TokenValue,
        S: TickSource + ?Sized,
    {
        let registry = self.registry.clone();
        let mut entered = false;
        let poll = move || {
            let provider = registry.for_type::<T>()?;
            if entered {
                Ok(provider.value())
            } else {
                entered = true;
                provider.request()
            }
        };
        wait_until(TokenType::of::<T>(), max_wait, poll, ticks).await
    }

    /// Wait for a value of `T`, then call `callback(value, timed_out)`.
    ///
    /// The callback runs exactly once unless the future is dropped first or
    /// the wait fails, in which case it never runs.
    pub async fn require<T, F>(&self, callback: F, max_wait: Duration) -> Result<()>
    where
        T: TokenValue,
        F: FnOnce(Option<T>, bool) + Send,
    {
        let resolution = self.resolve::<T>(max_wait).await?;
        callback(resolution.value, resolution.timed_out);
        Ok(())
    }

    /// [`require`](Self::require) with the default wait.
    pub async fn require_default<T, F>(&self, callback: F) -> Result<()>
    where
        T: TokenValue,
        F: FnOnce(Option<T>, bool) + Send,
    {
        self.require(callback, self.default_require_wait()).await
    }

    /// Subscribe `listener` now, then wait for a value.
    ///
    /// The subscription happens before this returns, so nothing provided
    /// after the call is missed. A value provided mid-wait reaches the
    /// listener once through the subscription; the wait does not repeat it.
    /// A value already present when the wait starts is delivered by the wait.
    pub fn require_and_watch<T, F>(&self, listener: F, max_wait: Duration) -> Result<RequireAndWatch<T>>
    where
        T: TokenValue,
        F: Fn(T) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        let delivered = Arc::new(AtomicBool::new(false));

        let watch_listener = listener.clone();
        let watch_delivered = delivered.clone();
        let listener_id = self.watch::<T, _>(move |value| {
            watch_delivered.store(true, Ordering::SeqCst);
            watch_listener(value);
        })?;

        let injector = self.clone();
        let mut ticks = self.clock.ticks();
        let wait = async move {
            let resolution = injector.resolve_with::<T, _>(max_wait, &mut ticks).await?;
            if let Some(value) = resolution.value.clone() {
                if !delivered.swap(true, Ordering::SeqCst) {
                    listener(value);
                }
            }
            Ok(resolution)
        }
        .boxed();

        Ok(RequireAndWatch { listener_id, wait })
    }
}

/// Pending wait returned by [`Injector::require_and_watch`].
///
/// Await it to drive the wait. The subscription stays in place after the
/// wait resolves; remove it with [`Injector::unwatch`] using
/// [`listener_id`](Self::listener_id).
#[must_use = "the wait only runs when awaited"]
pub struct RequireAndWatch<T> {
    listener_id: ListenerId,
    wait: BoxFuture<'static, Result<Resolution<T>>>,
}

impl<T> RequireAndWatch<T> {
    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }
}

impl<T> Future for RequireAndWatch<T> {
    type Output = Result<Resolution<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.wait.as_mut().poll(cx)
    }
}

/// Builder for [`Injector`].
pub struct InjectorBuilder {
    registry: Option<Registry>,
    clock: Option<FrameClock>,
    default_wait: Duration,
}

impl Default for InjectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectorBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            clock: None,
            default_wait: RequireConfig::DEFAULT_MAX_WAIT,
        }
    }

    /// Share an existing registry instead of creating one.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a clock the host already drives.
    pub fn clock(mut self, clock: FrameClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Default maximum wait. Clamped to at least one second.
    pub fn default_require_wait(mut self, wait: Duration) -> Self {
        self.default_wait = RequireConfig::clamp_max_wait(wait);
        self
    }

    pub fn settings(self, settings: &InjectorSettings) -> Self {
        self.default_require_wait(settings.default_require_wait())
    }

    pub fn build(self) -> Injector {
        Injector {
            registry: self.registry.unwrap_or_default(),
            clock: self.clock.unwrap_or_default(),
            default_wait_ms: Arc::new(AtomicU64::new(wait_millis(self.default_wait))),
        }
    }
}
