//! Consumer contexts: every interest one consuming unit holds, torn down
//! together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::error::{InjectorError, Result};
use crate::injector::Injector;
use crate::lifetime::Lifetime;
use crate::require::Resolution;
use crate::token::{TokenType, TokenValue};
use crate::watcher::{TokenWatcher, Watcher};

/// Outcome of one injected requirement, reported by
/// [`ConsumerContext::settle`].
#[derive(Debug)]
pub struct RequireReport {
    pub token_type: TokenType,
    pub outcome: Result<Resolution<()>>,
}

impl RequireReport {
    pub fn is_satisfied(&self) -> bool {
        matches!(&self.outcome, Ok(resolution) if resolution.is_satisfied())
    }

    pub fn timed_out(&self) -> bool {
        matches!(&self.outcome, Ok(resolution) if resolution.timed_out)
    }
}

/// Watchers and pending waits belonging to one consumer.
///
/// At most one watcher per token type. Listeners registered through the
/// context are guarded by its [`Lifetime`], so they stop firing the moment
/// the context is disposed, even mid-dispatch. Dropping the context disposes
/// it.
pub struct ConsumerContext {
    injector: Injector,
    consumer: Arc<str>,
    watchers: HashMap<TokenType, Box<dyn TokenWatcher>>,
    pending: FuturesUnordered<BoxFuture<'static, RequireReport>>,
    lifetime: Lifetime,
    disposed: bool,
}

impl ConsumerContext {
    pub fn new(injector: Injector, consumer: impl Into<Arc<str>>) -> Self {
        Self {
            injector,
            consumer: consumer.into(),
            watchers: HashMap::new(),
            pending: FuturesUnordered::new(),
            lifetime: Lifetime::new(),
            disposed: false,
        }
    }

    /// Context bound to [`Injector::main`].
    pub fn for_main(consumer: impl Into<Arc<str>>) -> Self {
        Self::new(Injector::main(), consumer)
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Lifetime ended by [`dispose`](Self::dispose), for guarding closures
    /// the consumer registers elsewhere.
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn watches<T: TokenValue>(&self) -> bool {
        self.watchers.contains_key(&TokenType::of::<T>())
    }

    pub fn watched_types(&self) -> Vec<TokenType> {
        self.watchers.keys().copied().collect()
    }

    /// Number of injected requirements not yet settled.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(InjectorError::ContextDisposed {
                consumer: self.consumer.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_unique(&self, token_type: TokenType) -> Result<()> {
        if self.watchers.contains_key(&token_type) {
            return Err(InjectorError::DuplicateWatcher {
                consumer: self.consumer.to_string(),
                token_type,
            });
        }
        Ok(())
    }

    fn register_watcher<T, F>(&mut self, listener: F) -> Result<()>
    where
        T: TokenValue,
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut watcher = Watcher::new(self.injector.clone(), self.consumer.clone(), listener);
        watcher.watch()?;
        self.watchers.insert(TokenType::of::<T>(), Box::new(watcher));
        Ok(())
    }

    /// Require `T` within `max_wait` and keep watching it afterwards.
    ///
    /// The listener receives the value once when the requirement resolves
    /// (unless the watch already delivered it), then every later provide.
    /// The wait runs when [`settle`](Self::settle) is awaited.
    pub fn inject<T, F>(&mut self, listener: F, max_wait: Duration) -> Result<&mut Self>
    where
        T: TokenValue,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let token_type = TokenType::of::<T>();
        self.ensure_unique(token_type)?;

        let listener = Arc::new(self.lifetime.guard(listener));
        let delivered = Arc::new(AtomicBool::new(false));

        let watch_listener = listener.clone();
        let watch_delivered = delivered.clone();
        self.register_watcher::<T, _>(move |value| {
            watch_delivered.store(true, Ordering::SeqCst);
            watch_listener(value);
        })?;

        let injector = self.injector.clone();
        let consumer = self.consumer.clone();
        let mut ticks = injector.clock().ticks();
        self.pending.push(
            async move {
                let outcome = injector.resolve_with::<T, _>(max_wait, &mut ticks).await;
                match &outcome {
                    Ok(resolution) => {
                        if let Some(value) = resolution.value.clone() {
                            if !delivered.swap(true, Ordering::SeqCst) {
                                listener(value);
                            }
                        }
                    }
                    Err(e) => warn!("{} could not require {}: {}", consumer, token_type, e),
                }
                RequireReport {
                    token_type,
                    outcome: outcome.map(|resolution| resolution.discard_value()),
                }
            }
            .boxed(),
        );
        Ok(self)
    }

    /// [`inject`](Self::inject) with the injector's default wait.
    pub fn inject_default<T, F>(&mut self, listener: F) -> Result<&mut Self>
    where
        T: TokenValue,
        F: Fn(T) + Send + Sync + 'static,
    {
        let max_wait = self.injector.default_require_wait();
        self.inject(listener, max_wait)
    }

    /// Watch `T` without requiring it. Never fails for lack of a value.
    pub fn inject_optional<T, F>(&mut self, listener: F) -> Result<&mut Self>
    where
        T: TokenValue,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        self.ensure_unique(TokenType::of::<T>())?;
        let listener = self.lifetime.guard(listener);
        self.register_watcher::<T, _>(listener)?;
        Ok(self)
    }

    /// Stop watching `T`. Returns `false` if `T` was not watched.
    pub fn stop_watching<T: TokenValue>(&mut self) -> bool {
        match self.watchers.remove(&TokenType::of::<T>()) {
            Some(mut watcher) => {
                watcher.unwatch();
                true
            }
            None => false,
        }
    }

    /// Re-attach watchers whose provider was disposed since they attached,
    /// for example after the registry was cleared.
    pub fn rewatch(&mut self) -> Result<()> {
        self.ensure_live()?;
        for watcher in self.watchers.values_mut() {
            watcher.watch()?;
        }
        Ok(())
    }

    /// Drive every pending requirement to completion.
    ///
    /// Returns one report per requirement in completion order. A disposed
    /// context has nothing pending and returns an empty list.
    pub async fn settle(&mut self) -> Vec<RequireReport> {
        let mut reports = Vec::with_capacity(self.pending.len());
        while let Some(report) = self.pending.next().await {
            reports.push(report);
        }
        reports
    }

    /// Unwatch everything, abandon pending waits and end the lifetime.
    /// Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.lifetime.end();
        for watcher in self.watchers.values_mut() {
            watcher.unwatch();
        }
        self.watchers.clear();
        self.pending = FuturesUnordered::new();
        debug!("Consumer context '{}' disposed", self.consumer);
    }
}

impl Drop for ConsumerContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use futures::poll;
    use std::sync::Mutex;
    use std::task::Poll;

    #[derive(Debug, Clone, PartialEq)]
    struct Audio(u8);

    #[derive(Debug, Clone, PartialEq)]
    struct Score(u32);

    const FRAME: Duration = Duration::from_millis(100);

    fn sink<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let writer = seen.clone();
        (seen, move |value: T| writer.lock().unwrap().push(value))
    }

    #[test]
    fn test_duplicate_watcher_is_rejected() {
        let mut context = ConsumerContext::new(Injector::default(), "hud");
        context.inject_optional::<Audio, _>(|_| {}).unwrap();

        let err = context.inject_optional::<Audio, _>(|_| {}).err().unwrap();
        assert!(matches!(err, InjectorError::DuplicateWatcher { .. }));
        let err = context
            .inject::<Audio, _>(|_| {}, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, InjectorError::DuplicateWatcher { .. }));
        assert_eq!(context.pending_count(), 0);
    }

    #[test]
    fn test_inject_optional_watches() {
        let injector = Injector::default();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (seen, listener) = sink::<Audio>();
        context.inject_optional::<Audio, _>(listener).unwrap();

        injector.provide(Token::new(Audio(1))).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Audio(1)]);
        assert!(context.watches::<Audio>());
    }

    #[test]
    fn test_dispose_silences_all_watchers() {
        let injector = Injector::default();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (audio_seen, audio_listener) = sink::<Audio>();
        let (score_seen, score_listener) = sink::<Score>();
        context
            .inject_optional::<Audio, _>(audio_listener)
            .unwrap()
            .inject_optional::<Score, _>(score_listener)
            .unwrap();

        context.dispose();
        context.dispose();

        injector.provide(Token::new(Audio(1))).unwrap();
        injector.provide(Token::new(Score(2))).unwrap();
        assert!(audio_seen.lock().unwrap().is_empty());
        assert!(score_seen.lock().unwrap().is_empty());
        assert_eq!(injector.provider::<Audio>().unwrap().listener_count(), 0);
        assert!(context.watched_types().is_empty());
    }

    #[test]
    fn test_disposed_context_rejects_injection() {
        let mut context = ConsumerContext::new(Injector::default(), "hud");
        context.dispose();
        assert!(matches!(
            context.inject_optional::<Audio, _>(|_| {}).err(),
            Some(InjectorError::ContextDisposed { .. })
        ));
        assert!(context.rewatch().is_err());
    }

    #[test]
    fn test_drop_disposes() {
        let injector = Injector::default();
        let lifetime = {
            let mut context = ConsumerContext::new(injector.clone(), "hud");
            context.inject_optional::<Audio, _>(|_| {}).unwrap();
            context.lifetime()
        };
        assert!(lifetime.is_ended());
        assert_eq!(injector.provider::<Audio>().unwrap().listener_count(), 0);
    }

    #[test]
    fn test_stop_watching_single_type() {
        let injector = Injector::default();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (seen, listener) = sink::<Audio>();
        context.inject_optional::<Audio, _>(listener).unwrap();

        assert!(context.stop_watching::<Audio>());
        assert!(!context.stop_watching::<Audio>());
        injector.provide(Token::new(Audio(3))).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rewatch_after_clear() {
        let injector = Injector::default();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (seen, listener) = sink::<Audio>();
        context.inject_optional::<Audio, _>(listener).unwrap();

        injector.clear();
        context.rewatch().unwrap();
        injector.provide(Token::new(Audio(4))).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Audio(4)]);
    }

    #[tokio::test]
    async fn test_inject_resolves_present_value() {
        let injector = Injector::default();
        injector.provide(Token::new(Score(10))).unwrap();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (seen, listener) = sink::<Score>();
        context
            .inject::<Score, _>(listener, Duration::from_secs(1))
            .unwrap();

        let reports = context.settle().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_satisfied());
        assert_eq!(*seen.lock().unwrap(), vec![Score(10)]);
        assert_eq!(context.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_inject_mid_wait_value_delivered_once() {
        let injector = Injector::default();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (seen, listener) = sink::<Score>();
        context
            .inject::<Score, _>(listener, Duration::from_secs(1))
            .unwrap();

        {
            let mut settle = Box::pin(context.settle());
            assert!(poll!(&mut settle).is_pending());
            injector.provide(Token::new(Score(5))).unwrap();
            injector.clock().advance(FRAME);
            let Poll::Ready(reports) = poll!(&mut settle) else {
                panic!("requirement should settle");
            };
            assert!(reports[0].is_satisfied());
        }

        assert_eq!(*seen.lock().unwrap(), vec![Score(5)]);
    }

    #[tokio::test]
    async fn test_inject_reports_timeout() {
        let injector = Injector::default();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (seen, listener) = sink::<Score>();
        context
            .inject::<Score, _>(listener, Duration::from_secs(1))
            .unwrap();

        let mut settle = Box::pin(context.settle());
        assert!(poll!(&mut settle).is_pending());
        injector.clock().advance(Duration::from_secs(1));
        let Poll::Ready(reports) = poll!(&mut settle) else {
            panic!("requirement should time out");
        };

        assert!(reports[0].timed_out());
        assert_eq!(reports[0].token_type, TokenType::of::<Score>());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispose_abandons_pending_requirements() {
        let injector = Injector::default();
        let mut context = ConsumerContext::new(injector.clone(), "hud");
        let (seen, listener) = sink::<Score>();
        context
            .inject::<Score, _>(listener, Duration::from_secs(1))
            .unwrap();
        assert_eq!(context.pending_count(), 1);

        context.dispose();
        injector.provide(Token::new(Score(1))).unwrap();
        injector.clock().advance(FRAME);

        assert!(context.settle().await.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }
}
