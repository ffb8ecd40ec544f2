//! Watchers: reversible bindings between one consumer callback and one
//! provider's change notifications.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::injector::Injector;
use crate::listeners::{Listener, ListenerId};
use crate::provider::TokenProvider;
use crate::token::{TokenType, TokenValue};

/// Type-erased watcher, so a consumer can hold watchers for many types.
pub trait TokenWatcher: Send + Sync {
    fn token_type(&self) -> TokenType;
    fn consumer(&self) -> &str;
    /// Attach the callback. No-op while attached to a live provider.
    fn watch(&mut self) -> Result<()>;
    /// Detach the callback. No-op when not attached.
    fn unwatch(&mut self);
    fn is_watching(&self) -> bool;
}

/// Binds `(consumer, T, listener)` to the provider for `T`.
///
/// The provider is looked up when [`watch`](Self::watch) runs, so a watcher
/// whose provider was disposed (for example by a registry clear) attaches to
/// the replacement on the next `watch`. Dropping the watcher unwatches it.
pub struct Watcher<T: TokenValue> {
    injector: Injector,
    consumer: Arc<str>,
    listener: Listener<T>,
    attached: Option<(TokenProvider<T>, ListenerId)>,
}

impl<T: TokenValue> Watcher<T> {
    pub fn new<F>(injector: Injector, consumer: impl Into<Arc<str>>, listener: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            injector,
            consumer: consumer.into(),
            listener: Arc::new(listener),
            attached: None,
        }
    }

    /// Listener id on the current provider, while attached.
    pub fn listener_id(&self) -> Option<ListenerId> {
        self.attached.as_ref().map(|(_, id)| *id)
    }
}

impl<T: TokenValue> TokenWatcher for Watcher<T> {
    fn token_type(&self) -> TokenType {
        TokenType::of::<T>()
    }

    fn consumer(&self) -> &str {
        &self.consumer
    }

    fn watch(&mut self) -> Result<()> {
        if self.is_watching() {
            return Ok(());
        }
        // A disposed provider already dropped our listener.
        self.attached = None;

        let provider = self.injector.provider::<T>()?;
        let listener = self.listener.clone();
        let id = provider.add_listener(move |value| listener(value))?;
        self.attached = Some((provider, id));
        debug!("{} is watching {}", self.consumer, self.token_type());
        Ok(())
    }

    fn unwatch(&mut self) {
        if let Some((provider, id)) = self.attached.take() {
            provider.remove_listener(id);
            debug!("{} stopped watching {}", self.consumer, self.token_type());
        }
    }

    fn is_watching(&self) -> bool {
        self.attached
            .as_ref()
            .is_some_and(|(provider, _)| !provider.is_disposed())
    }
}

impl<T: TokenValue> Drop for Watcher<T> {
    fn drop(&mut self) {
        self.unwatch();
    }
}
