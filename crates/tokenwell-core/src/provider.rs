//! Token providers: the exclusive holder of the current token for one type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::error::{InjectorError, Result};
use crate::listeners::{ListenerId, ListenerSet};
use crate::token::{Token, TokenId, TokenType, TokenValue};

/// Type-erased view of a provider, used by the registry and by inspectors.
pub trait AnyProvider: Send + Sync {
    fn token_type(&self) -> TokenType;
    fn has_token(&self) -> bool;
    fn token_id(&self) -> Option<TokenId>;
    /// `Debug` rendering of the current value, if a token is installed.
    fn describe_value(&self) -> Option<String>;
    fn listener_count(&self) -> usize;
    fn is_disposed(&self) -> bool;
    /// Subscribe to value changes without knowing the value type.
    fn watch_changes(&self, callback: Arc<dyn Fn() + Send + Sync>) -> Result<ListenerId>;
    fn unwatch_changes(&self, id: ListenerId) -> bool;
    fn dispose(&self);
}

/// Shared, erased handle to a provider.
pub type ProviderHandle = Arc<dyn AnyProvider>;

struct ProviderShared<T> {
    token_type: TokenType,
    current: Mutex<Option<Token<T>>>,
    disposed: AtomicBool,
    on_change: ListenerSet<T>,
    on_requested: ListenerSet<TokenType>,
    on_disposed: ListenerSet<TokenType>,
}

impl<T: TokenValue> ProviderShared<T> {
    fn current(&self) -> MutexGuard<'_, Option<Token<T>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the current token if it is still `id`. Called from the token's
    /// own dispose callback.
    fn release(&self, id: TokenId) {
        let mut current = self.current();
        if current.as_ref().map(Token::id) == Some(id) {
            *current = None;
            debug!("Token {} withdrawn from {} provider", id, self.token_type);
        }
    }
}

/// Holds at most one current [`Token`] for `T` and notifies listeners when a
/// token is provided.
///
/// Cloning yields another handle to the same provider.
pub struct TokenProvider<T> {
    shared: Arc<ProviderShared<T>>,
}

impl<T> Clone for TokenProvider<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: TokenValue> Default for TokenProvider<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TokenValue> TokenProvider<T> {
    /// Create a standalone provider.
    ///
    /// Providers are normally obtained from
    /// [`Registry::for_type`](crate::Registry::for_type).
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ProviderShared {
                token_type: TokenType::of::<T>(),
                current: Mutex::new(None),
                disposed: AtomicBool::new(false),
                on_change: ListenerSet::new(),
                on_requested: ListenerSet::new(),
                on_disposed: ListenerSet::new(),
            }),
        }
    }

    pub fn token_type(&self) -> TokenType {
        self.shared.token_type
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    pub fn has_token(&self) -> bool {
        self.shared.current().is_some()
    }

    /// The current token handle, if any.
    pub fn token(&self) -> Option<Token<T>> {
        self.shared.current().clone()
    }

    /// Current value of the installed token, if any.
    pub fn value(&self) -> Option<T> {
        // Evaluate outside the lock: accessors are user code.
        self.token().map(|token| token.value())
    }

    /// Whether two handles refer to the same provider.
    pub fn same_provider(&self, other: &TokenProvider<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Erased handle sharing this provider's state.
    pub fn handle(&self) -> ProviderHandle {
        Arc::new(self.clone())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(InjectorError::ProviderDisposed {
                token_type: self.token_type(),
            });
        }
        Ok(())
    }

    /// Install `token` and hook its disposal. Returns the displaced token when
    /// `overwrite` is set, or gives the token back untouched when the slot is
    /// occupied and `overwrite` is not set.
    fn install(&self, token: &Token<T>, overwrite: bool) -> Result<Install<T>> {
        let mut current = self.shared.current();
        if let Some(existing) = current.as_ref() {
            if existing.same_token(token) {
                return Ok(Install::AlreadyCurrent);
            }
            if !overwrite {
                return Ok(Install::Occupied);
            }
        }

        let weak: Weak<ProviderShared<T>> = Arc::downgrade(&self.shared);
        let id = token.id();
        let hooked = token.on_dispose(move || {
            if let Some(shared) = weak.upgrade() {
                shared.release(id);
            }
        });
        if hooked.is_none() {
            return Err(InjectorError::TokenDisposed {
                token_type: self.token_type(),
                token_id: id,
            });
        }

        Ok(Install::Installed(current.replace(token.clone())))
    }

    /// Provide `token` if no token is currently installed.
    ///
    /// Returns `Ok(false)` without any mutation when a token already exists.
    /// On success every change listener is called with the token's value.
    pub fn provide(&self, token: Token<T>) -> Result<bool> {
        self.ensure_live()?;
        match self.install(&token, false)? {
            Install::Installed(_) => {
                debug!("Provided token {} for {}", token.id(), self.token_type());
                self.shared.on_change.emit(token.value());
                Ok(true)
            }
            Install::Occupied | Install::AlreadyCurrent => {
                debug!(
                    "Rejected token {} for {}: a token is already provided",
                    token.id(),
                    self.token_type()
                );
                Ok(false)
            }
        }
    }

    /// Dispose any current token, then provide `token`.
    ///
    /// Re-providing the token that is already current only re-notifies.
    pub fn provide_with_overwrite(&self, token: Token<T>) -> Result<()> {
        self.ensure_live()?;
        let already_current = self
            .token()
            .is_some_and(|current| current.same_token(&token));
        if !already_current {
            self.dispose_current_token()?;
        }

        if let Install::Installed(Some(displaced)) = self.install(&token, true)? {
            // Something was provided from inside a dispose callback.
            displaced.dispose();
        }
        debug!("Provided token {} for {} (overwrite)", token.id(), self.token_type());
        self.shared.on_change.emit(token.value());
        Ok(())
    }

    /// Dispose the current token, if any.
    ///
    /// Change listeners are not notified about the removal; observe the
    /// token's own dispose event for that.
    pub fn dispose_current_token(&self) -> Result<()> {
        self.ensure_live()?;
        let current = self.shared.current().take();
        if let Some(token) = current {
            token.dispose();
        }
        Ok(())
    }

    /// Read the current value, signalling interest when there is none.
    ///
    /// "Token requested" listeners run when no token is installed; one of
    /// them may provide synchronously, so the value is read again afterwards.
    pub fn request(&self) -> Result<Option<T>> {
        self.ensure_live()?;
        if let Some(value) = self.value() {
            return Ok(Some(value));
        }
        self.shared.on_requested.emit(self.token_type());
        Ok(self.value())
    }

    /// Subscribe to provided values. Does not fire for an already installed
    /// token; read [`value`](Self::value) for that.
    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.shared.on_change.add(Arc::new(listener)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.on_change.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.on_change.len()
    }

    pub fn on_requested<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(TokenType) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.shared.on_requested.add(Arc::new(listener)))
    }

    pub fn remove_requested_listener(&self, id: ListenerId) -> bool {
        self.shared.on_requested.remove(id)
    }

    /// Subscribe to this provider's disposal. Fires at most once.
    pub fn on_disposed<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(TokenType) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.shared.on_disposed.add(Arc::new(listener)))
    }

    pub fn remove_disposed_listener(&self, id: ListenerId) -> bool {
        self.shared.on_disposed.remove(id)
    }

    /// Dispose the current token, notify "disposed" once and drop every
    /// listener. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let current = self.shared.current().take();
        if let Some(token) = current {
            token.dispose();
        }
        debug!("Disposed provider for {}", self.token_type());
        self.shared.on_disposed.emit(self.token_type());

        self.shared.on_change.clear();
        self.shared.on_requested.clear();
        self.shared.on_disposed.clear();
    }
}

enum Install<T> {
    Installed(Option<Token<T>>),
    Occupied,
    AlreadyCurrent,
}

impl<T: TokenValue> AnyProvider for TokenProvider<T> {
    fn token_type(&self) -> TokenType {
        TokenProvider::token_type(self)
    }

    fn has_token(&self) -> bool {
        TokenProvider::has_token(self)
    }

    fn token_id(&self) -> Option<TokenId> {
        self.token().map(|token| token.id())
    }

    fn describe_value(&self) -> Option<String> {
        self.value().map(|value| format!("{value:?}"))
    }

    fn listener_count(&self) -> usize {
        TokenProvider::listener_count(self)
    }

    fn is_disposed(&self) -> bool {
        TokenProvider::is_disposed(self)
    }

    fn watch_changes(&self, callback: Arc<dyn Fn() + Send + Sync>) -> Result<ListenerId> {
        self.add_listener(move |_| callback())
    }

    fn unwatch_changes(&self, id: ListenerId) -> bool {
        self.remove_listener(id)
    }

    fn dispose(&self) {
        TokenProvider::dispose(self)
    }
}
