//! Tokens: disposable handles around a lazily evaluated value.
//!
//! A token does not cache its value. Every read calls the accessor, so a
//! producer can keep a token installed while the value behind it changes.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::listeners::{Listener, ListenerId, ListenerSet};

/// Bounds every value carried by a token must satisfy.
///
/// `Debug` is required so the inspection surface can render current values.
pub trait TokenValue: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> TokenValue for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// Runtime key identifying the declared type of a token.
///
/// Equality and hashing use only the [`TypeId`]; the name is for display.
#[derive(Clone, Copy)]
pub struct TokenType {
    id: TypeId,
    name: &'static str,
}

impl TokenType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name as reported by the compiler.
    pub fn full_name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths stripped, e.g. `Arc<Settings>`.
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }
}

impl PartialEq for TokenType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TokenType {}

impl Hash for TokenType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenType({})", self.name)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment_start = 0;
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.truncate(segment_start);
        } else {
            out.push(c);
            if !(c.is_alphanumeric() || c == '_') {
                segment_start = out.len();
            }
        }
    }
    out
}

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TokenId(u64);

impl TokenId {
    fn next() -> Self {
        Self(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Accessor<T> = Arc<dyn Fn() -> T + Send + Sync + 'static>;

struct TokenInner<T> {
    id: TokenId,
    accessor: Accessor<T>,
    // The flag lives under the same lock as the callbacks so that
    // subscribing and disposing cannot interleave.
    state: Mutex<DisposeState>,
}

struct DisposeState {
    disposed: bool,
    callbacks: ListenerSet<()>,
}

/// Disposable, identity-bearing handle around a value of type `T`.
///
/// Cloning a token clones the handle: all clones share identity and
/// disposal state.
pub struct Token<T> {
    inner: Arc<TokenInner<T>>,
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: TokenValue> Token<T> {
    /// Create a token that always yields a clone of `value`.
    pub fn new(value: T) -> Self {
        Self::from_fn(move || value.clone())
    }

    /// Create a token whose value is produced by `accessor` on every read.
    pub fn from_fn<F>(accessor: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(TokenInner {
                id: TokenId::next(),
                accessor: Arc::new(accessor),
                state: Mutex::new(DisposeState {
                    disposed: false,
                    callbacks: ListenerSet::new(),
                }),
            }),
        }
    }

    /// Evaluate the accessor.
    pub fn value(&self) -> T {
        (self.inner.accessor)()
    }

    pub fn id(&self) -> TokenId {
        self.inner.id
    }

    pub fn token_type(&self) -> TokenType {
        TokenType::of::<T>()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    /// Whether two handles refer to the same token.
    pub fn same_token(&self, other: &Token<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn state(&self) -> MutexGuard<'_, DisposeState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `callback` once when this token is disposed.
    ///
    /// Returns `None`, dropping the callback unfired, if the token is already
    /// disposed.
    pub fn on_dispose<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = self.state();
        if state.disposed {
            return None;
        }
        Some(state.callbacks.add(Arc::new(move |()| callback())))
    }

    pub fn remove_dispose_listener(&self, id: ListenerId) -> bool {
        self.state().callbacks.remove(id)
    }

    /// Dispose the token, firing every dispose callback exactly once.
    ///
    /// Repeated calls are no-ops.
    pub fn dispose(&self) {
        let callbacks: Vec<Listener<()>> = {
            let mut state = self.state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.callbacks.drain()
        };
        debug!("Disposing token {} for {}", self.id(), self.token_type());
        for callback in callbacks {
            callback(());
        }
    }
}

impl<T: TokenValue> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id())
            .field("type", &self.token_type())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T: TokenValue> fmt::Display for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token<{}>{} {:?}", self.token_type(), self.id(), self.value())
    }
}
