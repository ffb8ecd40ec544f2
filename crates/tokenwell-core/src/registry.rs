//! Type-keyed collection of token providers.
//!
//! Providers are created on first access per type. The registry subscribes to
//! each provider's "disposed" event at creation and drops the map entry when
//! it fires, so the map never holds a disposed provider regardless of who
//! disposed it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::error::{InjectorError, Result};
use crate::listeners::{ListenerId, ListenerSet};
use crate::provider::{ProviderHandle, TokenProvider};
use crate::token::{TokenType, TokenValue};

struct Entry {
    serial: u64,
    handle: ProviderHandle,
    typed: Box<dyn Any + Send + Sync>,
}

struct RegistryInner {
    providers: Mutex<HashMap<TokenType, Entry>>,
    disposed: AtomicBool,
    next_serial: AtomicU64,
    on_add: ListenerSet<ProviderHandle>,
    on_remove: ListenerSet<ProviderHandle>,
}

impl RegistryInner {
    fn providers(&self) -> MutexGuard<'_, HashMap<TokenType, Entry>> {
        self.providers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the entry for `token_type` if it is still the provider created
    /// with `serial`, then announce the removal.
    fn remove(&self, token_type: TokenType, serial: u64) {
        let removed = {
            let mut providers = self.providers();
            match providers.get(&token_type) {
                Some(entry) if entry.serial == serial => providers.remove(&token_type),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            debug!("Removed provider for {} from registry", token_type);
            self.on_remove.emit(entry.handle);
        }
    }
}

/// Type-keyed collection of [`TokenProvider`]s.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                providers: Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
                next_serial: AtomicU64::new(1),
                on_add: ListenerSet::new(),
                on_remove: ListenerSet::new(),
            }),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(InjectorError::RegistryDisposed);
        }
        Ok(())
    }

    /// Get the provider for `T`, creating and registering it on first access.
    ///
    /// "Provider added" fires only when a provider is created.
    pub fn for_type<T: TokenValue>(&self) -> Result<TokenProvider<T>> {
        let token_type = TokenType::of::<T>();
        let (created, handle) = {
            let mut providers = self.inner.providers();
            // Checked under the lock so a concurrent dispose cannot slip a
            // new entry into a cleared map.
            self.ensure_live()?;

            if let Some(entry) = providers.get(&token_type) {
                if let Some(provider) = entry.typed.downcast_ref::<TokenProvider<T>>() {
                    return Ok(provider.clone());
                }
            }

            let provider = TokenProvider::<T>::new();
            let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
            let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
            provider.on_disposed(move |token_type| {
                if let Some(inner) = weak.upgrade() {
                    inner.remove(token_type, serial);
                }
            })?;

            let handle = provider.handle();
            providers.insert(
                token_type,
                Entry {
                    serial,
                    handle: handle.clone(),
                    typed: Box::new(provider.clone()),
                },
            );
            (provider, handle)
        };

        debug!("Created provider for {}", token_type);
        self.inner.on_add.emit(handle);
        Ok(created)
    }

    /// Whether `provider` is the one currently registered for its type.
    pub fn contains<T: TokenValue>(&self, provider: &TokenProvider<T>) -> bool {
        self.inner
            .providers()
            .get(&provider.token_type())
            .and_then(|entry| entry.typed.downcast_ref::<TokenProvider<T>>())
            .is_some_and(|registered| registered.same_provider(provider))
    }

    /// Whether a provider exists for `T`, without creating one.
    pub fn contains_type<T: TokenValue>(&self) -> bool {
        self.inner.providers().contains_key(&TokenType::of::<T>())
    }

    /// Erased provider for a runtime type key, without creating one.
    pub fn provider_for(&self, token_type: TokenType) -> Option<ProviderHandle> {
        self.inner
            .providers()
            .get(&token_type)
            .map(|entry| entry.handle.clone())
    }

    /// Erased handles for every registered provider.
    pub fn providers(&self) -> Vec<ProviderHandle> {
        self.inner
            .providers()
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.providers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.providers().is_empty()
    }

    // ========================================
    // Shorthands
    // ========================================

    /// Current value for `T`, or `None` if nothing is provided.
    pub fn token_value<T: TokenValue>(&self) -> Result<Option<T>> {
        Ok(self.for_type::<T>()?.value())
    }

    pub fn add_token_listener<T, F>(&self, listener: F) -> Result<ListenerId>
    where
        T: TokenValue,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.for_type::<T>()?.add_listener(listener)
    }

    pub fn remove_token_listener<T: TokenValue>(&self, id: ListenerId) -> Result<bool> {
        Ok(self.for_type::<T>()?.remove_listener(id))
    }

    // ========================================
    // Collection events
    // ========================================

    pub fn on_provider_added<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(ProviderHandle) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.on_add.add(Arc::new(listener)))
    }

    pub fn remove_provider_added_listener(&self, id: ListenerId) -> bool {
        self.inner.on_add.remove(id)
    }

    pub fn on_provider_removed<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(ProviderHandle) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.on_remove.add(Arc::new(listener)))
    }

    pub fn remove_provider_removed_listener(&self, id: ListenerId) -> bool {
        self.inner.on_remove.remove(id)
    }

    // ========================================
    // Teardown
    // ========================================

    /// Dispose every provider and empty the map.
    ///
    /// Each disposal reaches the registry through the provider's own
    /// "disposed" event, which removes the entry and fires "provider removed".
    pub fn clear(&self) {
        for handle in self.providers() {
            handle.dispose();
        }

        // Providers created by listeners while the pass above ran.
        let leftovers: Vec<Entry> = self.inner.providers().drain().map(|(_, e)| e).collect();
        for entry in leftovers {
            entry.handle.dispose();
            self.inner.on_remove.emit(entry.handle);
        }
    }

    /// Clear the registry and mark it permanently unusable. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear();
        self.inner.on_add.clear();
        self.inner.on_remove.clear();
        debug!("Registry disposed");
    }
}
