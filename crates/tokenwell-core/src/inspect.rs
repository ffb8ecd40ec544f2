//! Read-only inspection of a registry, for debugging tools.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::listeners::ListenerId;
use crate::provider::ProviderHandle;
use crate::registry::Registry;
use crate::token::{TokenId, TokenType};

/// Point-in-time view of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSnapshot {
    pub type_name: String,
    pub has_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<TokenId>,
    /// `Debug` rendering of the current value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub listener_count: usize,
}

/// Point-in-time view of a registry, ordered by type name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub providers: Vec<ProviderSnapshot>,
}

impl RegistrySnapshot {
    pub fn provided_count(&self) -> usize {
        self.providers.iter().filter(|p| p.has_token).count()
    }

    pub fn find(&self, type_name: &str) -> Option<&ProviderSnapshot> {
        self.providers.iter().find(|p| p.type_name == type_name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Registry {
    /// Capture every provider currently in the registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut providers: Vec<ProviderSnapshot> = self
            .providers()
            .into_iter()
            .map(|handle| ProviderSnapshot {
                type_name: handle.token_type().short_name(),
                has_token: handle.has_token(),
                token_id: handle.token_id(),
                value: handle.describe_value(),
                listener_count: handle.listener_count(),
            })
            .collect();
        providers.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        RegistrySnapshot { providers }
    }
}

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

struct InspectorState {
    registry: Registry,
    on_change: ChangeCallback,
    watched: Mutex<HashMap<TokenType, (ProviderHandle, ListenerId)>>,
}

impl InspectorState {
    fn watched(&self) -> MutexGuard<'_, HashMap<TokenType, (ProviderHandle, ListenerId)>> {
        self.watched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, handle: ProviderHandle) {
        // A provider disposed before we got to it has nothing to watch.
        let Ok(id) = handle.watch_changes(self.on_change.clone()) else {
            return;
        };
        let previous = self.watched().insert(handle.token_type(), (handle, id));
        if let Some((stale, stale_id)) = previous {
            stale.unwatch_changes(stale_id);
        }
    }

    fn untrack(&self, handle: &ProviderHandle) {
        let mut watched = self.watched();
        let is_same = watched
            .get(&handle.token_type())
            .is_some_and(|(tracked, _)| Arc::ptr_eq(tracked, handle));
        if is_same {
            if let Some((tracked, id)) = watched.remove(&handle.token_type()) {
                tracked.unwatch_changes(id);
            }
        }
    }
}

/// Calls back whenever a registry's shape or any provided value changes.
///
/// Only subscribes; never creates, provides or disposes anything. Dropping
/// the inspector removes every subscription it made.
pub struct Inspector {
    state: Arc<InspectorState>,
    added_id: ListenerId,
    removed_id: ListenerId,
}

impl Inspector {
    pub fn attach<F>(registry: &Registry, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = Arc::new(InspectorState {
            registry: registry.clone(),
            on_change: Arc::new(on_change),
            watched: Mutex::new(HashMap::new()),
        });

        let weak: Weak<InspectorState> = Arc::downgrade(&state);
        let added_id = registry.on_provider_added(move |handle| {
            if let Some(state) = weak.upgrade() {
                state.track(handle);
                (state.on_change)();
            }
        })?;

        let weak = Arc::downgrade(&state);
        let removed_id = match registry.on_provider_removed(move |handle| {
            if let Some(state) = weak.upgrade() {
                state.untrack(&handle);
                (state.on_change)();
            }
        }) {
            Ok(id) => id,
            Err(e) => {
                registry.remove_provider_added_listener(added_id);
                return Err(e);
            }
        };

        for handle in registry.providers() {
            state.track(handle);
        }
        debug!("Inspector attached to {} providers", state.watched().len());

        Ok(Self {
            state,
            added_id,
            removed_id,
        })
    }

    /// Types whose value changes are currently observed.
    pub fn watched_types(&self) -> Vec<TokenType> {
        self.state.watched().keys().copied().collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state.registry.snapshot()
    }
}

impl Drop for Inspector {
    fn drop(&mut self) {
        let registry = &self.state.registry;
        registry.remove_provider_added_listener(self.added_id);
        registry.remove_provider_removed_listener(self.removed_id);

        let watched: Vec<_> = self.state.watched().drain().map(|(_, v)| v).collect();
        for (handle, id) in watched {
            handle.unwatch_changes(id);
        }
    }
}
