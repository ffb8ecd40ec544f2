//! Integration tests for registries, providers and tokens through the public
//! interface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokenwell::{InjectorError, Registry, Token, TokenSource, TokenType};

#[derive(Debug, Clone, PartialEq)]
struct Foo(u32);

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    difficulty: u8,
}

fn record<T: tokenwell::TokenValue>(registry: &Registry) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry
        .add_token_listener::<T, _>(move |value| sink.lock().unwrap().push(value))
        .unwrap();
    seen
}

#[test]
fn test_for_type_returns_identical_provider() {
    let registry = Registry::new();
    let first = registry.for_type::<Foo>().unwrap();
    let second = registry.for_type::<Foo>().unwrap();

    assert!(first.same_provider(&second));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_provide_rules() {
    let registry = Registry::new();
    let seen = record::<Foo>(&registry);
    let provider = registry.for_type::<Foo>().unwrap();

    assert!(provider.provide(Token::new(Foo(1))).unwrap());
    assert!(!provider.provide(Token::new(Foo(2))).unwrap());
    assert_eq!(provider.value(), Some(Foo(1)));

    provider.provide_with_overwrite(Token::new(Foo(3))).unwrap();
    assert_eq!(provider.value(), Some(Foo(3)));
    assert_eq!(*seen.lock().unwrap(), vec![Foo(1), Foo(3)]);
}

#[test]
fn test_overwrite_disposes_previous_token() {
    let registry = Registry::new();
    let provider = registry.for_type::<Foo>().unwrap();
    let first = Token::new(Foo(1));
    provider.provide(first.clone()).unwrap();

    provider.provide_with_overwrite(Token::new(Foo(2))).unwrap();
    assert!(first.is_disposed());
}

#[test]
fn test_token_dispose_clears_provider() {
    let registry = Registry::new();
    let provider = registry.for_type::<Foo>().unwrap();
    let token = Token::new(Foo(1));
    provider.provide(token.clone()).unwrap();

    token.dispose();

    assert!(!provider.has_token());
    assert_eq!(registry.token_value::<Foo>().unwrap(), None);
    // The slot is free again.
    assert!(provider.provide(Token::new(Foo(2))).unwrap());
}

#[test]
fn test_disposed_token_cannot_be_provided() {
    let registry = Registry::new();
    let token = Token::new(Foo(1));
    token.dispose();

    let err = registry.for_type::<Foo>().unwrap().provide(token).unwrap_err();
    assert!(matches!(err, InjectorError::TokenDisposed { .. }));
}

#[test]
fn test_provider_dispose_removes_it_from_registry() {
    let registry = Registry::new();
    let provider = registry.for_type::<Foo>().unwrap();
    provider.dispose();

    assert!(!registry.contains(&provider));
    let fresh = registry.for_type::<Foo>().unwrap();
    assert!(!fresh.same_provider(&provider));
    assert!(matches!(
        provider.provide(Token::new(Foo(1))),
        Err(InjectorError::ProviderDisposed { .. })
    ));
}

#[test]
fn test_listen_provide_clear_scenario() {
    let registry = Registry::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let provider = registry.for_type::<Foo>().unwrap();
    provider
        .add_listener(move |foo| sink.lock().unwrap().push(foo))
        .unwrap();

    provider.provide(Token::new(Foo(42))).unwrap();
    assert_eq!(*calls.lock().unwrap(), vec![Foo(42)]);

    registry.clear();
    assert!(!registry.contains(&provider));
    assert!(!registry.for_type::<Foo>().unwrap().has_token());
}

#[test]
fn test_collection_events() {
    let registry = Registry::new();
    let added = Arc::new(Mutex::new(Vec::new()));
    let removed = Arc::new(AtomicUsize::new(0));
    let added_sink = added.clone();
    let removed_counter = removed.clone();
    registry
        .on_provider_added(move |handle| added_sink.lock().unwrap().push(handle.token_type()))
        .unwrap();
    registry
        .on_provider_removed(move |_| {
            removed_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    registry.for_type::<Foo>().unwrap();
    registry.for_type::<Settings>().unwrap();
    registry.for_type::<Foo>().unwrap();
    registry.clear();

    assert_eq!(
        *added.lock().unwrap(),
        vec![TokenType::of::<Foo>(), TokenType::of::<Settings>()]
    );
    assert_eq!(removed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_disposed_registry_rejects_use() {
    let registry = Registry::new();
    registry.for_type::<Foo>().unwrap();
    registry.dispose();
    registry.dispose();

    assert!(registry.is_empty());
    assert!(matches!(
        registry.for_type::<Foo>(),
        Err(InjectorError::RegistryDisposed)
    ));
}

#[test]
fn test_lazy_token_reads_accessor_each_time() {
    let registry = Registry::new();
    let difficulty = Arc::new(AtomicUsize::new(1));
    let source = difficulty.clone();
    let token = Token::from_fn(move || Settings {
        difficulty: source.load(Ordering::SeqCst) as u8,
    });
    registry.for_type::<Settings>().unwrap().provide(token).unwrap();

    difficulty.store(3, Ordering::SeqCst);
    assert_eq!(
        registry.token_value::<Settings>().unwrap(),
        Some(Settings { difficulty: 3 })
    );
}

#[test]
fn test_token_source_scopes_provision() {
    let injector = tokenwell::Injector::default();
    let seen = record::<Settings>(injector.registry());
    {
        let _source =
            TokenSource::provide(&injector, Token::new(Settings { difficulty: 2 })).unwrap();
        assert_eq!(
            injector.get::<Settings>().unwrap(),
            Some(Settings { difficulty: 2 })
        );
    }

    assert_eq!(injector.get::<Settings>().unwrap(), None);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_snapshot_reflects_registry() {
    let registry = Registry::new();
    registry
        .for_type::<Foo>()
        .unwrap()
        .provide(Token::new(Foo(5)))
        .unwrap();
    let _ = record::<Settings>(&registry);

    let snapshot = registry.snapshot();
    let foo = snapshot.find("Foo").unwrap();
    assert_eq!(foo.value.as_deref(), Some("Foo(5)"));
    let settings = snapshot.find("Settings").unwrap();
    assert!(!settings.has_token);
    assert_eq!(settings.listener_count, 1);
}
