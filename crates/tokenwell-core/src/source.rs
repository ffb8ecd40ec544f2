//! Scoped provisioning: a token that stays provided while a guard is alive.

use tracing::debug;

use crate::error::{InjectorError, Result};
use crate::injector::Injector;
use crate::provider::TokenProvider;
use crate::token::{Token, TokenValue};

/// Owns one provided token and disposes it when dropped.
///
/// Only the guard's own token is ever disposed. If another source has since
/// overwritten it, withdrawing leaves the newer token in place.
pub struct TokenSource<T: TokenValue> {
    provider: TokenProvider<T>,
    token: Option<Token<T>>,
}

impl<T: TokenValue> TokenSource<T> {
    /// Provide `token` if nothing is provided yet.
    pub fn provide(injector: &Injector, token: Token<T>) -> Result<Self> {
        let provider = injector.provider::<T>()?;
        if !provider.provide(token.clone())? {
            return Err(InjectorError::AlreadyProvided {
                token_type: provider.token_type(),
            });
        }
        Ok(Self {
            provider,
            token: Some(token),
        })
    }

    /// Provide `token`, disposing whatever was provided before.
    pub fn replace(injector: &Injector, token: Token<T>) -> Result<Self> {
        let provider = injector.provider::<T>()?;
        provider.provide_with_overwrite(token.clone())?;
        Ok(Self {
            provider,
            token: Some(token),
        })
    }

    pub fn token(&self) -> Option<&Token<T>> {
        self.token.as_ref()
    }

    /// Whether the guarded token is still the provider's current one.
    pub fn is_current(&self) -> bool {
        match (&self.token, self.provider.token()) {
            (Some(own), Some(current)) => own.same_token(&current),
            _ => false,
        }
    }

    /// Dispose the guarded token now. Idempotent.
    pub fn withdraw(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        token.dispose();
        debug!("Withdrew token {} for {}", token.id(), token.token_type());
    }
}

impl<T: TokenValue> Drop for TokenSource<T> {
    fn drop(&mut self) {
        self.withdraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Camera(&'static str);

    #[test]
    fn test_drop_withdraws_token() {
        let injector = Injector::default();
        {
            let source = TokenSource::provide(&injector, Token::new(Camera("main"))).unwrap();
            assert!(source.is_current());
            assert_eq!(injector.get::<Camera>().unwrap(), Some(Camera("main")));
        }
        assert_eq!(injector.get::<Camera>().unwrap(), None);
    }

    #[test]
    fn test_provide_rejects_occupied_slot() {
        let injector = Injector::default();
        let _first = TokenSource::provide(&injector, Token::new(Camera("main"))).unwrap();
        let err = TokenSource::provide(&injector, Token::new(Camera("debug")))
            .err()
            .unwrap();

        assert!(matches!(err, InjectorError::AlreadyProvided { .. }));
        assert_eq!(injector.get::<Camera>().unwrap(), Some(Camera("main")));
    }

    #[test]
    fn test_withdraw_leaves_newer_token() {
        let injector = Injector::default();
        let mut first = TokenSource::provide(&injector, Token::new(Camera("main"))).unwrap();
        let second = TokenSource::replace(&injector, Token::new(Camera("debug"))).unwrap();

        assert!(!first.is_current());
        // Displacement already disposed the first token.
        assert!(first.token().is_some_and(|token| token.is_disposed()));
        first.withdraw();
        assert!(second.is_current());
        assert_eq!(injector.get::<Camera>().unwrap(), Some(Camera("debug")));
    }

    #[test]
    fn test_withdraw_is_idempotent() {
        let injector = Injector::default();
        let mut source = TokenSource::provide(&injector, Token::new(Camera("main"))).unwrap();
        source.withdraw();
        source.withdraw();
        assert!(source.token().is_none());
        assert!(!injector.provider::<Camera>().unwrap().has_token());
    }
}
