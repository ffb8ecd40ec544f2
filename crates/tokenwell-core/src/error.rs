//! Error types for tokenwell.
//!
//! Every variant here is a usage error: a programmer mistake surfaced at the
//! call site. Absence of a token and bounded-wait timeouts are ordinary
//! outcomes and are reported through return values instead.

use thiserror::Error;

use crate::token::{TokenId, TokenType};

/// Main error type for the registry, providers, watchers and waits.
#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("Registry cannot be used after it has been disposed")]
    RegistryDisposed,

    #[error("Provider for {token_type} cannot be used after it has been disposed")]
    ProviderDisposed { token_type: TokenType },

    #[error("Token {token_id} for {token_type} was disposed before it could be provided")]
    TokenDisposed {
        token_type: TokenType,
        token_id: TokenId,
    },

    #[error("A token for {token_type} is already provided")]
    AlreadyProvided { token_type: TokenType },

    #[error("Consumer context '{consumer}' cannot assign duplicate watcher for {token_type}")]
    DuplicateWatcher {
        consumer: String,
        token_type: TokenType,
    },

    #[error("Consumer context '{consumer}' cannot be used after it has been disposed")]
    ContextDisposed { consumer: String },

    #[error("Tick source closed while waiting for {token_type}")]
    TickSourceClosed { token_type: TokenType },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for tokenwell operations.
pub type Result<T> = std::result::Result<T, InjectorError>;

impl From<serde_json::Error> for InjectorError {
    fn from(err: serde_json::Error) -> Self {
        InjectorError::Config {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl InjectorError {
    /// Whether this error is a programmer mistake in consumer or provider code.
    ///
    /// Configuration and tick-source failures come from the host environment
    /// rather than from misuse of the registry API.
    pub fn is_usage_error(&self) -> bool {
        !matches!(
            self,
            InjectorError::Config { .. } | InjectorError::TickSourceClosed { .. }
        )
    }

    /// The token type this error concerns, if any.
    pub fn token_type(&self) -> Option<TokenType> {
        match self {
            InjectorError::ProviderDisposed { token_type }
            | InjectorError::TokenDisposed { token_type, .. }
            | InjectorError::AlreadyProvided { token_type }
            | InjectorError::DuplicateWatcher { token_type, .. }
            | InjectorError::TickSourceClosed { token_type } => Some(*token_type),
            _ => None,
        }
    }
}
