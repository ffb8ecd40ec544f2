//! Tokenwell - type-keyed dependency registry with bounded, frame-driven waits.
//!
//! Producers provide a [`Token`] for a value type; consumers read it, watch
//! it, or require it within a time budget measured in host frames. Each value
//! type has exactly one [`TokenProvider`] per [`Registry`], created on first
//! access.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tokenwell::{ConsumerContext, Injector, Token};
//!
//! #[derive(Debug, Clone)]
//! struct Audio { volume: u8 }
//!
//! #[tokio::main]
//! async fn main() -> tokenwell::Result<()> {
//!     let injector = Injector::default();
//!     let mut hud = ConsumerContext::new(injector.clone(), "hud");
//!     hud.inject::<Audio, _>(|audio| println!("volume {}", audio.volume), Duration::from_secs(2))?;
//!
//!     injector.provide(Token::new(Audio { volume: 7 }))?;
//!     injector.clock().advance(Duration::from_millis(16));
//!
//!     for report in hud.settle().await {
//!         println!("{} satisfied: {}", report.token_type, report.is_satisfied());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod injector;
pub mod inspect;
pub mod lifetime;
pub mod listeners;
pub mod provider;
pub mod registry;
pub mod require;
pub mod schedule;
pub mod source;
pub mod token;
pub mod watcher;

// Re-export commonly used types
pub use config::{InjectorSettings, RequireConfig, TickConfig};
pub use context::{ConsumerContext, RequireReport};
pub use error::{InjectorError, Result};
pub use injector::{Injector, InjectorBuilder, RequireAndWatch};
pub use inspect::{Inspector, ProviderSnapshot, RegistrySnapshot};
pub use lifetime::Lifetime;
pub use listeners::{Listener, ListenerId};
pub use provider::{AnyProvider, ProviderHandle, TokenProvider};
pub use registry::Registry;
pub use require::{wait_until, BoundedWait, Resolution, WaitState, WaitStep};
pub use schedule::{FrameClock, FrameStamp, FrameTicks, IntervalTicker, TickSource};
pub use source::TokenSource;
pub use token::{Token, TokenId, TokenType, TokenValue};
pub use watcher::{TokenWatcher, Watcher};
