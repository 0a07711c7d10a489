//! Optional per-audience identity token cache.
//!
//! Caching is strictly keyed by [`Audience`]: a token minted for one tool service is never handed
//! to another, even when both are called under the same identity.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Audience, IdentityToken},
};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for cached identity tokens.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the token cached for its audience.
	fn save(&self, token: IdentityToken) -> StoreFuture<'_, ()>;

	/// Fetches the token cached for `audience`, if present.
	fn fetch<'a>(&'a self, audience: &'a Audience) -> StoreFuture<'a, Option<IdentityToken>>;

	/// Removes the token cached for `audience`, returning it when one existed.
	fn evict<'a>(&'a self, audience: &'a Audience) -> StoreFuture<'a, Option<IdentityToken>>;
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StoreError {
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
