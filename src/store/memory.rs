//! Thread-safe in-memory [`TokenStore`] implementation.

// self
use crate::{
	_prelude::*,
	auth::{Audience, IdentityToken},
	store::{StoreError, StoreFuture, TokenStore},
};

type StoreMap = Arc<RwLock<HashMap<Audience, IdentityToken>>>;

/// Process-local token cache keyed by audience.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Returns how many audiences currently have a cached token.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn save_now(map: StoreMap, token: IdentityToken) -> Result<(), StoreError> {
		map.write().insert(token.audience.clone(), token);

		Ok(())
	}

	fn fetch_now(map: StoreMap, audience: &Audience) -> Option<IdentityToken> {
		map.read().get(audience).cloned()
	}

	fn evict_now(map: StoreMap, audience: &Audience) -> Option<IdentityToken> {
		map.write().remove(audience)
	}
}
impl TokenStore for MemoryStore {
	fn save(&self, token: IdentityToken) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_now(map, token) })
	}

	fn fetch<'a>(&'a self, audience: &'a Audience) -> StoreFuture<'a, Option<IdentityToken>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::fetch_now(map, audience)) })
	}

	fn evict<'a>(&'a self, audience: &'a Audience) -> StoreFuture<'a, Option<IdentityToken>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::evict_now(map, audience)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::TokenSource;

	fn token_for(audience: &str, secret: &str) -> IdentityToken {
		let audience = Audience::new(audience).expect("Audience fixture should be valid.");

		IdentityToken::builder(audience, TokenSource::Ambient)
			.secret(secret)
			.expires_in(Duration::minutes(30))
			.build()
			.expect("Token fixture should build.")
	}

	#[tokio::test]
	async fn entries_are_partitioned_by_audience() {
		let store = MemoryStore::default();

		store.save(token_for("https://svc-a.example", "token-a")).await.expect("Save should succeed.");
		store.save(token_for("https://svc-b.example", "token-b")).await.expect("Save should succeed.");

		let svc_a = Audience::new("https://svc-a.example").expect("Audience fixture should be valid.");
		let fetched = store
			.fetch(&svc_a)
			.await
			.expect("Fetch should succeed.")
			.expect("Token for svc-a should be cached.");

		assert_eq!(fetched.secret.expose(), "token-a");
		assert_eq!(store.len(), 2);
	}

	#[tokio::test]
	async fn save_replaces_and_evict_removes() {
		let store = MemoryStore::default();
		let audience = Audience::new("https://svc-a.example").expect("Audience fixture should be valid.");

		store.save(token_for("https://svc-a.example", "old")).await.expect("Save should succeed.");
		store.save(token_for("https://svc-a.example", "new")).await.expect("Save should succeed.");

		let evicted = store.evict(&audience).await.expect("Evict should succeed.");

		assert_eq!(evicted.map(|token| token.secret.expose().to_owned()), Some("new".into()));
		assert!(store.fetch(&audience).await.expect("Fetch should succeed.").is_none());
		assert!(store.is_empty());
	}
}
