//! Audience-scoped identity token minting.
//!
//! [`IdentityTokenMinter`] walks an ordered list of [`CredentialStrategy`] implementations and
//! returns the first token any of them produces. Every failure is recorded; when all strategies
//! fail the caller receives either [`Error::CredentialsUnavailable`] (the last strategy found no
//! credentials at all) or [`Error::TokenFetchFailed`] (credentials exist but minting broke), both
//! carrying the full attempt list in order.
//!
//! Tokens are minted fresh on every call unless a [`TokenStore`] is attached with
//! [`IdentityTokenMinter::with_store`]; the cache is keyed strictly by [`Audience`] and guarded by
//! a per-audience singleflight lock.

pub mod ambient;
pub mod impersonated;

pub use ambient::*;
pub use impersonated::*;

// self
use crate::{
	_prelude::*,
	auth::{Audience, IdentityToken},
	config::AgentConfig,
	error::{CREDENTIALS_REMEDIATION, ConfigError, StrategyFailure, StrategyFailures},
	http::ReqwestHttpClient,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::TokenStore,
};

/// Boxed future returned by [`CredentialStrategy::mint`].
pub type MintFuture<'a> = Pin<Box<dyn Future<Output = Result<IdentityToken>> + 'a + Send>>;

/// One way of obtaining an identity token for an audience.
///
/// Strategies report "nothing to work with here" as [`Error::Unavailable`] so the minter can tell
/// missing credentials apart from broken ones.
pub trait CredentialStrategy
where
	Self: Send + Sync,
{
	/// Stable label used in logs and aggregated failures.
	fn label(&self) -> &'static str;

	/// Mints a token whose audience claim is `audience`.
	fn mint<'a>(&'a self, audience: &'a Audience) -> MintFuture<'a>;
}

type AudienceGuards = Arc<Mutex<HashMap<Audience, Arc<AsyncMutex<()>>>>>;

/// Mints identity tokens by trying each configured strategy in order.
#[derive(Clone)]
pub struct IdentityTokenMinter {
	strategies: Vec<Arc<dyn CredentialStrategy>>,
	store: Option<Arc<dyn TokenStore>>,
	preemptive_window: Duration,
	guards: AudienceGuards,
}
impl IdentityTokenMinter {
	/// Cached tokens expiring within this window are re-minted.
	pub const DEFAULT_PREEMPTIVE_WINDOW: Duration = Duration::seconds(60);

	/// Creates a minter that tries `strategies` in the given order.
	pub fn with_strategies(strategies: Vec<Arc<dyn CredentialStrategy>>) -> Self {
		Self {
			strategies,
			store: None,
			preemptive_window: Self::DEFAULT_PREEMPTIVE_WINDOW,
			guards: Default::default(),
		}
	}

	/// Builds the standard chain: the impersonation CLI (only when a service account is
	/// configured) followed by ambient default credentials.
	pub fn from_config(config: &AgentConfig, http_client: ReqwestHttpClient) -> Self {
		let mut strategies: Vec<Arc<dyn CredentialStrategy>> = Vec::with_capacity(2);

		if let Some(account) = &config.impersonate_service_account {
			strategies.push(Arc::new(ImpersonatedCliStrategy::new(account.clone())));
		}

		strategies.push(Arc::new(AmbientStrategy::from_config(config, http_client)));

		Self::with_strategies(strategies)
	}

	/// Enables per-audience caching through `store`.
	pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Overrides how long before expiry a cached token is replaced; negative values become zero.
	pub fn with_preemptive_window(mut self, window: Duration) -> Self {
		self.preemptive_window = window.max(Duration::ZERO);

		self
	}

	/// Returns the labels of the configured strategies, in order.
	pub fn strategy_labels(&self) -> Vec<&'static str> {
		self.strategies.iter().map(|strategy| strategy.label()).collect()
	}

	/// Mints (or reuses a cached) identity token for `audience`.
	pub async fn mint(&self, audience: &Audience) -> Result<IdentityToken> {
		const KIND: FlowKind = FlowKind::TokenMint;

		let span = FlowSpan::new(KIND, "mint").with_subject(audience);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				match &self.store {
					Some(store) => self.mint_cached(store.as_ref(), audience).await,
					None => self.mint_uncached(audience).await,
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Parses `audience` and mints a token for it.
	///
	/// Text that is not a valid audience fails with [`Error::TokenFetchFailed`].
	pub async fn mint_for_str(&self, audience: &str) -> Result<IdentityToken> {
		match Audience::new(audience) {
			Ok(parsed) => self.mint(&parsed).await,
			Err(err) => Err(Error::TokenFetchFailed {
				audience: audience.to_owned(),
				attempts: StrategyFailures(vec![StrategyFailure {
					strategy: "audience",
					error: ConfigError::from(err).into(),
				}]),
			}),
		}
	}

	/// Mints a token and renders it as an `Authorization` header value.
	pub async fn bearer_for(&self, audience: &Audience) -> Result<String> {
		Ok(self.mint(audience).await?.bearer())
	}

	async fn mint_cached(&self, store: &dyn TokenStore, audience: &Audience) -> Result<IdentityToken> {
		let guard = self.audience_guard(audience);
		let _singleflight = guard.lock().await;
		let now = OffsetDateTime::now_utc();

		match store.fetch(audience).await {
			Ok(Some(token)) if self.is_reusable(&token, audience, now) => return Ok(token),
			Ok(Some(_)) =>
				if let Err(_err) = store.evict(audience).await {
					obs::event!(warn, audience = %audience, error = %_err, "Token cache eviction failed.");
				},
			Ok(None) => {},
			Err(_err) => {
				obs::event!(warn, audience = %audience, error = %_err, "Token cache lookup failed.");
			},
		}

		let token = self.mint_uncached(audience).await?;

		if let Err(_err) = store.save(token.clone()).await {
			obs::event!(warn, audience = %audience, error = %_err, "Token cache write failed.");
		}

		Ok(token)
	}

	async fn mint_uncached(&self, audience: &Audience) -> Result<IdentityToken> {
		let mut failures = Vec::with_capacity(self.strategies.len());

		for strategy in &self.strategies {
			match strategy.mint(audience).await {
				Ok(token) => {
					obs::event!(
						debug,
						audience = %audience,
						strategy = strategy.label(),
						"Identity token minted."
					);

					return Ok(token);
				},
				Err(err) => {
					obs::event!(
						debug,
						audience = %audience,
						strategy = strategy.label(),
						error = %err,
						"Credential strategy failed; trying the next one."
					);

					failures.push(StrategyFailure { strategy: strategy.label(), error: err });
				},
			}
		}

		Err(classify_failures(audience, StrategyFailures(failures)))
	}

	fn is_reusable(&self, token: &IdentityToken, audience: &Audience, now: OffsetDateTime) -> bool {
		if !token.is_valid_for(audience) || token.is_expired_at(now) {
			return false;
		}

		token.expires_at - now > self.preemptive_window
	}

	fn audience_guard(&self, audience: &Audience) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(audience.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for IdentityTokenMinter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdentityTokenMinter")
			.field("strategies", &self.strategy_labels())
			.field("cached", &self.store.is_some())
			.field("preemptive_window", &self.preemptive_window)
			.finish()
	}
}

fn classify_failures(audience: &Audience, attempts: StrategyFailures) -> Error {
	let unavailable = attempts.last().map(|failure| failure.error.is_unavailable()).unwrap_or(true);

	if unavailable {
		Error::CredentialsUnavailable { remediation: CREDENTIALS_REMEDIATION, attempts }
	} else {
		Error::TokenFetchFailed { audience: audience.to_string(), attempts }
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::{
		auth::{TokenSource, token::record::fake_jwt},
		error::CliError,
		store::MemoryStore,
	};

	enum Outcome {
		Token,
		Unavailable,
		Broken,
	}

	struct ScriptedStrategy {
		label: &'static str,
		outcome: Outcome,
		calls: AtomicUsize,
	}
	impl ScriptedStrategy {
		fn new(label: &'static str, outcome: Outcome) -> Arc<Self> {
			Arc::new(Self { label, outcome, calls: AtomicUsize::new(0) })
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl CredentialStrategy for ScriptedStrategy {
		fn label(&self) -> &'static str {
			self.label
		}

		fn mint<'a>(&'a self, audience: &'a Audience) -> MintFuture<'a> {
			Box::pin(async move {
				let call = self.calls.fetch_add(1, Ordering::SeqCst);

				match self.outcome {
					Outcome::Token => {
						let exp = (OffsetDateTime::now_utc() + Duration::hours(1)).unix_timestamp();

						Ok(IdentityToken::builder(audience.clone(), TokenSource::Ambient)
							.secret(format!("{}#{call}", fake_jwt(audience, exp)))
							.build()
							.map_err(ConfigError::from)?)
					},
					Outcome::Unavailable => Err(Error::Unavailable {
						strategy: self.label,
						reason: "nothing configured".into(),
					}),
					Outcome::Broken => {
						Err(CliError::EmptyOutput { program: "gcloud".into() }.into())
					},
				}
			})
		}
	}

	fn audience(value: &str) -> Audience {
		Audience::new(value).expect("Audience fixture should be valid.")
	}

	fn minter(strategies: Vec<Arc<ScriptedStrategy>>) -> IdentityTokenMinter {
		IdentityTokenMinter::with_strategies(
			strategies.into_iter().map(|s| s as Arc<dyn CredentialStrategy>).collect(),
		)
	}

	#[tokio::test]
	async fn first_success_wins() {
		let first = ScriptedStrategy::new("impersonated", Outcome::Broken);
		let second = ScriptedStrategy::new("ambient", Outcome::Token);
		let third = ScriptedStrategy::new("unused", Outcome::Token);
		let minter = minter(vec![first.clone(), second.clone(), third.clone()]);
		let token = minter.mint(&audience("https://svc-a.example")).await.expect("Mint should succeed.");

		assert!(token.is_valid_for(&audience("https://svc-a.example")));
		assert_eq!((first.calls(), second.calls(), third.calls()), (1, 1, 0));
	}

	#[tokio::test]
	async fn missing_credentials_become_credentials_unavailable() {
		let minter = minter(vec![
			ScriptedStrategy::new("impersonated", Outcome::Broken),
			ScriptedStrategy::new("ambient", Outcome::Unavailable),
		]);
		let err = minter
			.mint(&audience("https://svc-a.example"))
			.await
			.expect_err("Mint should fail without credentials.");

		match err {
			Error::CredentialsUnavailable { remediation, attempts } => {
				assert!(remediation.contains("GOOGLE_APPLICATION_CREDENTIALS"));
				assert_eq!(
					attempts.iter().map(|failure| failure.strategy).collect::<Vec<_>>(),
					vec!["impersonated", "ambient"]
				);
			},
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[tokio::test]
	async fn broken_last_strategy_becomes_token_fetch_failed() {
		let minter = minter(vec![ScriptedStrategy::new("ambient", Outcome::Broken)]);
		let err = minter
			.mint(&audience("https://svc-a.example"))
			.await
			.expect_err("Mint should fail.");

		assert!(matches!(
			err,
			Error::TokenFetchFailed { ref audience, ref attempts }
				if audience == "https://svc-a.example" && attempts.len() == 1
		));
	}

	#[tokio::test]
	async fn empty_chain_is_credentials_unavailable() {
		let err = IdentityTokenMinter::with_strategies(Vec::new())
			.mint(&audience("https://svc-a.example"))
			.await
			.expect_err("Mint should fail without strategies.");

		assert!(err.is_unavailable());
	}

	#[tokio::test]
	async fn metadata_chain_without_a_metadata_server_is_unavailable() {
		let server = httpmock::MockServer::start_async().await;
		let err = crate::_preludet::build_metadata_test_minter(&server.base_url())
			.mint(&audience("https://svc-a.example"))
			.await
			.expect_err("A server without the metadata flavor header should not mint.");

		assert!(matches!(err, Error::CredentialsUnavailable { .. }));
	}

	#[tokio::test]
	async fn invalid_audience_text_is_token_fetch_failed() {
		let minter = minter(vec![ScriptedStrategy::new("ambient", Outcome::Token)]);
		let err = minter.mint_for_str("").await.expect_err("Blank audience should fail.");

		assert!(matches!(err, Error::TokenFetchFailed { .. }));
	}

	#[tokio::test]
	async fn uncached_minter_mints_every_call() {
		let strategy = ScriptedStrategy::new("ambient", Outcome::Token);
		let minter = minter(vec![strategy.clone()]);
		let target = audience("https://svc-a.example");
		let first = minter.mint(&target).await.expect("First mint should succeed.");
		let second = minter.mint(&target).await.expect("Second mint should succeed.");

		assert_ne!(first.secret, second.secret);
		assert_eq!(strategy.calls(), 2);
	}

	#[tokio::test]
	async fn cache_is_partitioned_by_audience() {
		let strategy = ScriptedStrategy::new("ambient", Outcome::Token);
		let minter = minter(vec![strategy.clone()]).with_store(Arc::new(MemoryStore::default()));
		let svc_a = audience("https://svc-a.example");
		let svc_b = audience("https://svc-b.example");
		let a1 = minter.mint(&svc_a).await.expect("Mint for svc-a should succeed.");
		let b1 = minter.mint(&svc_b).await.expect("Mint for svc-b should succeed.");
		let a2 = minter.mint(&svc_a).await.expect("Cached mint for svc-a should succeed.");

		assert_eq!(a1.secret, a2.secret);
		assert_ne!(a1.secret, b1.secret);
		assert!(b1.is_valid_for(&svc_b));
		assert!(!b1.is_valid_for(&svc_a));
		assert_eq!(strategy.calls(), 2);
	}

	#[tokio::test]
	async fn stale_cached_tokens_are_evicted_even_when_minting_fails() {
		let target = audience("https://svc-a.example");
		let store = Arc::new(MemoryStore::default());
		let now = OffsetDateTime::now_utc();
		let stale = IdentityToken::builder(target.clone(), TokenSource::Ambient)
			.secret("expired-token")
			.minted_at(now - Duration::hours(2))
			.expires_at(now - Duration::hours(1))
			.build()
			.expect("Stale token fixture should build.");

		store.save(stale).await.expect("Seeding the cache should succeed.");

		let minter = minter(vec![ScriptedStrategy::new("ambient", Outcome::Broken)])
			.with_store(store.clone());
		let err = minter.mint(&target).await.expect_err("Broken strategy should not mint.");

		assert!(matches!(err, Error::TokenFetchFailed { .. }));
		assert!(store.is_empty());
	}

	#[tokio::test]
	async fn tokens_inside_the_preemptive_window_are_reminted() {
		let strategy = ScriptedStrategy::new("ambient", Outcome::Token);
		let minter = minter(vec![strategy.clone()])
			.with_store(Arc::new(MemoryStore::default()))
			.with_preemptive_window(Duration::hours(2));
		let target = audience("https://svc-a.example");

		minter.mint(&target).await.expect("First mint should succeed.");
		minter.mint(&target).await.expect("Second mint should succeed.");

		assert_eq!(strategy.calls(), 2);
	}
}
