//! Shared helpers for model-call flows (request keys, call-scoped state, suspension).

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{_prelude::*, flows::RetryState};

static NEXT_REQUEST_KEY: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one logical model request.
///
/// Keys come from a process-wide monotonic counter, so two requests alive at the same time never
/// share a key and a finished request's key is never handed out again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey(u64);
impl RequestKey {
	/// Mints a fresh key.
	pub fn mint() -> Self {
		Self(NEXT_REQUEST_KEY.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw counter value.
	pub fn get(self) -> u64 {
		self.0
	}
}
impl Display for RequestKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "req-{}", self.0)
	}
}

/// Per-invocation storage owned by one agent run.
///
/// Retry bookkeeping lives here rather than in process-wide state; concurrent agent invocations
/// each hold their own scope and never observe each other's entries.
#[derive(Debug, Default)]
pub struct CallScope {
	agent: Option<String>,
	retries: HashMap<RequestKey, RetryState>,
}
impl CallScope {
	/// Creates an empty scope.
	pub fn new() -> Self {
		Self::default()
	}

	/// Tags the scope with the agent name used in logs and call contexts.
	pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
		self.agent = Some(agent.into());

		self
	}

	/// Returns the agent name, if set.
	pub fn agent(&self) -> Option<&str> {
		self.agent.as_deref()
	}

	/// Returns the retry state tracked for `key`, if any.
	pub fn retry_state(&self, key: RequestKey) -> Option<&RetryState> {
		self.retries.get(&key)
	}

	/// Returns how many requests currently have retry state.
	pub fn tracked_requests(&self) -> usize {
		self.retries.len()
	}

	pub(crate) fn retry_entry(
		&mut self,
		key: RequestKey,
		init: impl FnOnce() -> RetryState,
	) -> &mut RetryState {
		self.retries.entry(key).or_insert_with(init)
	}

	pub(crate) fn clear_retry(&mut self, key: RequestKey) -> Option<RetryState> {
		self.retries.remove(&key)
	}
}

/// Context handed to the rate limiter and the model-call closure for one attempt.
#[derive(Clone, Debug)]
pub struct ModelCallContext {
	/// Logical request this attempt belongs to.
	pub request_key: RequestKey,
	/// Zero-based attempt number within the request.
	pub attempt: u32,
	/// Agent that issued the call, if known.
	pub agent: Option<String>,
	/// Timestamp observed before the rate limiter ran.
	pub observed_at: OffsetDateTime,
}
impl ModelCallContext {
	/// Creates a context for the first attempt of `request_key`.
	pub fn new(request_key: RequestKey) -> Self {
		Self { request_key, attempt: 0, agent: None, observed_at: OffsetDateTime::now_utc() }
	}

	/// Overrides the attempt number.
	pub fn with_attempt(mut self, attempt: u32) -> Self {
		self.attempt = attempt;

		self
	}

	/// Tags the context with an agent name.
	pub fn with_agent(mut self, agent: Option<&str>) -> Self {
		self.agent = agent.map(str::to_owned);

		self
	}
}

/// Suspends the current task for `delay`; non-positive delays return immediately.
pub(crate) async fn suspend(delay: Duration) {
	match std::time::Duration::try_from(delay) {
		Ok(std_delay) if !std_delay.is_zero() => tokio::time::sleep(std_delay).await,
		_ => {},
	}
}
