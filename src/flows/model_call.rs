//! Guarded model invocation: rate limiting before every attempt and backoff retries after
//! failures.

// self
use crate::{
	_prelude::*,
	config::AgentConfig,
	ext::{self, FixedIntervalLimiter, RateLimitPolicy},
	flows::{CallScope, ModelCallContext, RequestKey, RetryCoordinator, RetryDecision, RetryPolicyError},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Wraps caller-supplied model calls with a [`RateLimitPolicy`] and a [`RetryCoordinator`].
///
/// The guard is cheap to clone and can be shared by every agent in a process; all per-request
/// bookkeeping lives in the [`CallScope`] passed to [`ModelCallGuard::call`].
#[derive(Clone)]
pub struct ModelCallGuard {
	limiter: Arc<dyn RateLimitPolicy>,
	coordinator: RetryCoordinator,
}
impl ModelCallGuard {
	/// Creates a guard from an explicit limiter and coordinator.
	pub fn new(limiter: Arc<dyn RateLimitPolicy>, coordinator: RetryCoordinator) -> Self {
		Self { limiter, coordinator }
	}

	/// Builds the guard from the configured rate-limit interval and retry policy.
	pub fn from_config(config: &AgentConfig) -> Result<Self, RetryPolicyError> {
		Ok(Self::new(
			Arc::new(FixedIntervalLimiter::new(config.rate_limit_interval)),
			RetryCoordinator::new(config.retry.clone())?,
		))
	}

	/// Returns the retry coordinator.
	pub fn coordinator(&self) -> &RetryCoordinator {
		&self.coordinator
	}

	/// Runs the rate limiter for one attempt and returns the delay it applied.
	pub async fn before_model_call(&self, context: &ModelCallContext) -> Duration {
		ext::before_model_call(self.limiter.as_ref(), context).await
	}

	/// Runs `call` under a fresh [`RequestKey`] until it succeeds or the retry budget is spent.
	///
	/// Each attempt is preceded by the rate limiter. On exhaustion the error returned by the last
	/// attempt is handed back unchanged.
	pub async fn call<T, E, F, Fut>(&self, scope: &mut CallScope, mut call: F) -> Result<T, E>
	where
		E: Display,
		F: FnMut(ModelCallContext) -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		const KIND: FlowKind = FlowKind::ModelCall;

		let key = RequestKey::mint();
		let span = FlowSpan::new(KIND, "call").with_subject(key);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		span.instrument(async move {
			let mut attempt = 0;

			loop {
				let context =
					ModelCallContext::new(key).with_attempt(attempt).with_agent(scope.agent());

				self.before_model_call(&context).await;

				match call(context).await {
					Ok(value) => {
						self.coordinator.on_model_success(scope, key);
						obs::record_flow_outcome(KIND, FlowOutcome::Success);

						return Ok(value);
					},
					Err(err) => match self.coordinator.on_model_error(scope, key, &err).await {
						RetryDecision::Retry { attempt: next, .. } => attempt = next,
						RetryDecision::Propagate { .. } => {
							obs::record_flow_outcome(KIND, FlowOutcome::Failure);

							return Err(err);
						},
					},
				}
			}
		})
		.await
	}
}
impl Default for ModelCallGuard {
	fn default() -> Self {
		Self::new(Arc::new(FixedIntervalLimiter::default()), RetryCoordinator::default())
	}
}
impl Debug for ModelCallGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ModelCallGuard").field("coordinator", &self.coordinator).finish()
	}
}
