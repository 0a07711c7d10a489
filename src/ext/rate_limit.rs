//! Rate limit policy contracts consulted immediately before every model call.

// self
use crate::{
	_prelude::*,
	flows::{ModelCallContext, common},
	obs,
};

/// Boxed future returned by [`RateLimitPolicy::evaluate`].
pub type RateLimitFuture<'a> = Pin<Box<dyn Future<Output = RateLimitDecision> + 'a + Send>>;

/// Strategy that decides whether the next model call must wait.
///
/// Policies never fail; a policy that cannot decide should answer [`RateLimitDecision::Allow`].
pub trait RateLimitPolicy
where
	Self: Send + Sync,
{
	/// Evaluates whether the next call should be delayed.
	fn evaluate<'a>(&'a self, context: &'a ModelCallContext) -> RateLimitFuture<'a>;
}

/// Result emitted by a [`RateLimitPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request may proceed immediately.
	Allow,
	/// The request should be delayed.
	Delay(RetryDirective),
}

/// Advises callers how long to hold a call after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when it is safe to proceed.
	pub earliest_retry_at: OffsetDateTime,
	/// Suggested wait.
	pub recommended_backoff: Duration,
	/// Optional descriptive string.
	pub reason: Option<String>,
}
impl RetryDirective {
	/// Creates a new directive with the provided timing metadata.
	pub fn new(earliest_retry_at: OffsetDateTime, recommended_backoff: Duration) -> Self {
		Self { earliest_retry_at, recommended_backoff, reason: None }
	}

	/// Builds a directive that waits `backoff` starting at `observed_at`.
	pub fn after(observed_at: OffsetDateTime, backoff: Duration) -> Self {
		Self::new(observed_at + backoff, backoff)
	}

	/// Adds a human-readable reason.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}
}

/// Blanket throttle that holds every model call for the same fixed interval.
///
/// There is no per-agent or per-user differentiation; every caller sharing the limiter waits the
/// same amount before its call is dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedIntervalLimiter {
	interval: Duration,
}
impl FixedIntervalLimiter {
	/// Default spacing inserted before each model call.
	pub const DEFAULT_INTERVAL: Duration = Duration::milliseconds(100);

	/// Creates a limiter with the given interval; negative intervals are clamped to zero.
	pub fn new(interval: Duration) -> Self {
		Self { interval: interval.max(Duration::ZERO) }
	}

	/// Returns the configured interval.
	pub fn interval(&self) -> Duration {
		self.interval
	}
}
impl Default for FixedIntervalLimiter {
	fn default() -> Self {
		Self::new(Self::DEFAULT_INTERVAL)
	}
}
impl RateLimitPolicy for FixedIntervalLimiter {
	fn evaluate<'a>(&'a self, context: &'a ModelCallContext) -> RateLimitFuture<'a> {
		Box::pin(async move {
			if self.interval.is_zero() {
				return RateLimitDecision::Allow;
			}

			RateLimitDecision::Delay(
				RetryDirective::after(context.observed_at, self.interval)
					.with_reason("fixed model-call spacing"),
			)
		})
	}
}

/// Consults `policy` and suspends the caller for any delay it requests.
///
/// Returns the delay that was applied ([`Duration::ZERO`] when the call was allowed).
pub async fn before_model_call<P>(policy: &P, context: &ModelCallContext) -> Duration
where
	P: ?Sized + RateLimitPolicy,
{
	match policy.evaluate(context).await {
		RateLimitDecision::Allow => Duration::ZERO,
		RateLimitDecision::Delay(directive) => {
			obs::event!(
				debug,
				request = %context.request_key,
				attempt = context.attempt,
				delay_ms = directive.recommended_backoff.whole_milliseconds() as u64,
				reason = directive.reason.as_deref().unwrap_or("-"),
				"Rate limiter delaying model call."
			);
			common::suspend(directive.recommended_backoff).await;

			directive.recommended_backoff
		},
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::flows::RequestKey;

	struct AlwaysAllow;
	impl RateLimitPolicy for AlwaysAllow {
		fn evaluate<'a>(&'a self, _: &'a ModelCallContext) -> RateLimitFuture<'a> {
			Box::pin(async { RateLimitDecision::Allow })
		}
	}

	#[tokio::test]
	async fn fixed_interval_always_delays() {
		let limiter = FixedIntervalLimiter::default();
		let context = ModelCallContext::new(RequestKey::mint());
		let decision = limiter.evaluate(&context).await;

		match decision {
			RateLimitDecision::Delay(directive) => {
				assert_eq!(directive.recommended_backoff, Duration::milliseconds(100));
				assert_eq!(
					directive.earliest_retry_at,
					context.observed_at + Duration::milliseconds(100)
				);
				assert!(directive.reason.is_some());
			},
			RateLimitDecision::Allow => panic!("Fixed interval limiter should delay."),
		}
	}

	#[test]
	fn negative_interval_is_clamped() {
		assert_eq!(FixedIntervalLimiter::new(Duration::seconds(-1)).interval(), Duration::ZERO);
	}

	#[tokio::test(start_paused = true)]
	async fn before_model_call_blocks_for_interval() {
		let limiter = FixedIntervalLimiter::default();
		let context = ModelCallContext::new(RequestKey::mint());
		let started = tokio::time::Instant::now();
		let applied = before_model_call(&limiter, &context).await;

		assert_eq!(applied, Duration::milliseconds(100));
		assert!(started.elapsed() >= std::time::Duration::from_millis(100));
	}

	#[tokio::test(start_paused = true)]
	async fn allow_and_zero_interval_do_not_wait() {
		let context = ModelCallContext::new(RequestKey::mint());
		let started = tokio::time::Instant::now();

		assert_eq!(before_model_call(&AlwaysAllow, &context).await, Duration::ZERO);
		assert_eq!(
			before_model_call(&FixedIntervalLimiter::new(Duration::ZERO), &context).await,
			Duration::ZERO
		);
		assert_eq!(started.elapsed(), std::time::Duration::ZERO);
	}
}
