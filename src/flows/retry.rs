//! Exponential-backoff retry coordination for failed model calls.
//!
//! [`RetryCoordinator::on_model_error`] is the callback the agent runtime invokes when a model
//! call fails. The first failure of a request creates a [`RetryState`] in the caller's
//! [`CallScope`]; every failure then either advances the state (suspend for the current delay,
//! grow the delay by the multiplier up to the cap, answer [`RetryDecision::Retry`]) or, once
//! `max_attempts - 1` retries have been spent, removes the state and answers
//! [`RetryDecision::Propagate`] so the caller re-raises its original error. The coordinator never
//! produces an error of its own.

// self
use crate::{
	_prelude::*,
	flows::{CallScope, RequestKey, common},
	obs::{self, FlowKind, FlowOutcome},
};

/// Errors raised while validating a [`RetryPolicy`].
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum RetryPolicyError {
	/// At least one attempt is required.
	#[error("max_attempts must be at least 1.")]
	ZeroAttempts,
	/// Delays cannot be negative.
	#[error("Retry delays must not be negative.")]
	NegativeDelay,
	/// The initial delay exceeds the cap.
	#[error("initial_delay must not exceed max_delay.")]
	InitialAboveMax,
	/// The multiplier must keep delays non-decreasing.
	#[error("multiplier must be a finite number >= 1.0, got {0}.")]
	InvalidMultiplier(f64),
}

/// Backoff parameters shared by every request an agent issues.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
	/// Total attempts per request, including the first call.
	pub max_attempts: u32,
	/// Delay before the first retry.
	pub initial_delay: Duration,
	/// Upper bound for any single delay.
	pub max_delay: Duration,
	/// Factor applied to the delay after each retry.
	pub multiplier: f64,
}
impl RetryPolicy {
	/// Default attempt budget.
	pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
	/// Default first delay.
	pub const DEFAULT_INITIAL_DELAY: Duration = Duration::milliseconds(100);
	/// Default delay cap.
	pub const DEFAULT_MAX_DELAY: Duration = Duration::seconds(10);
	/// Default growth factor.
	pub const DEFAULT_MULTIPLIER: f64 = 2.0;

	/// Overrides the attempt budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Overrides the first delay.
	pub fn with_initial_delay(mut self, delay: Duration) -> Self {
		self.initial_delay = delay;

		self
	}

	/// Overrides the delay cap.
	pub fn with_max_delay(mut self, delay: Duration) -> Self {
		self.max_delay = delay;

		self
	}

	/// Overrides the growth factor.
	pub fn with_multiplier(mut self, multiplier: f64) -> Self {
		self.multiplier = multiplier;

		self
	}

	/// Validates the policy invariants.
	pub fn validate(&self) -> Result<(), RetryPolicyError> {
		if self.max_attempts == 0 {
			return Err(RetryPolicyError::ZeroAttempts);
		}
		if self.initial_delay.is_negative() || self.max_delay.is_negative() {
			return Err(RetryPolicyError::NegativeDelay);
		}
		if self.initial_delay > self.max_delay {
			return Err(RetryPolicyError::InitialAboveMax);
		}
		if !self.multiplier.is_finite() || self.multiplier < 1.0 {
			return Err(RetryPolicyError::InvalidMultiplier(self.multiplier));
		}

		Ok(())
	}

	/// Computes the delay that follows `current`, capped at `max_delay`.
	pub fn next_delay(&self, current: Duration) -> Duration {
		Duration::checked_seconds_f64(current.as_seconds_f64() * self.multiplier)
			.unwrap_or(self.max_delay)
			.min(self.max_delay)
	}

	/// Returns the delays a request that keeps failing will observe, in order.
	pub fn delays(&self) -> Vec<Duration> {
		let retries = self.max_attempts.saturating_sub(1);
		let mut delays = Vec::with_capacity(retries as usize);
		let mut current = self.initial_delay.min(self.max_delay);

		for _ in 0..retries {
			delays.push(current);
			current = self.next_delay(current);
		}

		delays
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
			initial_delay: Self::DEFAULT_INITIAL_DELAY,
			max_delay: Self::DEFAULT_MAX_DELAY,
			multiplier: Self::DEFAULT_MULTIPLIER,
		}
	}
}

/// Retry bookkeeping for one in-flight request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
	/// Retries already granted.
	pub attempt_count: u32,
	/// Delay the next retry will wait.
	pub current_delay: Duration,
}
impl RetryState {
	/// Creates the state recorded on a request's first failure.
	pub fn new(initial_delay: Duration) -> Self {
		Self { attempt_count: 0, current_delay: initial_delay }
	}
}

/// Answer returned to the agent runtime after a model-call failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
	/// Re-issue the same request; the delay has already elapsed.
	Retry {
		/// One-based retry number.
		attempt: u32,
		/// Delay that was waited before answering.
		delay: Duration,
	},
	/// Stop retrying and surface the original error.
	Propagate {
		/// Retries that were granted before giving up.
		retries: u32,
	},
}
impl RetryDecision {
	/// Returns `true` for [`RetryDecision::Retry`].
	pub fn is_retry(&self) -> bool {
		matches!(self, Self::Retry { .. })
	}
}

/// Stateless coordinator applying a [`RetryPolicy`] to state held in a [`CallScope`].
#[derive(Clone, Debug, Default)]
pub struct RetryCoordinator {
	policy: RetryPolicy,
}
impl RetryCoordinator {
	/// Creates a coordinator after validating `policy`.
	pub fn new(policy: RetryPolicy) -> Result<Self, RetryPolicyError> {
		policy.validate()?;

		Ok(Self { policy })
	}

	/// Returns the active policy.
	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Advances the state machine for `key` without waiting.
	pub fn plan(&self, scope: &mut CallScope, key: RequestKey) -> RetryDecision {
		let initial = self.policy.initial_delay.min(self.policy.max_delay);
		let state = scope.retry_entry(key, || RetryState::new(initial));

		if state.attempt_count >= self.policy.max_attempts.saturating_sub(1) {
			let retries = state.attempt_count;

			scope.clear_retry(key);

			return RetryDecision::Propagate { retries };
		}

		let delay = state.current_delay;

		state.attempt_count += 1;
		state.current_delay = self.policy.next_delay(delay);

		RetryDecision::Retry { attempt: state.attempt_count, delay }
	}

	/// Handles a failed model call: waits out the backoff and answers retry, or clears the
	/// request's state and answers propagate.
	pub async fn on_model_error<E>(
		&self,
		scope: &mut CallScope,
		key: RequestKey,
		error: &E,
	) -> RetryDecision
	where
		E: ?Sized + Display,
	{
		let decision = self.plan(scope, key);

		#[cfg(not(feature = "tracing"))]
		let _ = error;

		match decision {
			RetryDecision::Retry { attempt, delay } => {
				obs::event!(
					warn,
					request = %key,
					agent = scope.agent().unwrap_or("-"),
					attempt,
					delay_ms = delay.whole_milliseconds() as u64,
					error = %error,
					"Model call failed; retrying."
				);
				obs::record_flow_outcome(FlowKind::ModelCall, FlowOutcome::Retry);
				obs::record_retry_delay(attempt, delay);
				common::suspend(delay).await;
			},
			RetryDecision::Propagate { retries } => {
				obs::event!(
					error,
					request = %key,
					agent = scope.agent().unwrap_or("-"),
					retries,
					error = %error,
					"Model call failed after exhausting retries."
				);
			},
		}

		decision
	}

	/// Clears any retry state for a request that completed successfully.
	pub fn on_model_success(&self, scope: &mut CallScope, key: RequestKey) {
		scope.clear_retry(key);
	}
}
