// self
use crate::{
	_prelude::*,
	obs::{FlowKind, FlowOutcome},
};

/// Counter incremented once per flow outcome.
pub const FLOW_TOTAL: &str = "agent_guard_flow_total";
/// Histogram of backoff delays applied before a model call is retried, in seconds.
pub const RETRY_DELAY_SECONDS: &str = "agent_guard_retry_delay_seconds";

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(FLOW_TOTAL, "flow" => kind.as_str(), "outcome" => outcome.as_str()).increment(1);

	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Records the backoff applied before retry number `attempt`.
pub fn record_retry_delay(attempt: u32, delay: Duration) {
	#[cfg(feature = "metrics")]
	metrics::histogram!(RETRY_DELAY_SECONDS, "attempt" => attempt.to_string())
		.record(delay.as_seconds_f64());

	#[cfg(not(feature = "metrics"))]
	let _ = (attempt, delay);
}
