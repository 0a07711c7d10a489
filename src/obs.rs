//! Optional observability helpers for guarded calls.
//!
//! # Feature Flags
//!
//! - `tracing`: spans named `agent_guard.flow` with `flow`, `stage` and `subject` fields, plus
//!   warn/debug events for retries, strategy fallthrough and header failures.
//! - `metrics`: the `agent_guard_flow_total` counter labeled by `flow` + `outcome`, and the
//!   `agent_guard_retry_delay_seconds` histogram labeled by `attempt`.

mod metrics;
mod tracing;

pub use self::{metrics::*, tracing::*};

pub(crate) use self::tracing::event;

// self
use crate::_prelude::*;

/// Guarded call kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// A rate-limited, retried model invocation.
	ModelCall,
	/// An identity-token mint for one audience.
	TokenMint,
	/// Header computation for an outbound tool call.
	ToolHeaders,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::ModelCall => "model_call",
			FlowKind::TokenMint => "token_mint",
			FlowKind::ToolHeaders => "tool_headers",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a guarded helper.
	Attempt,
	/// A failed attempt that will be tried again.
	Retry,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller (or swallowed, for tool headers).
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Retry => "retry",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
