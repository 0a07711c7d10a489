// self
use crate::{_prelude::*, obs::FlowKind};

/// Instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// The future itself when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// Emits a `tracing` event at the given level; compiles to nothing without the feature.
#[cfg(feature = "tracing")]
macro_rules! event {
	($level:ident, $($arg:tt)+) => {
		::tracing::$level!($($arg)+)
	};
}
#[cfg(not(feature = "tracing"))]
macro_rules! event {
	($level:ident, $($arg:tt)+) => {};
}
pub(crate) use event;

/// Span wrapping one guarded call.
///
/// Every span is named `agent_guard.flow` and carries `flow`, `stage` and an optional `subject`
/// (the audience of a mint or the request key of a model call).
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Opens a span for `kind` at call site `stage`.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"agent_guard.flow",
				flow = kind.as_str(),
				stage,
				subject = tracing::field::Empty
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Records what the flow is acting on.
	pub fn with_subject(self, subject: impl Display) -> Self {
		#[cfg(feature = "tracing")]
		self.span.record("subject", tracing::field::display(subject));
		#[cfg(not(feature = "tracing"))]
		let _ = subject;

		self
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}
