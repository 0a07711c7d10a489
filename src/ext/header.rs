//! Header providers that attach identity tokens to outbound tool calls.

// crates.io
use reqwest::RequestBuilder;
// self
use crate::{
	_prelude::*,
	auth::Audience,
	config::ToolService,
	identity::IdentityTokenMinter,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Header name carrying the bearer token.
pub const AUTHORIZATION: &str = "Authorization";

/// Header name to value mapping attached to a tool call.
pub type HeaderMap = BTreeMap<String, String>;

/// Boxed future returned by [`HeaderProvider::headers`].
pub type HeaderFuture<'a> = Pin<Box<dyn Future<Output = HeaderMap> + 'a + Send>>;

/// Computes headers for an outbound tool call.
///
/// Providers never fail; a provider that cannot produce its headers returns an empty map and the
/// call proceeds without them.
pub trait HeaderProvider
where
	Self: Send + Sync,
{
	/// Returns the headers for the call described by `context`.
	fn headers<'a>(&'a self, context: &'a ToolCallContext) -> HeaderFuture<'a>;
}

/// Opaque context describing the tool call headers are computed for.
#[derive(Clone, Debug, Default)]
pub struct ToolCallContext {
	/// Tool being invoked, if known.
	pub tool: Option<String>,
	/// Agent issuing the call, if known.
	pub agent: Option<String>,
}
impl ToolCallContext {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Tags the context with the tool name.
	pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
		self.tool = Some(tool.into());

		self
	}

	/// Tags the context with the agent name.
	pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
		self.agent = Some(agent.into());

		self
	}
}

/// Mints a fresh identity token for one audience on every call and returns it as
/// `Authorization: Bearer <token>`.
#[derive(Clone, Debug)]
pub struct AuthHeaderProvider {
	audience: Audience,
	minter: Arc<IdentityTokenMinter>,
}
impl AuthHeaderProvider {
	/// Creates a provider for `audience`.
	pub fn new(audience: Audience, minter: Arc<IdentityTokenMinter>) -> Self {
		Self { audience, minter }
	}

	/// Creates a provider for a configured tool service.
	pub fn for_tool(tool: &ToolService, minter: Arc<IdentityTokenMinter>) -> Self {
		Self::new(tool.audience.clone(), minter)
	}

	/// Returns the audience tokens are minted for.
	pub fn audience(&self) -> &Audience {
		&self.audience
	}

	async fn compute(&self, context: &ToolCallContext) -> HeaderMap {
		const KIND: FlowKind = FlowKind::ToolHeaders;

		let span = FlowSpan::new(KIND, "headers").with_subject(&self.audience);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		span.instrument(async move {
			let mut headers = HeaderMap::new();

			match self.minter.bearer_for(&self.audience).await {
				Ok(bearer) => {
					headers.insert(AUTHORIZATION.into(), bearer);
					obs::record_flow_outcome(KIND, FlowOutcome::Success);
				},
				Err(err) => {
					obs::event!(
						warn,
						audience = %self.audience,
						tool = context.tool.as_deref().unwrap_or("-"),
						error = %err,
						"Failed to fetch identity token; calling the tool without authorization."
					);
					obs::record_flow_outcome(KIND, FlowOutcome::Failure);

					#[cfg(not(feature = "tracing"))]
					let _ = (context, err);
				},
			}

			headers
		})
		.await
	}
}
impl HeaderProvider for AuthHeaderProvider {
	fn headers<'a>(&'a self, context: &'a ToolCallContext) -> HeaderFuture<'a> {
		Box::pin(self.compute(context))
	}
}

/// Adds every entry of `headers` to `request`.
pub fn apply_headers(mut request: RequestBuilder, headers: &HeaderMap) -> RequestBuilder {
	for (name, value) in headers {
		request = request.header(name.as_str(), value.as_str());
	}

	request
}
