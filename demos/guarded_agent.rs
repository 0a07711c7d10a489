//! Loads the agent configuration from the environment, prints the headers each configured tool
//! would receive, and runs a flaky fake model call through the guard.
//!
//! ```sh
//! ALLOWED_ORIGINS=http://localhost:3000 \
//! TOOL_LUMOSDB_SERVICE_URL=https://lumosdb.example.run.app \
//! cargo run --example guarded_agent
//! ```

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
// self
use agent_guard::{
	config::AgentConfig,
	ext::{AuthHeaderProvider, HeaderProvider, ToolCallContext},
	flows::{CallScope, ModelCallGuard},
	http::ReqwestHttpClient,
	identity::IdentityTokenMinter,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let config = AgentConfig::from_env()?;
	let minter = Arc::new(IdentityTokenMinter::from_config(&config, ReqwestHttpClient::default()));

	println!("environment={} build={} port={}", config.environment, config.build_number, config.port);
	println!("credential strategies: {:?}", minter.strategy_labels());

	for tool in &config.tools {
		let provider = AuthHeaderProvider::for_tool(tool, minter.clone());
		let headers = provider.headers(&ToolCallContext::new().with_tool(&tool.name)).await;

		println!(
			"{} -> {} ({})",
			tool.name,
			tool.mcp_endpoint,
			if headers.is_empty() { "no authorization" } else { "authorized" }
		);
	}

	let guard = ModelCallGuard::from_config(&config)?;
	let mut scope = CallScope::new().with_agent("demo");
	let answer = guard
		.call(&mut scope, |context| async move {
			if context.attempt == 0 {
				Err(format!("{} hit a transient quota error", context.request_key))
			} else {
				Ok(format!("answered on attempt {}", context.attempt + 1))
			}
		})
		.await
		.map_err(|err| color_eyre::eyre::eyre!(err))?;

	println!("{answer}");

	Ok(())
}
