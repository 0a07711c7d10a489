// std
use std::{collections::HashMap, sync::Arc};
// self
use agent_guard::{
	config::{AgentConfig, ConfigLoadError, EnvLookup},
	ext::AuthHeaderProvider,
	flows::{ModelCallGuard, RetryPolicy},
	http::ReqwestHttpClient,
	identity::IdentityTokenMinter,
};

fn lookup(pairs: &[(&str, &str)]) -> EnvLookup {
	EnvLookup::from_map(
		pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect::<HashMap<_, _>>(),
	)
}

#[test]
fn minter_chain_depends_on_impersonation_identity() {
	let base = [
		("ALLOWED_ORIGINS", "https://app.example"),
		("TOOL_LUMOSDB_SERVICE_URL", "https://db.example.run.app"),
	];
	let config = AgentConfig::from_lookup(&lookup(&base)).expect("Config should load.");
	let minter = IdentityTokenMinter::from_config(&config, ReqwestHttpClient::default());

	assert_eq!(minter.strategy_labels(), vec!["ambient"]);

	let mut with_account = base.to_vec();

	with_account.push(("AGENT_SERVICE_ACCOUNT", "agent@project.iam.gserviceaccount.com"));

	let config = AgentConfig::from_lookup(&lookup(&with_account)).expect("Config should load.");
	let minter = IdentityTokenMinter::from_config(&config, ReqwestHttpClient::default());

	assert_eq!(minter.strategy_labels(), vec!["impersonated", "ambient"]);

	let tool = config.require_tool("lumosdb").expect("Tool should be configured.");
	let provider = AuthHeaderProvider::for_tool(tool, Arc::new(minter));

	assert_eq!(provider.audience().as_ref(), "https://db.example.run.app");
	assert_eq!(tool.mcp_endpoint.as_str(), "https://db.example.run.app/mcp");
}

#[test]
fn model_call_guard_uses_configured_policy() {
	let config = AgentConfig::from_lookup(&lookup(&[
		("ALLOWED_ORIGINS", "*"),
		("AGENT_RETRY_MAX_ATTEMPTS", "4"),
	]))
	.expect("Config should load.");
	let guard = ModelCallGuard::from_config(&config).expect("Guard should build.");

	assert_eq!(guard.coordinator().policy(), &RetryPolicy::default().with_max_attempts(4));
	assert_eq!(guard.coordinator().policy().delays().len(), 3);
}

#[test]
fn invalid_impersonation_identity_is_rejected() {
	let err = AgentConfig::from_lookup(&lookup(&[
		("ALLOWED_ORIGINS", "*"),
		("AGENT_SERVICE_ACCOUNT", "not-an-email"),
	]))
	.expect_err("Invalid service account should be rejected.");

	assert!(matches!(err, ConfigLoadError::InvalidIdentifier { ref name, .. } if name == "AGENT_SERVICE_ACCOUNT"));
}

#[test]
fn missing_allowed_origins_is_reported() {
	let err = AgentConfig::from_lookup(&lookup(&[("TOOL_DB_SERVICE_URL", "https://db.example")]))
		.expect_err("ALLOWED_ORIGINS should be required.");

	assert_eq!(err.to_string(), "ALLOWED_ORIGINS environment variable is required.");
}
