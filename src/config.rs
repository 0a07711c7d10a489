//! Environment-driven agent configuration.
//!
//! [`AgentConfig::from_env`] snapshots the process environment once; [`AgentConfig::from_lookup`]
//! accepts any [`EnvLookup`] so tests never mutate global state. Every `TOOL_<NAME>_SERVICE_URL`
//! variable defines a [`ToolService`] whose identity-token audience is the URL exactly as given.

// self
use crate::{
	_prelude::*,
	auth::{Audience, AudienceError, ServiceAccount},
	flows::{RetryPolicy, RetryPolicyError},
	identity::DEFAULT_METADATA_HOST,
};

const TOOL_PREFIX: &str = "TOOL_";
const TOOL_SUFFIX: &str = "_SERVICE_URL";
const WELL_KNOWN_FILE: &str = "application_default_credentials.json";

/// Errors raised while loading [`AgentConfig`].
#[derive(Debug, PartialEq, ThisError)]
pub enum ConfigLoadError {
	/// A required variable is unset or blank.
	#[error("{name} environment variable is required.")]
	MissingVar {
		/// Variable name.
		name: String,
	},
	/// A variable is set but cannot be used.
	#[error("{name} has an invalid value: {reason}.")]
	InvalidValue {
		/// Variable name.
		name: String,
		/// Why the value was rejected.
		reason: String,
	},
	/// A tool URL or impersonation identity failed validation.
	#[error("{name} is invalid.")]
	InvalidIdentifier {
		/// Variable name.
		name: String,
		/// Validation failure.
		#[source]
		source: AudienceError,
	},
	/// The retry overrides produce an unusable policy.
	#[error(transparent)]
	RetryPolicy(#[from] RetryPolicyError),
}

/// Snapshot of environment variables consulted by the loader.
#[derive(Clone, Debug, Default)]
pub struct EnvLookup(HashMap<String, String>);
impl EnvLookup {
	/// Captures the current process environment.
	pub fn process() -> Self {
		Self(std::env::vars().collect())
	}

	/// Wraps an explicit map (used by tests and embedders).
	pub fn from_map(vars: HashMap<String, String>) -> Self {
		Self(vars)
	}

	/// Returns the trimmed value of `name`; blank values count as unset.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(|value| value.trim()).filter(|value| !value.is_empty())
	}

	/// Iterates over variable names.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	fn require(&self, name: &str) -> Result<&str, ConfigLoadError> {
		self.get(name).ok_or_else(|| ConfigLoadError::MissingVar { name: name.to_owned() })
	}

	fn parse_or<T>(&self, name: &str, default: T) -> Result<T, ConfigLoadError>
	where
		T: FromStr,
		T::Err: Display,
	{
		match self.get(name) {
			Some(raw) => raw.parse().map_err(|err: T::Err| ConfigLoadError::InvalidValue {
				name: name.to_owned(),
				reason: err.to_string(),
			}),
			None => Ok(default),
		}
	}

	fn millis_or(&self, name: &str, default: Duration) -> Result<Duration, ConfigLoadError> {
		match self.get(name) {
			Some(_) => {
				let millis: u32 = self.parse_or(name, 0)?;

				Ok(Duration::milliseconds(i64::from(millis)))
			},
			None => Ok(default),
		}
	}
}

/// A tool service the agent calls over MCP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolService {
	/// Lowercase name taken from `TOOL_<NAME>_SERVICE_URL`.
	pub name: String,
	/// Audience identity tokens for this service are minted for.
	pub audience: Audience,
	/// MCP endpoint: the URL with any trailing `/` removed plus `/mcp`.
	pub mcp_endpoint: Url,
}
impl ToolService {
	/// Builds a tool service from its raw base URL.
	pub fn new(name: impl Into<String>, url: &str) -> Result<Self, AudienceError> {
		let audience = Audience::new(url)?;
		let mcp_endpoint = Url::parse(&format!("{}/mcp", url.trim_end_matches('/')))
			.map_err(|_| AudienceError::NotAUrl { kind: "Audience", value: url.to_owned() })?;

		Ok(Self { name: name.into(), audience, mcp_endpoint })
	}
}

/// Fully resolved agent configuration.
#[derive(Clone, Debug)]
pub struct AgentConfig {
	/// Tool services sorted by name.
	pub tools: Vec<ToolService>,
	/// Identity the impersonation CLI strategy acts as (`AGENT_SERVICE_ACCOUNT`).
	pub impersonate_service_account: Option<ServiceAccount>,
	/// Origins allowed to call the agent (`ALLOWED_ORIGINS`).
	pub allowed_origins: Vec<String>,
	/// Deployment environment name (`ENVIRONMENT`).
	pub environment: String,
	/// Build identifier (`BUILD_NUMBER`).
	pub build_number: String,
	/// Listening port (`PORT`).
	pub port: u16,
	/// Explicit credentials file (`GOOGLE_APPLICATION_CREDENTIALS`).
	pub credentials_file: Option<PathBuf>,
	/// Well-known gcloud application-default credentials file.
	pub well_known_credentials_file: Option<PathBuf>,
	/// Metadata server base URL (`GCE_METADATA_HOST`).
	pub metadata_base: Url,
	/// Backoff policy for failed model calls.
	pub retry: RetryPolicy,
	/// Spacing inserted before each model call.
	pub rate_limit_interval: Duration,
}
impl AgentConfig {
	/// Default `ENVIRONMENT`.
	pub const DEFAULT_ENVIRONMENT: &'static str = "development";
	/// Default `BUILD_NUMBER`.
	pub const DEFAULT_BUILD_NUMBER: &'static str = "local";
	/// Default `PORT`.
	pub const DEFAULT_PORT: u16 = 8080;
	/// Default `AGENT_RATE_LIMIT_INTERVAL_MS`.
	pub const DEFAULT_RATE_LIMIT_INTERVAL: Duration = Duration::milliseconds(100);

	/// Loads configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigLoadError> {
		Self::from_lookup(&EnvLookup::process())
	}

	/// Loads configuration from `env`.
	pub fn from_lookup(env: &EnvLookup) -> Result<Self, ConfigLoadError> {
		let tools = discover_tools(env)?;
		let impersonate_service_account = env
			.get("AGENT_SERVICE_ACCOUNT")
			.map(|raw| {
				ServiceAccount::new(raw).map_err(|source| ConfigLoadError::InvalidIdentifier {
					name: "AGENT_SERVICE_ACCOUNT".into(),
					source,
				})
			})
			.transpose()?;
		let allowed_origins: Vec<String> = env
			.require("ALLOWED_ORIGINS")?
			.split(',')
			.map(str::trim)
			.filter(|origin| !origin.is_empty())
			.map(str::to_owned)
			.collect();

		if allowed_origins.is_empty() {
			return Err(ConfigLoadError::MissingVar { name: "ALLOWED_ORIGINS".into() });
		}

		let metadata_host = env.get("GCE_METADATA_HOST").unwrap_or(DEFAULT_METADATA_HOST);
		let metadata_base = Url::parse(&format!("http://{metadata_host}/")).map_err(|err| {
			ConfigLoadError::InvalidValue { name: "GCE_METADATA_HOST".into(), reason: err.to_string() }
		})?;
		let defaults = RetryPolicy::default();
		let retry = RetryPolicy::default()
			.with_max_attempts(env.parse_or("AGENT_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?)
			.with_initial_delay(env.millis_or("AGENT_RETRY_INITIAL_DELAY_MS", defaults.initial_delay)?)
			.with_max_delay(env.millis_or("AGENT_RETRY_MAX_DELAY_MS", defaults.max_delay)?)
			.with_multiplier(env.parse_or("AGENT_RETRY_MULTIPLIER", defaults.multiplier)?);

		retry.validate()?;

		Ok(Self {
			tools,
			impersonate_service_account,
			allowed_origins,
			environment: env.get("ENVIRONMENT").unwrap_or(Self::DEFAULT_ENVIRONMENT).to_owned(),
			build_number: env.get("BUILD_NUMBER").unwrap_or(Self::DEFAULT_BUILD_NUMBER).to_owned(),
			port: env.parse_or("PORT", Self::DEFAULT_PORT)?,
			credentials_file: env.get("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
			well_known_credentials_file: well_known_file(env),
			metadata_base,
			retry,
			rate_limit_interval: env
				.millis_or("AGENT_RATE_LIMIT_INTERVAL_MS", Self::DEFAULT_RATE_LIMIT_INTERVAL)?,
		})
	}

	/// Returns the tool service called `name`, if configured.
	pub fn tool(&self, name: &str) -> Option<&ToolService> {
		self.tools.iter().find(|tool| tool.name.eq_ignore_ascii_case(name))
	}

	/// Returns the tool service called `name` or the variable that must be set.
	pub fn require_tool(&self, name: &str) -> Result<&ToolService, ConfigLoadError> {
		self.tool(name).ok_or_else(|| ConfigLoadError::MissingVar { name: tool_var(name) })
	}
}

/// Returns the variable that configures tool `name`.
pub fn tool_var(name: &str) -> String {
	format!("{TOOL_PREFIX}{}{TOOL_SUFFIX}", name.to_ascii_uppercase())
}

fn discover_tools(env: &EnvLookup) -> Result<Vec<ToolService>, ConfigLoadError> {
	let mut names: Vec<&str> = env
		.keys()
		.filter_map(|key| key.strip_prefix(TOOL_PREFIX)?.strip_suffix(TOOL_SUFFIX))
		.filter(|name| !name.is_empty())
		.collect();

	names.sort_unstable();

	names
		.into_iter()
		.filter_map(|name| {
			let var = format!("{TOOL_PREFIX}{name}{TOOL_SUFFIX}");

			env.get(&var).map(|url| {
				ToolService::new(name.to_ascii_lowercase(), url)
					.map_err(|source| ConfigLoadError::InvalidIdentifier { name: var.clone(), source })
			})
		})
		.collect()
}

fn well_known_file(env: &EnvLookup) -> Option<PathBuf> {
	if let Some(dir) = env.get("CLOUDSDK_CONFIG") {
		return Some(Path::new(dir).join(WELL_KNOWN_FILE));
	}
	if let Some(home) = env.get("HOME") {
		return Some(Path::new(home).join(".config").join("gcloud").join(WELL_KNOWN_FILE));
	}

	env.get("APPDATA").map(|dir| Path::new(dir).join("gcloud").join(WELL_KNOWN_FILE))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::env_from_pairs;

	#[test]
	fn loads_defaults_and_tools() {
		let env = env_from_pairs([
			("TOOL_LUMOSDB_SERVICE_URL", "https://db.example.run.app/"),
			("TOOL_LUMOSTRADE_SERVICE_URL", "https://trade.example.run.app"),
			("ALLOWED_ORIGINS", "https://a.example, https://b.example ,"),
		]);
		let config = AgentConfig::from_lookup(&env).expect("Config should load.");

		assert_eq!(config.tools.len(), 2);
		assert_eq!(config.environment, "development");
		assert_eq!(config.build_number, "local");
		assert_eq!(config.port, 8080);
		assert_eq!(config.allowed_origins, vec!["https://a.example", "https://b.example"]);
		assert_eq!(config.retry, RetryPolicy::default());
		assert_eq!(config.rate_limit_interval, Duration::milliseconds(100));
		assert_eq!(config.metadata_base.as_str(), "http://metadata.google.internal/");
		assert!(config.impersonate_service_account.is_none());

		let db = config.require_tool("lumosdb").expect("lumosdb tool should be configured.");

		assert_eq!(db.audience.as_ref(), "https://db.example.run.app/");
		assert_eq!(db.mcp_endpoint.as_str(), "https://db.example.run.app/mcp");
		assert_eq!(
			config.tool("LUMOSTRADE").map(|tool| tool.mcp_endpoint.as_str()),
			Some("https://trade.example.run.app/mcp")
		);
	}

	#[test]
	fn allowed_origins_are_required() {
		let err = AgentConfig::from_lookup(&env_from_pairs([("ALLOWED_ORIGINS", " , ")]))
			.expect_err("Blank origins should be rejected.");

		assert_eq!(err, ConfigLoadError::MissingVar { name: "ALLOWED_ORIGINS".into() });
	}

	#[test]
	fn missing_tool_names_its_variable() {
		let config = AgentConfig::from_lookup(&env_from_pairs([("ALLOWED_ORIGINS", "*")]))
			.expect("Config should load.");
		let err = config.require_tool("lumosdb").expect_err("Tool should be missing.");

		assert_eq!(err, ConfigLoadError::MissingVar { name: "TOOL_LUMOSDB_SERVICE_URL".into() });
	}

	#[test]
	fn invalid_tool_url_is_rejected() {
		let err = AgentConfig::from_lookup(&env_from_pairs([
			("ALLOWED_ORIGINS", "*"),
			("TOOL_DB_SERVICE_URL", "not a url"),
		]))
		.expect_err("Invalid tool URL should be rejected.");

		assert!(matches!(err, ConfigLoadError::InvalidIdentifier { ref name, .. } if name == "TOOL_DB_SERVICE_URL"));
	}

	#[test]
	fn overrides_are_applied() {
		let env = env_from_pairs([
			("ALLOWED_ORIGINS", "*"),
			("AGENT_SERVICE_ACCOUNT", "agent@project.iam.gserviceaccount.com"),
			("ENVIRONMENT", "production"),
			("BUILD_NUMBER", "42"),
			("PORT", "9090"),
			("GOOGLE_APPLICATION_CREDENTIALS", "/secrets/adc.json"),
			("GCE_METADATA_HOST", "127.0.0.1:8089"),
			("AGENT_RETRY_MAX_ATTEMPTS", "5"),
			("AGENT_RETRY_INITIAL_DELAY_MS", "250"),
			("AGENT_RETRY_MAX_DELAY_MS", "2000"),
			("AGENT_RETRY_MULTIPLIER", "1.5"),
			("AGENT_RATE_LIMIT_INTERVAL_MS", "0"),
			("HOME", "/home/agent"),
		]);
		let config = AgentConfig::from_lookup(&env).expect("Config should load.");

		assert_eq!(config.environment, "production");
		assert_eq!(config.build_number, "42");
		assert_eq!(config.port, 9090);
		assert_eq!(config.credentials_file, Some(PathBuf::from("/secrets/adc.json")));
		assert_eq!(
			config.well_known_credentials_file,
			Some(PathBuf::from("/home/agent/.config/gcloud/application_default_credentials.json"))
		);
		assert_eq!(config.metadata_base.as_str(), "http://127.0.0.1:8089/");
		assert_eq!(config.retry.max_attempts, 5);
		assert_eq!(config.retry.initial_delay, Duration::milliseconds(250));
		assert_eq!(config.retry.max_delay, Duration::seconds(2));
		assert_eq!(config.retry.multiplier, 1.5);
		assert_eq!(config.rate_limit_interval, Duration::ZERO);
		assert!(config.impersonate_service_account.is_some());
	}

	#[test]
	fn bad_numbers_are_rejected() {
		let err = AgentConfig::from_lookup(&env_from_pairs([
			("ALLOWED_ORIGINS", "*"),
			("PORT", "eighty"),
		]))
		.expect_err("Non-numeric port should be rejected.");

		assert!(matches!(err, ConfigLoadError::InvalidValue { ref name, .. } if name == "PORT"));

		let err = AgentConfig::from_lookup(&env_from_pairs([
			("ALLOWED_ORIGINS", "*"),
			("AGENT_RETRY_MAX_ATTEMPTS", "0"),
		]))
		.expect_err("Zero attempts should be rejected.");

		assert_eq!(err, ConfigLoadError::RetryPolicy(RetryPolicyError::ZeroAttempts));
	}
}
