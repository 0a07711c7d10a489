//! Guard-level error types shared across identity strategies, flows, and stores.

// self
use crate::_prelude::*;

/// Guard-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Remediation text attached to [`Error::CredentialsUnavailable`].
pub const CREDENTIALS_REMEDIATION: &str = "No Application Default Credentials found. If running \
	locally, set GOOGLE_APPLICATION_CREDENTIALS to an impersonated service-account credentials \
	file or a service-account key, run 'gcloud auth application-default login \
	--impersonate-service-account=<account>', or \
	set AGENT_SERVICE_ACCOUNT to mint tokens through the gcloud CLI. If running in a hosted \
	environment such as Cloud Run, ensure the service has a service account and metadata server \
	access.";

/// Canonical guard error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Identity CLI invocation failed.
	#[error(transparent)]
	Cli(#[from] CliError),

	/// No credential source could be discovered in the hosting environment.
	#[error("{remediation}")]
	CredentialsUnavailable {
		/// Actionable instructions for configuring hosted or local credentials.
		remediation: &'static str,
		/// Failures reported by each strategy, in the order they were tried.
		attempts: StrategyFailures,
	},
	/// Minting an identity token failed for a reason other than missing credentials.
	#[error(
		"Failed to fetch an identity token for `{audience}`. Verify credentials are configured and the audience URL is correct: {attempts}"
	)]
	TokenFetchFailed {
		/// Audience the token was requested for.
		audience: String,
		/// Failures reported by each strategy, in the order they were tried.
		attempts: StrategyFailures,
	},
	/// Upstream refused the request with a status that retrying will not change (4xx other
	/// than 408 and 429).
	#[error("{endpoint} endpoint rejected the request with HTTP {status}: {message}.")]
	Rejected {
		/// Endpoint label (`metadata`, `iam`, `token`).
		endpoint: &'static str,
		/// HTTP status code.
		status: u16,
		/// Upstream- or guard-supplied message summarizing the failure.
		message: String,
	},
	/// Token endpoint rejected the grant (e.g. a revoked refresh token).
	#[error("Token endpoint rejected the grant: {reason}.")]
	InvalidGrant {
		/// Upstream- or guard-supplied reason string.
		reason: String,
	},
	/// A credential strategy found nothing to work with.
	#[error("Credential source `{strategy}` is unavailable: {reason}.")]
	Unavailable {
		/// Strategy label.
		strategy: &'static str,
		/// Why the source could not be used.
		reason: String,
	},
}
impl Error {
	/// Returns `true` when the error means "no credentials were found" rather than "minting broke".
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::Unavailable { .. } | Self::CredentialsUnavailable { .. })
	}
}

/// One failed strategy attempt recorded by the minter.
#[derive(Debug)]
pub struct StrategyFailure {
	/// Label of the strategy that failed.
	pub strategy: &'static str,
	/// Error the strategy reported.
	pub error: Error,
}

/// Ordered list of [`StrategyFailure`]s aggregated across a mint attempt.
#[derive(Debug, Default)]
pub struct StrategyFailures(pub Vec<StrategyFailure>);
impl StrategyFailures {
	/// Iterates over the recorded failures.
	pub fn iter(&self) -> impl Iterator<Item = &StrategyFailure> {
		self.0.iter()
	}

	/// Returns the number of recorded failures.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` when no failure was recorded.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns the last recorded failure, if any.
	pub fn last(&self) -> Option<&StrategyFailure> {
		self.0.last()
	}
}
impl Display for StrategyFailures {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		if self.0.is_empty() {
			return f.write_str("no credential strategies were configured");
		}

		for (idx, failure) in self.0.iter().enumerate() {
			if idx > 0 {
				f.write_str("; ")?;
			}

			write!(f, "[{}] {}", failure.strategy, failure.error)?;
		}

		Ok(())
	}
}

/// Configuration and validation failures raised by the guard.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// An endpoint URL could not be parsed or joined.
	#[error("Endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Audience text could not be turned into an [`Audience`](crate::auth::Audience).
	#[error(transparent)]
	InvalidAudience(#[from] crate::auth::AudienceError),
	/// Identity token builder validation failed.
	#[error("Unable to build identity token.")]
	TokenBuild(#[from] crate::auth::IdentityTokenBuilderError),

	/// The credentials file could not be read.
	#[error("Credentials file `{path}` could not be read.")]
	CredentialsFileRead {
		/// File location.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// The credentials file is not valid JSON for any supported type.
	#[error("Credentials file `{path}` is malformed.")]
	CredentialsFileParse {
		/// File location.
		path: String,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
	},
	/// The credentials file declares a type that cannot mint identity tokens.
	#[error("Credentials of type `{kind}` cannot mint identity tokens: {hint}.")]
	UnsupportedCredentials {
		/// Declared credential type.
		kind: String,
		/// What to configure instead.
		hint: &'static str,
	},
	/// A required field is absent from the credentials file.
	#[error("Credentials file is missing `{field}`.")]
	MissingCredentialField {
		/// Dotted field path.
		field: &'static str,
	},
	/// The impersonation URL does not name a `generateAccessToken` endpoint.
	#[error("Impersonation URL `{url}` does not end with `:generateAccessToken`.")]
	InvalidImpersonationUrl {
		/// Offending URL.
		url: String,
	},
	/// A service-account key could not sign the token request assertion.
	#[error("Service account key could not sign the token assertion.")]
	AssertionSigning {
		/// Underlying signing or key-parsing failure.
		#[source]
		source: jsonwebtoken::errors::Error,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry): timeouts, 408, 429, 5xx and malformed bodies.
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Upstream returned an unexpected but non-fatal response.
	#[error("{endpoint} endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Endpoint label (`metadata`, `iam`, `token`).
		endpoint: &'static str,
		/// Upstream- or guard-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Upstream responded with malformed JSON that could not be parsed.
	#[error("{endpoint} endpoint returned malformed JSON.")]
	ResponseParse {
		/// Endpoint label (`metadata`, `iam`, `token`).
		endpoint: &'static str,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling a credential endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling a credential endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Failures raised while shelling out to the identity CLI.
#[derive(Debug, ThisError)]
pub enum CliError {
	/// The program could not be started (missing binary, permissions).
	#[error("Identity CLI `{program}` could not be started.")]
	Spawn {
		/// Program that was invoked.
		program: String,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// The program exited unsuccessfully.
	#[error("Identity CLI `{program}` exited with {status}: {stderr}.")]
	NonZeroExit {
		/// Program that was invoked.
		program: String,
		/// Exit status description.
		status: String,
		/// Trimmed standard error.
		stderr: String,
	},
	/// The program succeeded but printed no token.
	#[error("Identity CLI `{program}` printed an empty token.")]
	EmptyOutput {
		/// Program that was invoked.
		program: String,
	},
}
