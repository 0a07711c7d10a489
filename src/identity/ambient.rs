//! Ambient default credentials: a credentials file or the hosted metadata server.
//!
//! Discovery order:
//! 1. The explicit credentials file (`GOOGLE_APPLICATION_CREDENTIALS`). When configured it is the
//!    only source consulted, and a missing file counts as "no credentials".
//! 2. The well-known gcloud application-default file, when present.
//! 3. The metadata server, after a short probe confirms it is reachable.
//!
//! Service-account key files sign a JWT-bearer grant and impersonated service-account files go
//! through the IAM Credentials API. User credentials cannot mint tokens for an arbitrary audience
//! and are rejected with a hint, as are unknown types.

mod file;
mod iam;
mod metadata;
mod service_account;

pub use metadata::DEFAULT_METADATA_HOST;

// self
use crate::{
	_prelude::*,
	auth::{Audience, IdentityToken, TokenSource},
	config::AgentConfig,
	error::ConfigError,
	http::ReqwestHttpClient,
	identity::{CredentialStrategy, MintFuture},
	oauth::GOOGLE_TOKEN_ENDPOINT,
};
use file::CredentialsFile;

const LABEL: &str = "ambient";

/// Discovers ambient credentials and exchanges them for an identity token.
#[derive(Clone, Debug)]
pub struct AmbientStrategy {
	http_client: ReqwestHttpClient,
	credentials_file: Option<PathBuf>,
	well_known_file: Option<PathBuf>,
	metadata_base: Option<Url>,
	token_endpoint: Option<Url>,
	probe_timeout: std::time::Duration,
}
impl AmbientStrategy {
	/// Default time allowed for the metadata server probe.
	pub const DEFAULT_PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

	/// Creates a strategy with no credentials files and the default metadata server.
	pub fn new(http_client: ReqwestHttpClient) -> Self {
		Self {
			http_client,
			credentials_file: None,
			well_known_file: None,
			metadata_base: metadata::default_base(),
			token_endpoint: None,
			probe_timeout: Self::DEFAULT_PROBE_TIMEOUT,
		}
	}

	/// Builds the strategy from the discovered agent configuration.
	pub fn from_config(config: &AgentConfig, http_client: ReqwestHttpClient) -> Self {
		Self::new(http_client)
			.with_credentials_file(config.credentials_file.clone())
			.with_well_known_file(config.well_known_credentials_file.clone())
			.with_metadata_base(Some(config.metadata_base.clone()))
	}

	/// Sets (or clears) the explicit credentials file.
	pub fn with_credentials_file(mut self, path: Option<PathBuf>) -> Self {
		self.credentials_file = path;

		self
	}

	/// Sets (or clears) the well-known application-default credentials file.
	pub fn with_well_known_file(mut self, path: Option<PathBuf>) -> Self {
		self.well_known_file = path;

		self
	}

	/// Sets the metadata server base URL; `None` disables metadata discovery.
	pub fn with_metadata_base(mut self, base: Option<Url>) -> Self {
		self.metadata_base = base;

		self
	}

	/// Overrides the OAuth token endpoint used to refresh source user credentials and, when a key
	/// file names no `token_uri`, to redeem service-account assertions.
	pub fn with_token_endpoint(mut self, endpoint: Url) -> Self {
		self.token_endpoint = Some(endpoint);

		self
	}

	/// Overrides the metadata probe timeout.
	pub fn with_probe_timeout(mut self, timeout: std::time::Duration) -> Self {
		self.probe_timeout = timeout;

		self
	}

	async fn discover(&self, audience: &Audience) -> Result<IdentityToken> {
		if let Some(path) = &self.credentials_file {
			return match file::load(path).await? {
				Some(credentials) => self.mint_from_file(credentials, audience).await,
				None => Err(unavailable(format!(
					"credentials file `{}` does not exist",
					path.display()
				))),
			};
		}
		if let Some(path) = &self.well_known_file {
			if let Some(credentials) = file::load(path).await? {
				return self.mint_from_file(credentials, audience).await;
			}
		}

		match &self.metadata_base {
			Some(base) => {
				let secret =
					metadata::fetch_identity_token(&self.http_client, base, self.probe_timeout, audience)
						.await?;

				build_token(audience, secret)
			},
			None => Err(unavailable(
				"no credentials file was found and metadata discovery is disabled".into(),
			)),
		}
	}

	async fn mint_from_file(
		&self,
		credentials: CredentialsFile,
		audience: &Audience,
	) -> Result<IdentityToken> {
		match credentials {
			CredentialsFile::Impersonated(file) => {
				let secret = iam::generate_id_token(
					&self.http_client,
					&self.resolve_token_endpoint()?,
					&file,
					audience,
				)
				.await?;

				build_token(audience, secret)
			},
			CredentialsFile::ServiceAccount(key) => {
				let secret = service_account::fetch_id_token(
					&self.http_client,
					&self.resolve_token_endpoint()?,
					&key,
					audience,
				)
				.await?;

				build_token(audience, secret)
			},
			CredentialsFile::AuthorizedUser => Err(ConfigError::UnsupportedCredentials {
				kind: "authorized_user".into(),
				hint: "user credentials cannot mint identity tokens for an arbitrary audience; run \
				       'gcloud auth application-default login --impersonate-service-account=<account>'",
			}
			.into()),
			CredentialsFile::Other(kind) => Err(ConfigError::UnsupportedCredentials {
				kind,
				hint: "only service_account and impersonated_service_account files are supported",
			}
			.into()),
		}
	}

	fn resolve_token_endpoint(&self) -> Result<Url> {
		match &self.token_endpoint {
			Some(endpoint) => Ok(endpoint.clone()),
			None => Url::parse(GOOGLE_TOKEN_ENDPOINT)
				.map_err(|source| ConfigError::InvalidEndpoint { source }.into()),
		}
	}
}
impl CredentialStrategy for AmbientStrategy {
	fn label(&self) -> &'static str {
		LABEL
	}

	fn mint<'a>(&'a self, audience: &'a Audience) -> MintFuture<'a> {
		Box::pin(self.discover(audience))
	}
}

fn build_token(audience: &Audience, secret: String) -> Result<IdentityToken> {
	IdentityToken::builder(audience.clone(), TokenSource::Ambient)
		.secret(secret)
		.build()
		.map_err(|err| ConfigError::from(err).into())
}

fn unavailable(reason: String) -> Error {
	Error::Unavailable { strategy: LABEL, reason }
}
