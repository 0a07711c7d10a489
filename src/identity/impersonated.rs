//! Identity tokens minted by the `gcloud` CLI while impersonating a service account.

// std
use std::process::Stdio;
// crates.io
use tokio::process::Command;
// self
use crate::{
	_prelude::*,
	auth::{Audience, IdentityToken, ServiceAccount, TokenSource},
	error::{CliError, ConfigError},
	identity::{CredentialStrategy, MintFuture},
};

/// Program invoked when no override is configured.
pub const DEFAULT_GCLOUD_PROGRAM: &str = "gcloud";

/// Runs `gcloud auth print-identity-token` for a configured service account.
///
/// A missing binary, a non-zero exit, or empty output is reported as an error so the minter falls
/// through to the next strategy.
#[derive(Clone, Debug)]
pub struct ImpersonatedCliStrategy {
	service_account: ServiceAccount,
	program: PathBuf,
}
impl ImpersonatedCliStrategy {
	/// Creates a strategy that impersonates `service_account` through `gcloud`.
	pub fn new(service_account: ServiceAccount) -> Self {
		Self { service_account, program: PathBuf::from(DEFAULT_GCLOUD_PROGRAM) }
	}

	/// Overrides the program path.
	pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
		self.program = program.into();

		self
	}

	/// Returns the impersonated identity.
	pub fn service_account(&self) -> &ServiceAccount {
		&self.service_account
	}

	/// Command-line arguments passed to the program for `audience`.
	pub fn args(&self, audience: &Audience) -> [String; 4] {
		[
			"auth".into(),
			"print-identity-token".into(),
			format!("--impersonate-service-account={}", self.service_account),
			format!("--audiences={audience}"),
		]
	}

	async fn run(&self, audience: &Audience) -> Result<IdentityToken> {
		let program = self.program.display().to_string();
		let output = Command::new(&self.program)
			.args(self.args(audience))
			.stdin(Stdio::null())
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|source| CliError::Spawn { program: program.clone(), source })?;

		if !output.status.success() {
			return Err(CliError::NonZeroExit {
				program,
				status: output.status.to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
			}
			.into());
		}

		let stdout = String::from_utf8_lossy(&output.stdout);
		let token = stdout.trim();

		if token.is_empty() {
			return Err(CliError::EmptyOutput { program }.into());
		}

		IdentityToken::builder(audience.clone(), TokenSource::Impersonated)
			.secret(token)
			.build()
			.map_err(|err| ConfigError::from(err).into())
	}
}
impl CredentialStrategy for ImpersonatedCliStrategy {
	fn label(&self) -> &'static str {
		TokenSource::Impersonated.as_str()
	}

	fn mint<'a>(&'a self, audience: &'a Audience) -> MintFuture<'a> {
		Box::pin(self.run(audience))
	}
}
