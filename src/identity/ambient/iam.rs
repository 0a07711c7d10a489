//! IAM Credentials `generateIdToken` for impersonated service-account files.

// self
use crate::{
	_prelude::*,
	auth::Audience,
	error::ConfigError,
	http::ReqwestHttpClient,
	identity::ambient::file::ImpersonatedFile,
	oauth::{CLOUD_PLATFORM_SCOPE, RefreshFacade},
};

const ENDPOINT: &str = "iam";
const ACCESS_TOKEN_SUFFIX: &str = ":generateAccessToken";
const ID_TOKEN_SUFFIX: &str = ":generateIdToken";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateIdTokenRequest<'a> {
	audience: &'a str,
	include_email: bool,
	#[serde(skip_serializing_if = "<[String]>::is_empty")]
	delegates: &'a [String],
}

#[derive(Deserialize)]
struct GenerateIdTokenResponse {
	token: String,
}

/// Refreshes the file's source user credentials, then asks IAM for an identity token of the
/// impersonated account with `audience`.
pub(crate) async fn generate_id_token(
	http_client: &ReqwestHttpClient,
	token_endpoint: &Url,
	file: &ImpersonatedFile,
	audience: &Audience,
) -> Result<String> {
	let source = &file.source_credentials;

	if source.kind != "authorized_user" {
		return Err(ConfigError::UnsupportedCredentials {
			kind: source.kind.clone(),
			hint: "impersonation source credentials must be authorized_user",
		}
		.into());
	}

	let client_id = required(source.client_id.as_deref(), "source_credentials.client_id")?;
	let refresh_token = required(source.refresh_token.as_deref(), "source_credentials.refresh_token")?;
	let url = id_token_url(&file.service_account_impersonation_url)?;
	let facade = RefreshFacade::new(
		token_endpoint,
		client_id,
		source.client_secret.as_deref(),
		http_client.clone(),
	)?;
	let grant = facade.refresh(refresh_token, &[CLOUD_PLATFORM_SCOPE]).await?;
	let body = GenerateIdTokenRequest {
		audience: audience.as_ref(),
		include_email: true,
		delegates: &file.delegates,
	};
	let request = http_client.post(url).bearer_auth(grant.access_token.expose()).json(&body);
	let response: GenerateIdTokenResponse = http_client.send_json(ENDPOINT, request).await?;

	Ok(response.token)
}

/// Derives the `generateIdToken` URL from the file's `generateAccessToken` URL.
pub(crate) fn id_token_url(impersonation_url: &str) -> Result<Url> {
	let base = impersonation_url
		.strip_suffix(ACCESS_TOKEN_SUFFIX)
		.ok_or_else(|| ConfigError::InvalidImpersonationUrl { url: impersonation_url.to_owned() })?;

	Url::parse(&format!("{base}{ID_TOKEN_SUFFIX}"))
		.map_err(|source| ConfigError::InvalidEndpoint { source }.into())
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str> {
	match value {
		Some(value) if !value.trim().is_empty() => Ok(value),
		_ => Err(ConfigError::MissingCredentialField { field }.into()),
	}
}
