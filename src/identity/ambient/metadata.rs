//! Hosted metadata server discovery and identity token fetches.

// crates.io
use reqwest::StatusCode;
// self
use crate::{
	_prelude::*,
	auth::Audience,
	error::{ConfigError, TransientError},
	http::ReqwestHttpClient,
};

/// Host queried when `GCE_METADATA_HOST` is unset.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const ENDPOINT: &str = "metadata";
const FLAVOR_HEADER: &str = "Metadata-Flavor";
const FLAVOR_VALUE: &str = "Google";
const TOKEN_PATH: &str = "computeMetadata/v1/instance/service-accounts/default/token";
const IDENTITY_PATH: &str = "computeMetadata/v1/instance/service-accounts/default/identity";

#[derive(Deserialize)]
struct DefaultAccessToken {
	access_token: String,
}

pub(super) fn default_base() -> Option<Url> {
	Url::parse(&format!("http://{DEFAULT_METADATA_HOST}/")).ok()
}

/// Probes the metadata server, confirms the default service account can be refreshed, and fetches
/// an identity token for `audience`.
pub(super) async fn fetch_identity_token(
	http_client: &ReqwestHttpClient,
	base: &Url,
	probe_timeout: std::time::Duration,
	audience: &Audience,
) -> Result<String> {
	probe(http_client, base, probe_timeout).await?;

	let token_url = join(base, TOKEN_PATH)?;
	let request = http_client.get(token_url).header(FLAVOR_HEADER, FLAVOR_VALUE);
	let access = http_client
		.send_json::<DefaultAccessToken>(ENDPOINT, request)
		.await
		.map_err(no_service_account)?;

	if access.access_token.trim().is_empty() {
		return Err(unavailable("the default service account returned an empty access token"));
	}

	let mut identity_url = join(base, IDENTITY_PATH)?;

	identity_url
		.query_pairs_mut()
		.append_pair("audience", audience.as_ref())
		.append_pair("format", "full");

	let request = http_client.get(identity_url).header(FLAVOR_HEADER, FLAVOR_VALUE);
	let (meta, body) = http_client.send_text(ENDPOINT, request).await.map_err(no_service_account)?;
	let token = body.trim();

	if token.is_empty() {
		return Err(TransientError::Endpoint {
			endpoint: ENDPOINT,
			message: "identity endpoint returned an empty token".into(),
			status: meta.status,
			retry_after: meta.retry_after,
		}
		.into());
	}

	Ok(token.to_owned())
}

async fn probe(
	http_client: &ReqwestHttpClient,
	base: &Url,
	timeout: std::time::Duration,
) -> Result<()> {
	let response = http_client
		.get(base.clone())
		.header(FLAVOR_HEADER, FLAVOR_VALUE)
		.timeout(timeout)
		.send()
		.await
		.map_err(|_| unavailable(&format!("metadata server at {base} is unreachable")))?;
	let flavor = response.headers().get(FLAVOR_HEADER).and_then(|value| value.to_str().ok());

	if flavor != Some(FLAVOR_VALUE) {
		return Err(unavailable(&format!("{base} did not identify as a metadata server")));
	}

	Ok(())
}

fn join(base: &Url, path: &str) -> Result<Url> {
	base.join(path).map_err(|source| ConfigError::InvalidEndpoint { source }.into())
}

fn no_service_account(err: Error) -> Error {
	match err {
		Error::Rejected { status, .. } if status == StatusCode::NOT_FOUND.as_u16() =>
			unavailable("no service account is attached to this environment"),
		other => other,
	}
}

fn unavailable(reason: &str) -> Error {
	Error::Unavailable { strategy: super::LABEL, reason: reason.to_owned() }
}
