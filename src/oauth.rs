//! OAuth 2.0 refresh-grant facade used to refresh ambient user credentials.

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError,
	RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, TransientError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
};

/// Token endpoint used by Google user credentials.
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
/// Scope requested when refreshing source credentials for impersonation.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const ENDPOINT: &str = "token";

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Access token obtained from a refresh grant.
#[derive(Clone, Debug)]
pub struct AccessGrant {
	/// Access token secret.
	pub access_token: TokenSecret,
}

/// Refresh-grant client bound to one token endpoint and client registration.
pub(crate) struct RefreshFacade {
	oauth_client: ConfiguredBasicClient,
	http_client: ReqwestHttpClient,
}
impl RefreshFacade {
	pub(crate) fn new(
		token_endpoint: &Url,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: ReqwestHttpClient,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let mut oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		if let Some(secret) = client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
		}

		Ok(Self { oauth_client, http_client })
	}

	/// Performs `grant_type=refresh_token` and returns the new access token.
	pub(crate) async fn refresh(&self, refresh_token: &str, scopes: &[&str]) -> Result<AccessGrant> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(meta.clone());
		let refresh_secret = RefreshToken::new(refresh_token.to_owned());
		let mut request = self.oauth_client.exchange_refresh_token(&refresh_secret);

		for scope in scopes {
			request = request.add_scope(Scope::new((*scope).to_owned()));
		}

		let response = request
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;

		Ok(AccessGrant { access_token: TokenSecret::new(response.access_token().secret().to_owned()) })
	}
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> Error {
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response_error(response, meta_ref),
		RequestTokenError::Request(error) => map_transport_error(meta_ref, error),
		RequestTokenError::Parse(error, _body) => TransientError::ResponseParse {
			endpoint: ENDPOINT,
			source: error,
			status: meta_status(meta_ref),
		}
		.into(),
		RequestTokenError::Other(message) => TransientError::Endpoint {
			endpoint: ENDPOINT,
			message,
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		}
		.into(),
	}
}

fn map_server_response_error(response: BasicErrorResponse, meta: Option<&ResponseMetadata>) -> Error {
	let message = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	match response.error() {
		BasicErrorResponseType::InvalidGrant
		| BasicErrorResponseType::InvalidClient
		| BasicErrorResponseType::UnauthorizedClient => Error::InvalidGrant { reason: message },
		_ => match meta_status(meta) {
			Some(status) => crate::http::status_error(ENDPOINT, status, message, meta_retry_after(meta)),
			None => TransientError::Endpoint {
				endpoint: ENDPOINT,
				message,
				status: None,
				retry_after: None,
			}
			.into(),
		},
	}
}

fn map_transport_error(meta: Option<&ResponseMetadata>, err: HttpClientError<ReqwestError>) -> Error {
	match err {
		HttpClientError::Reqwest(inner) => crate::http::map_reqwest_error(ENDPOINT, *inner),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::Endpoint {
			endpoint: ENDPOINT,
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
		_ => TransientError::Endpoint {
			endpoint: ENDPOINT,
			message: "HTTP client error occurred while calling the token endpoint".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
