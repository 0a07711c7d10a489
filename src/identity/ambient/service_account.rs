//! JWT-bearer grant for service-account key files.
//!
//! The key signs an RS256 assertion whose `target_audience` claim names the audience; the token
//! endpoint answers with an identity token for that audience in `id_token`.

// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
// self
use crate::{
	_prelude::*,
	auth::Audience,
	error::ConfigError,
	http::ReqwestHttpClient,
	identity::ambient::file::ServiceAccountKey,
};

const ENDPOINT: &str = "token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::hours(1);

#[derive(Serialize)]
struct AssertionClaims<'a> {
	iss: &'a str,
	aud: &'a str,
	iat: i64,
	exp: i64,
	target_audience: &'a str,
}

#[derive(Serialize)]
struct GrantForm<'a> {
	grant_type: &'static str,
	assertion: &'a str,
}

#[derive(Deserialize)]
struct IdTokenResponse {
	id_token: String,
}

/// Exchanges a signed assertion at the key's `token_uri` (or `default_token_uri`) for an identity
/// token whose audience is `audience`.
pub(crate) async fn fetch_id_token(
	http_client: &ReqwestHttpClient,
	default_token_uri: &Url,
	key: &ServiceAccountKey,
	audience: &Audience,
) -> Result<String> {
	let token_uri = match key.token_uri.as_deref() {
		Some(uri) => Url::parse(uri).map_err(|source| ConfigError::InvalidEndpoint { source })?,
		None => default_token_uri.clone(),
	};
	let assertion = sign_assertion(key, &token_uri, audience, OffsetDateTime::now_utc())?;
	let request = http_client
		.post(token_uri)
		.form(&GrantForm { grant_type: JWT_BEARER_GRANT, assertion: &assertion });
	let response: IdTokenResponse = http_client.send_json(ENDPOINT, request).await?;

	Ok(response.id_token)
}

fn sign_assertion(
	key: &ServiceAccountKey,
	token_uri: &Url,
	audience: &Audience,
	now: OffsetDateTime,
) -> Result<String> {
	let mut header = Header::new(Algorithm::RS256);

	header.kid = key.private_key_id.clone();

	let claims = AssertionClaims {
		iss: &key.client_email,
		aud: token_uri.as_str(),
		iat: now.unix_timestamp(),
		exp: (now + ASSERTION_LIFETIME).unix_timestamp(),
		target_audience: audience.as_ref(),
	};
	let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
		.map_err(|source| ConfigError::AssertionSigning { source })?;

	jsonwebtoken::encode(&header, &claims, &encoding_key)
		.map_err(|source| ConfigError::AssertionSigning { source }.into())
}
