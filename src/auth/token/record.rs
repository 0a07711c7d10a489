//! Identity-token records, lifecycle helpers, builders, and unverified claim peeks.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	auth::{Audience, token::secret::TokenSecret},
};

/// Lifetime assumed when neither the issuer nor the token itself states an expiry.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Credential path that produced a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
	/// Minted by the identity CLI while impersonating a configured service account.
	Impersonated,
	/// Minted from ambient default credentials (credentials file or metadata server).
	Ambient,
}
impl TokenSource {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenSource::Impersonated => "impersonated",
			TokenSource::Ambient => "ambient",
		}
	}
}

/// Current lifecycle status for an identity token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is not yet valid because the minted-at instant is in the future.
	Pending,
	/// Token is currently valid.
	Active,
	/// Token exceeded its expiry instant.
	Expired,
}

/// Errors produced by [`IdentityTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum IdentityTokenBuilderError {
	/// Issued when no token value was provided.
	#[error("Identity token value is required.")]
	MissingSecret,
	/// Issued when the token value is blank.
	#[error("Identity token value cannot be blank.")]
	BlankSecret,
}

/// Claims read from a JWT payload without signature verification.
///
/// Only the recipient service can verify a token; these values are used for expiry bookkeeping
/// and diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UnverifiedClaims {
	/// Audience claim.
	#[serde(default)]
	pub aud: Option<String>,
	/// Expiry as seconds since the Unix epoch.
	#[serde(default)]
	pub exp: Option<i64>,
	/// Issued-at as seconds since the Unix epoch.
	#[serde(default)]
	pub iat: Option<i64>,
	/// Email of the calling identity, when included.
	#[serde(default)]
	pub email: Option<String>,
}
impl UnverifiedClaims {
	/// Decodes the payload segment of a compact JWT secret.
	pub fn peek(secret: &TokenSecret) -> Option<Self> {
		let payload = secret.jwt_payload()?;
		let raw = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;

		serde_json::from_slice(&raw).ok()
	}

	/// Returns the `exp` claim as an instant.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.exp.and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
	}
}

/// Immutable record describing one minted identity token.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityToken {
	/// Audience the token was minted for.
	pub audience: Audience,
	/// Raw token secret; callers must avoid logging it.
	pub secret: TokenSecret,
	/// Strategy that produced the token.
	pub source: TokenSource,
	/// Instant the token was received.
	pub minted_at: OffsetDateTime,
	/// Expiry taken from the issuer, the JWT `exp` claim, or the default lifetime.
	pub expires_at: OffsetDateTime,
}
impl IdentityToken {
	/// Returns a builder for the provided audience and source.
	pub fn builder(audience: Audience, source: TokenSource) -> IdentityTokenBuilder {
		IdentityTokenBuilder::new(audience, source)
	}

	/// Renders the `Authorization` header value (`Bearer <token>`).
	pub fn bearer(&self) -> String {
		self.secret.bearer()
	}

	/// Returns unverified claims when the secret is a decodable JWT.
	pub fn unverified_claims(&self) -> Option<UnverifiedClaims> {
		UnverifiedClaims::peek(&self.secret)
	}

	/// Returns `true` when the token may be presented to `expected`.
	///
	/// The record's audience must match, and when the secret carries an `aud` claim that claim
	/// must match too.
	pub fn is_valid_for(&self, expected: &Audience) -> bool {
		if &self.audience != expected {
			return false;
		}

		match self.unverified_claims().and_then(|claims| claims.aud) {
			Some(aud) => aud == expected.as_ref(),
			None => true,
		}
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if instant < self.minted_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Active
	}

	/// Returns `true` if the token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Expired)
	}
}
impl Debug for IdentityToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdentityToken")
			.field("audience", &self.audience)
			.field("secret", &"<redacted>")
			.field("source", &self.source)
			.field("minted_at", &self.minted_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`IdentityToken`].
#[derive(Clone, Debug)]
pub struct IdentityTokenBuilder {
	audience: Audience,
	source: TokenSource,
	secret: Option<TokenSecret>,
	minted_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl IdentityTokenBuilder {
	fn new(audience: Audience, source: TokenSource) -> Self {
		Self { audience, source, secret: None, minted_at: None, expires_at: None, expires_in: None }
	}

	/// Provides the raw token value.
	pub fn secret(mut self, token: impl Into<String>) -> Self {
		self.secret = Some(TokenSecret::new(token));

		self
	}

	/// Sets the minted-at instant.
	pub fn minted_at(mut self, instant: OffsetDateTime) -> Self {
		self.minted_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the minted instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces an [`IdentityToken`].
	///
	/// Expiry precedence: explicit instant, explicit duration, JWT `exp` claim, then
	/// [`DEFAULT_TOKEN_LIFETIME`].
	pub fn build(self) -> Result<IdentityToken, IdentityTokenBuilderError> {
		let secret = self.secret.ok_or(IdentityTokenBuilderError::MissingSecret)?;

		if secret.expose().trim().is_empty() {
			return Err(IdentityTokenBuilderError::BlankSecret);
		}

		let minted_at = self.minted_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => minted_at + delta,
			(None, None) => UnverifiedClaims::peek(&secret)
				.and_then(|claims| claims.expires_at())
				.unwrap_or(minted_at + DEFAULT_TOKEN_LIFETIME),
		};

		Ok(IdentityToken { audience: self.audience, secret, source: self.source, minted_at, expires_at })
	}
}

#[cfg(test)]
pub(crate) fn fake_jwt(aud: &str, exp: i64) -> String {
	let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
	let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"aud":"{aud}","exp":{exp}}}"#));

	format!("{header}.{payload}.signature")
}
