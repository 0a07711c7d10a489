//! Transport primitives for credential endpoints.
//!
//! [`ReqwestHttpClient`] is the guard's only dependency on an HTTP stack. It serves two
//! consumers: the `oauth2` refresh grant (through [`InstrumentedHandle`], an
//! [`AsyncHttpClient`] that records [`ResponseMetadata`] into a [`ResponseMetadataSlot`]) and
//! the plain JSON/text endpoints of the metadata server and IAM Credentials API (through
//! [`ReqwestHttpClient::send_text`] and [`ReqwestHttpClient::send_json`]). Both paths classify
//! failures with the same status + `Retry-After` metadata.

// std
use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	RequestBuilder,
	header::{HeaderMap, RETRY_AFTER},
};
use serde::de::DeserializeOwned;
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError, TransportError},
};

const BODY_PREVIEW_LEN: usize = 256;

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
///
/// A fresh slot is created for each token request and read immediately after `oauth2`
/// resolves.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Credential endpoints return results directly; configure any custom [`ReqwestClient`] to
/// disable redirect following.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds an instrumented `oauth2` HTTP client that captures response metadata.
	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}

	/// Sends `request` and returns the body of a successful response as text.
	///
	/// Non-success statuses are classified by [`status_error`] and carry a body preview.
	pub async fn send_text(
		&self,
		endpoint: &'static str,
		request: RequestBuilder,
	) -> Result<(ResponseMetadata, String)> {
		let response = request.send().await.map_err(|err| map_reqwest_error(endpoint, err))?;
		let status = response.status();
		let meta = ResponseMetadata {
			status: Some(status.as_u16()),
			retry_after: parse_retry_after(response.headers()),
		};
		let body = response.text().await.map_err(|err| map_reqwest_error(endpoint, err))?;

		if !status.is_success() {
			return Err(status_error(
				endpoint,
				status.as_u16(),
				format!("HTTP {}: {}", status.as_u16(), body_preview(&body)),
				meta.retry_after,
			));
		}

		Ok((meta, body))
	}

	/// Sends `request` and decodes a successful JSON body into `T`.
	pub async fn send_json<T>(&self, endpoint: &'static str, request: RequestBuilder) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let (meta, body) = self.send_text(endpoint, request).await?;
		let mut de = serde_json::Deserializer::from_str(&body);

		serde_path_to_error::deserialize(&mut de).map_err(|source| {
			TransientError::ResponseParse { endpoint, source, status: meta.status }.into()
		})
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl Debug for ReqwestHttpClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestHttpClient(..)")
	}
}

/// Instrumented adapter that implements [`AsyncHttpClient`] for reqwest.
pub(crate) struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}
impl InstrumentedHttpClient {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self { client, slot }
	}
}

/// Handle returned by [`ReqwestHttpClient`] for `oauth2` token requests.
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient::new(client, slot)))
	}
}
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers);

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Classifies a reqwest failure: builder problems are configuration, timeouts are transient,
/// everything else is transport.
pub(crate) fn map_reqwest_error(endpoint: &'static str, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::Endpoint {
			endpoint,
			message: "request timed out".into(),
			status: err.status().map(|code| code.as_u16()),
			retry_after: None,
		}
		.into();
	}

	TransportError::from(err).into()
}

/// Maps a non-success status: 408, 429 and 5xx are transient, anything else is a rejection.
pub(crate) fn status_error(
	endpoint: &'static str,
	status: u16,
	message: String,
	retry_after: Option<Duration>,
) -> Error {
	match status {
		408 | 429 | 500..=599 =>
			TransientError::Endpoint { endpoint, message, status: Some(status), retry_after }.into(),
		_ => Error::Rejected { endpoint, status, message },
	}
}

fn body_preview(body: &str) -> &str {
	let trimmed = body.trim();

	match trimmed.char_indices().nth(BODY_PREVIEW_LEN) {
		Some((idx, _)) => &trimmed[..idx],
		None => trimmed,
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return i64::try_from(secs).ok().map(Duration::seconds);
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_delta_seconds() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(30)));
	}

	#[test]
	fn retry_after_beyond_i64_is_ignored() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("18446744073709551615"));

		assert_eq!(parse_retry_after(&headers), None);
	}

	#[test]
	fn client_errors_are_rejections_except_timeout_and_throttle() {
		let denied = status_error("iam", 403, "PERMISSION_DENIED".into(), None);

		assert!(matches!(denied, Error::Rejected { endpoint: "iam", status: 403, .. }));

		for status in [408, 429, 500, 503] {
			assert!(matches!(
				status_error("iam", status, "retry me".into(), Some(Duration::seconds(1))),
				Error::Transient(TransientError::Endpoint { status: Some(code), retry_after: Some(_), .. })
					if code == status
			));
		}
	}

	#[test]
	fn retry_after_ignores_garbage() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));

		assert_eq!(parse_retry_after(&headers), None);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}

	#[test]
	fn body_preview_truncates_on_char_boundary() {
		let long = "é".repeat(BODY_PREVIEW_LEN + 10);

		assert_eq!(body_preview(&long).chars().count(), BODY_PREVIEW_LEN);
		assert_eq!(body_preview("  short  "), "short");
	}

	#[test]
	fn metadata_slot_take_consumes_value() {
		let slot = ResponseMetadataSlot::default();

		slot.store(ResponseMetadata { status: Some(503), retry_after: None });

		assert_eq!(slot.take().and_then(|meta| meta.status), Some(503));
		assert!(slot.take().is_none());
	}
}
