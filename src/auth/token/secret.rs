//! Redacted identity-token secret.

// self
use crate::_prelude::*;

const REDACTED: &str = "<redacted>";

/// Raw identity token (usually a compact JWT) that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps the token text printed by a credential source, trimming surrounding whitespace.
	pub fn new(value: impl Into<String>) -> Self {
		let value = value.into();

		match value.trim() {
			trimmed if trimmed.len() == value.len() => Self(value),
			trimmed => Self(trimmed.to_owned()),
		}
	}

	/// Returns the raw token. Only header rendering should need this.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Renders the secret as an `Authorization` header value (`Bearer <token>`).
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.0)
	}

	/// Returns the payload segment when the secret has the `header.payload.signature` shape.
	pub(crate) fn jwt_payload(&self) -> Option<&str> {
		let mut segments = self.0.split('.');
		let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);

		match segments.next() {
			Some(_) => None,
			None => Some(payload),
		}
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenSecret({REDACTED})")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(REDACTED)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatters_never_print_the_token() {
		let secret = TokenSecret::new("eyJhbGciOi.payload.sig");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
		assert_eq!(secret.to_string(), "<redacted>");
	}

	#[test]
	fn cli_output_is_trimmed_and_rendered_as_bearer() {
		let secret = TokenSecret::new("abc.def.ghi\n");

		assert_eq!(secret.expose(), "abc.def.ghi");
		assert_eq!(secret.bearer(), "Bearer abc.def.ghi");
	}

	#[test]
	fn jwt_payload_requires_three_segments() {
		assert_eq!(TokenSecret::new("a.b.c").jwt_payload(), Some("b"));
		assert_eq!(TokenSecret::new("opaque").jwt_payload(), None);
		assert_eq!(TokenSecret::new("a.b.c.d").jwt_payload(), None);
	}
}
