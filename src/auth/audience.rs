//! Strongly typed audiences and impersonation identities.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $validate:ident) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new value after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, AudienceError> {
				let view = value.as_ref();

				$validate($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = AudienceError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				$validate($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = AudienceError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 2048;

/// Error returned when audience or service-account validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum AudienceError {
	/// The value was empty.
	#[error("{kind} cannot be empty.")]
	Empty {
		/// Kind of value (audience, service account).
		kind: &'static str,
	},
	/// The value contains whitespace characters.
	#[error("{kind} contains whitespace.")]
	ContainsWhitespace {
		/// Kind of value (audience, service account).
		kind: &'static str,
	},
	/// The value exceeded the allowed character count.
	#[error("{kind} exceeds {max} characters.")]
	TooLong {
		/// Kind of value (audience, service account).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
	/// The audience is not an absolute `http(s)` URL.
	#[error("{kind} `{value}` is not an absolute http(s) URL.")]
	NotAUrl {
		/// Kind of value (audience).
		kind: &'static str,
		/// Offending value.
		value: String,
	},
	/// The service account is not an email-like identity.
	#[error("{kind} `{value}` is not an email address.")]
	NotAnEmail {
		/// Kind of value (service account).
		kind: &'static str,
		/// Offending value.
		value: String,
	},
}

def_id! {
	Audience,
	"Target service URL an identity token is minted for; the callee checks it against its own URL.",
	"Audience",
	validate_audience
}
def_id! {
	ServiceAccount,
	"Service-account identity used for impersonation (an email address).",
	"ServiceAccount",
	validate_service_account
}

fn validate_common(kind: &'static str, view: &str) -> Result<(), AudienceError> {
	if view.is_empty() {
		return Err(AudienceError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(AudienceError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(AudienceError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

fn validate_audience(kind: &'static str, view: &str) -> Result<(), AudienceError> {
	validate_common(kind, view)?;

	match Url::parse(view) {
		Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
		_ => Err(AudienceError::NotAUrl { kind, value: view.to_owned() }),
	}
}

fn validate_service_account(kind: &'static str, view: &str) -> Result<(), AudienceError> {
	validate_common(kind, view)?;

	match view.split_once('@') {
		Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
		_ => Err(AudienceError::NotAnEmail { kind, value: view.to_owned() }),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn audiences_require_absolute_http_urls() {
		assert!(Audience::new("").is_err(), "Empty audiences must be rejected.");
		assert!(Audience::new(" https://svc-a").is_err(), "Whitespace must be rejected.");
		assert!(matches!(Audience::new("svc-a"), Err(AudienceError::NotAUrl { .. })));
		assert!(matches!(Audience::new("ftp://svc-a"), Err(AudienceError::NotAUrl { .. })));

		let audience =
			Audience::new("https://svc-a.run.app").expect("Audience fixture should be valid.");

		assert_eq!(audience.as_ref(), "https://svc-a.run.app");
	}

	#[test]
	fn audience_keeps_caller_spelling() {
		let audience = Audience::new("https://svc-a.run.app/")
			.expect("Audience with trailing slash should be valid.");

		assert_eq!(audience.as_ref(), "https://svc-a.run.app/");
		assert_ne!(
			audience,
			Audience::new("https://svc-a.run.app").expect("Audience fixture should be valid.")
		);
	}

	#[test]
	fn service_accounts_must_look_like_emails() {
		assert!(ServiceAccount::new("agent").is_err());
		assert!(ServiceAccount::new("@example.com").is_err());

		let account = ServiceAccount::new("agent@project.iam.gserviceaccount.com")
			.expect("Service account fixture should be valid.");

		assert_eq!(format!("{account:?}"), "ServiceAccount(agent@project.iam.gserviceaccount.com)");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let audience: Audience = serde_json::from_str("\"https://svc-b\"")
			.expect("Audience should deserialize successfully.");

		assert_eq!(audience.as_ref(), "https://svc-b");
		assert!(serde_json::from_str::<Audience>("\"not a url\"").is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<Audience, u8> = HashMap::from_iter([(
			Audience::new("https://svc-a").expect("Audience used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("https://svc-a"), Some(&7));
	}
}
