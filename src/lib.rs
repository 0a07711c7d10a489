//! Call guards for LLM agents: audience-scoped identity tokens for tool services, a fixed-interval
//! rate limiter in front of every model call, and exponential-backoff retries when a model call
//! fails.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod ext;
pub mod flows;
pub mod http;
pub mod identity;
pub mod oauth;
pub mod obs;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::EnvLookup,
		http::ReqwestHttpClient,
		identity::{AmbientStrategy, CredentialStrategy, IdentityTokenMinter},
	};

	/// Builds a reqwest HTTP client with short timeouts suitable for `httpmock` servers.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.timeout(std::time::Duration::from_secs(5))
			.build()
			.expect("Failed to build Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Environment lookup backed by a fixed list of `(name, value)` pairs.
	pub fn env_from_pairs<const N: usize>(pairs: [(&str, &str); N]) -> EnvLookup {
		let map: HashMap<String, String> =
			pairs.into_iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();

		EnvLookup::from_map(map)
	}

	/// Constructs a minter whose only strategy is ambient discovery against the provided
	/// metadata server base URL, with no credentials file.
	pub fn build_metadata_test_minter(metadata_base: &str) -> IdentityTokenMinter {
		let metadata_base =
			Url::parse(metadata_base).expect("Metadata base URL fixture should parse.");
		let ambient = AmbientStrategy::new(test_reqwest_http_client())
			.with_credentials_file(None)
			.with_metadata_base(Some(metadata_base));
		let strategies: Vec<Arc<dyn CredentialStrategy>> = vec![Arc::new(ambient)];

		IdentityTokenMinter::with_strategies(strategies)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		path::{Path, PathBuf},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
