//! Atlas control-plane contract used by the broker to create, delete, and locate resources.
//!
//! The broker only talks to Atlas through [`AtlasControlPlane`], so tests and downstream
//! crates can swap the HTTP adapter for an in-memory one. The bundled
//! [`AtlasHttpClient`](http::AtlasHttpClient) speaks the Atlas Admin API v2 over reqwest.

#[cfg(feature = "reqwest")] pub mod http;
#[cfg(feature = "reqwest")] pub use http::AtlasHttpClient;

// self
use crate::{
	_prelude::*,
	auth::{DatabaseUserPassword, ProjectId, RoleSet},
	context::OperationContext,
	error::ENDPOINT_HINT,
};

/// Boxed future returned by [`AtlasControlPlane`] operations.
pub type AtlasFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AtlasError>> + 'a + Send>>;

/// Atlas operations the broker depends on.
///
/// Implementations must honor the context's cancellation and deadline, and must be
/// shareable across concurrent broker calls. They must also be `'static` so a dropped broker
/// call can still hand the delete to the runtime.
pub trait AtlasControlPlane
where
	Self: 'static + Send + Sync,
{
	/// Creates a SCRAM user authenticated against `admin` that Atlas removes after `ttl`.
	///
	/// A username collision must surface as [`AtlasError::UserAlreadyExists`].
	fn create_database_user<'a>(
		&'a self,
		ctx: &'a OperationContext,
		project: &'a ProjectId,
		username: &'a str,
		password: &'a DatabaseUserPassword,
		roles: &'a RoleSet,
		ttl: Duration,
	) -> AtlasFuture<'a, ()>;

	/// Deletes a user at project scope. A user that no longer exists counts as deleted.
	fn delete_database_user<'a>(
		&'a self,
		ctx: &'a OperationContext,
		project: &'a ProjectId,
		username: &'a str,
	) -> AtlasFuture<'a, ()>;

	/// Returns the cluster's public standard SRV connection string.
	fn get_cluster_srv_uri<'a>(
		&'a self,
		ctx: &'a OperationContext,
		project: &'a ProjectId,
		cluster: &'a str,
	) -> AtlasFuture<'a, String>;
}

/// Failures reported by [`AtlasControlPlane`] implementations.
#[derive(Clone, Debug, ThisError)]
pub enum AtlasError {
	/// A database user with the requested name already exists.
	#[error("A database user with this name already exists.")]
	UserAlreadyExists,
	/// Cluster advertises no public standard SRV string.
	#[error("Cluster `{cluster}` has no public standard SRV connection string.")]
	ClusterHasNoPublicEndpoint {
		/// Cluster that was looked up.
		cluster: String,
	},
	/// Referenced Atlas resource does not exist.
	#[error("Atlas resource was not found ({code}): {detail}.")]
	NotFound {
		/// Atlas error code.
		code: String,
		/// Atlas-supplied detail.
		detail: String,
	},
	/// Atlas answered with an error status.
	#[error("Atlas returned HTTP {status} ({}): {detail}.", .code.as_deref().unwrap_or("no error code"))]
	Api {
		/// HTTP status code.
		status: u16,
		/// Atlas error code, when supplied.
		code: Option<String>,
		/// Atlas-supplied detail.
		detail: String,
		/// Retry-After hint, when supplied.
		retry_after: Option<Duration>,
	},
	/// Atlas could not be reached.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Atlas answered with a body that could not be decoded.
	#[error("Atlas returned a malformed response body.")]
	Parse {
		/// HTTP status code.
		status: Option<u16>,
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
	},
	/// Request payload could not be encoded.
	#[error("Atlas request could not be encoded: {message}.")]
	Encode {
		/// Human-readable reason.
		message: String,
	},
	/// Context ended before Atlas answered.
	#[error("Atlas call was cancelled.")]
	Cancelled,
}
impl AtlasError {
	/// Returns `true` for failures worth retrying with backoff.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Transport(_) => true,
			Self::Api { status, .. } => *status == 429 || (500..600).contains(status),
			_ => false,
		}
	}

	/// Returns a remediation hint when one is known.
	pub fn remediation(&self) -> Option<&'static str> {
		match self {
			Self::ClusterHasNoPublicEndpoint { .. } => Some(ENDPOINT_HINT),
			Self::Api { status: 401 | 403, .. } => Some(
				"Check that the Atlas API key is valid and has Project Owner access, and that \
				this host is on the API access list.",
			),
			Self::NotFound { .. } => Some("Check the project ID and cluster name."),
			Self::Transport(_) => Some("Check network connectivity to the Atlas Admin API."),
			_ => None,
		}
	}
}

/// Transport-level failures (network, TLS, timeouts).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the Atlas Admin API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: Arc<dyn std::error::Error + Send + Sync>,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn retry_classification_matches_status() {
		let api =
			|status| AtlasError::Api { status, code: None, detail: "x".into(), retry_after: None };

		assert!(api(429).is_retryable());
		assert!(api(503).is_retryable());
		assert!(!api(400).is_retryable());
		assert!(!AtlasError::UserAlreadyExists.is_retryable());
		assert!(
			AtlasError::from(TransportError::network(std::io::Error::other("reset"))).is_retryable()
		);
	}

	#[test]
	fn api_errors_render_code_and_hint() {
		let err = AtlasError::Api {
			status: 403,
			code: Some("ORG_REQUIRES_ACCESS_LIST".into()),
			detail: "IP not allowed".into(),
			retry_after: None,
		};

		assert_eq!(
			err.to_string(),
			"Atlas returned HTTP 403 (ORG_REQUIRES_ACCESS_LIST): IP not allowed."
		);
		assert!(err.remediation().is_some_and(|hint| hint.contains("access list")));
	}
}
