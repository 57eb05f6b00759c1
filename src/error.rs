//! Broker-level error taxonomy shared by the role parser, rewriter, adapters, and facade.

// self
use crate::{
	_prelude::*,
	atlas::AtlasError,
	auth::{ClusterName, ProjectId, RoleSpecError},
	obs::BrokerStage,
	uri::UriError,
};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Hint attached to authentication failures that outlive the propagation budget.
pub const TIER_HINT: &str = "Check the Atlas cluster tier: M0 and Flex clusters reject database \
	users created for custom-role operations.";
/// Hint attached to propagation timeouts without a more specific cause.
pub const PROPAGATION_HINT: &str = "Atlas may still be rolling the user out to every node; retry \
	with a longer operation deadline or disable probing.";
/// Hint attached to clusters that expose no public SRV endpoint.
pub const ENDPOINT_HINT: &str = "Enable a public endpoint for the cluster or connect through a \
	private endpoint from a network on the project access list.";

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Role specification could not be parsed.
	#[error(transparent)]
	InvalidRoleSpec(#[from] RoleSpecError),
	/// Connection string could not be rewritten.
	#[error(transparent)]
	Uri(#[from] UriError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// Atlas advertises no public standard SRV string for the cluster.
	#[error("Cluster `{cluster}` in project `{project}` has no public SRV endpoint.")]
	ClusterHasNoPublicEndpoint {
		/// Project owning the cluster.
		project: ProjectId,
		/// Cluster that was looked up.
		cluster: ClusterName,
	},
	/// Control-plane call failed outside user provisioning.
	#[error("Atlas `{operation}` call failed for cluster `{cluster}` in project `{project}`.")]
	ControlPlane {
		/// Adapter operation name.
		operation: &'static str,
		/// Project tied to the call.
		project: ProjectId,
		/// Cluster tied to the call.
		cluster: ClusterName,
		/// Adapter failure.
		#[source]
		source: AtlasError,
	},
	/// Temporary user could not be created.
	#[error(
		"Failed to provision temporary user `{username}` in project `{project}` after {attempts} attempt(s)."
	)]
	UserProvisioningFailed {
		/// Project the user was meant for.
		project: ProjectId,
		/// Cluster the caller wanted to reach.
		cluster: ClusterName,
		/// Last username attempted.
		username: String,
		/// Number of create attempts issued.
		attempts: u32,
		/// Last adapter failure.
		#[source]
		source: AtlasError,
	},
	/// Temporary user did not become usable within the propagation budget.
	#[error(
		"Temporary user `{username}` did not propagate to cluster `{cluster}` within {elapsed:?} ({}). {suggestion}",
		probe_mode(.probed)
	)]
	PropagationTimedOut {
		/// Project owning the user.
		project: ProjectId,
		/// Cluster being waited on.
		cluster: ClusterName,
		/// Temporary username.
		username: String,
		/// Time spent waiting.
		elapsed: Duration,
		/// Whether probing was used.
		probed: bool,
		/// Remediation hint.
		suggestion: &'static str,
		/// Nested rejection when the cluster kept refusing the credentials.
		#[source]
		cause: Option<AuthenticationRejected>,
		/// Cleanup failure observed after the timeout, if any.
		cleanup: Option<Box<CleanupError>>,
	},
	/// Parent context was cancelled or reached its deadline.
	#[error("Broker call was cancelled during {stage}{}.", deadline_suffix(.deadline_exceeded))]
	Cancelled {
		/// State the call was in when cancellation was observed.
		stage: BrokerStage,
		/// True when the parent deadline elapsed rather than an explicit cancel.
		deadline_exceeded: bool,
		/// Temporary username, once one was generated.
		username: Option<String>,
		/// Cleanup failure observed after cancellation, if any.
		cleanup: Option<Box<CleanupError>>,
	},
	/// Operation succeeded but the temporary user could not be removed.
	#[error(transparent)]
	CleanupFailed(CleanupError),
	/// Caller-supplied operation failed; the source is its error, unchanged.
	#[error("{source}")]
	Operation {
		/// Error returned by the operation.
		#[source]
		source: BoxError,
		/// Cleanup failure observed after the operation, if any.
		cleanup: Option<Box<CleanupError>>,
	},
}
impl Error {
	/// Returns the fieldless classification of this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::InvalidRoleSpec(_) => ErrorKind::InvalidRoleSpec,
			Self::Uri(UriError::AlreadyHasCredentials) => ErrorKind::UriAlreadyHasCredentials,
			Self::Uri(_) => ErrorKind::InvalidUri,
			Self::Config(_) => ErrorKind::Config,
			Self::ClusterHasNoPublicEndpoint { .. } => ErrorKind::ClusterHasNoPublicEndpoint,
			Self::ControlPlane { .. } => ErrorKind::ControlPlane,
			Self::UserProvisioningFailed { .. } => ErrorKind::UserProvisioningFailed,
			Self::PropagationTimedOut { .. } => ErrorKind::PropagationTimedOut,
			Self::Cancelled { .. } => ErrorKind::Cancelled,
			Self::CleanupFailed(_) => ErrorKind::CleanupFailed,
			Self::Operation { .. } => ErrorKind::Operation,
		}
	}

	/// Returns a remediation hint when one is known.
	pub fn remediation(&self) -> Option<&'static str> {
		match self {
			Self::ClusterHasNoPublicEndpoint { .. } => Some(ENDPOINT_HINT),
			Self::PropagationTimedOut { suggestion, .. } => Some(*suggestion),
			Self::UserProvisioningFailed { source, .. } => source.remediation(),
			Self::ControlPlane { source, .. } => source.remediation(),
			Self::CleanupFailed(_) => Some(
				"Delete the temporary user manually; Atlas also removes it once its TTL lapses.",
			),
			_ => None,
		}
	}

	/// Returns the cleanup failure attached to a primary error.
	pub fn cleanup_failure(&self) -> Option<&CleanupError> {
		match self {
			Self::CleanupFailed(err) => Some(err),
			Self::PropagationTimedOut { cleanup, .. }
			| Self::Cancelled { cleanup, .. }
			| Self::Operation { cleanup, .. } => cleanup.as_deref(),
			_ => None,
		}
	}

	/// Returns the operation's own error when this is an [`Error::Operation`].
	pub fn operation_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
		match self {
			Self::Operation { source, .. } => Some(source.as_ref()),
			_ => None,
		}
	}

	/// Attaches a cleanup failure to a primary error. Variants that cannot carry one are
	/// returned unchanged and the cleanup failure is handed back.
	pub(crate) fn attach_cleanup(self, failure: CleanupError) -> (Self, Option<CleanupError>) {
		match self {
			Self::PropagationTimedOut {
				project,
				cluster,
				username,
				elapsed,
				probed,
				suggestion,
				cause,
				..
			} => (
				Self::PropagationTimedOut {
					project,
					cluster,
					username,
					elapsed,
					probed,
					suggestion,
					cause,
					cleanup: Some(Box::new(failure)),
				},
				None,
			),
			Self::Cancelled { stage, deadline_exceeded, username, .. } => (
				Self::Cancelled {
					stage,
					deadline_exceeded,
					username,
					cleanup: Some(Box::new(failure)),
				},
				None,
			),
			Self::Operation { source, .. } =>
				(Self::Operation { source, cleanup: Some(Box::new(failure)) }, None),
			other => (other, Some(failure)),
		}
	}
}

/// Fieldless error classes surfaced to the enclosing CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Malformed role specification.
	InvalidRoleSpec,
	/// SRV string already carried userinfo.
	UriAlreadyHasCredentials,
	/// SRV string could not be parsed or used.
	InvalidUri,
	/// Broker configuration is invalid.
	Config,
	/// Cluster exposes no public SRV endpoint.
	ClusterHasNoPublicEndpoint,
	/// Control-plane call failed.
	ControlPlane,
	/// Temporary user could not be created.
	UserProvisioningFailed,
	/// Propagation wait exhausted its budget.
	PropagationTimedOut,
	/// Parent context ended.
	Cancelled,
	/// Temporary user could not be deleted.
	CleanupFailed,
	/// Caller-supplied operation failed.
	Operation,
}
impl ErrorKind {
	/// Returns a stable label suitable for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::InvalidRoleSpec => "invalid_role_spec",
			Self::UriAlreadyHasCredentials => "uri_already_has_credentials",
			Self::InvalidUri => "invalid_uri",
			Self::Config => "config",
			Self::ClusterHasNoPublicEndpoint => "cluster_has_no_public_endpoint",
			Self::ControlPlane => "control_plane",
			Self::UserProvisioningFailed => "user_provisioning_failed",
			Self::PropagationTimedOut => "propagation_timed_out",
			Self::Cancelled => "cancelled",
			Self::CleanupFailed => "cleanup_failed",
			Self::Operation => "operation",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Cluster kept refusing the temporary credentials until the budget ran out.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Cluster rejected authentication for temporary user `{username}`. {hint}")]
pub struct AuthenticationRejected {
	/// Temporary username that was refused.
	pub username: String,
	/// Remediation hint.
	pub hint: &'static str,
}
impl AuthenticationRejected {
	pub(crate) fn new(username: impl Into<String>) -> Self {
		Self { username: username.into(), hint: TIER_HINT }
	}
}

/// Failure to delete a temporary user.
#[derive(Debug, ThisError)]
pub enum CleanupError {
	/// Atlas refused or failed the delete request.
	#[error("Failed to delete temporary user `{username}` from project `{project}`.")]
	Delete {
		/// Temporary username.
		username: String,
		/// Project owning the user.
		project: ProjectId,
		/// Adapter failure.
		#[source]
		source: AtlasError,
	},
	/// Delete did not finish within the cleanup budget.
	#[error("Deleting temporary user `{username}` from project `{project}` exceeded {timeout:?}.")]
	TimedOut {
		/// Temporary username.
		username: String,
		/// Project owning the user.
		project: ProjectId,
		/// Cleanup budget that elapsed.
		timeout: Duration,
	},
}
impl CleanupError {
	/// Temporary username the cleanup was meant for.
	pub fn username(&self) -> &str {
		match self {
			Self::Delete { username, .. } | Self::TimedOut { username, .. } => username,
		}
	}
}

/// Configuration and validation failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Atlas base URL cannot be used.
	#[error("Atlas base URL `{url}` is invalid.")]
	InvalidBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// Configured duration is below the permitted floor.
	#[error("`{field}` must be at least {min:?}, got {actual:?}.")]
	DurationTooShort {
		/// Configuration field name.
		field: &'static str,
		/// Permitted minimum.
		min: Duration,
		/// Supplied value.
		actual: Duration,
	},
	/// Configured range is inverted or otherwise inconsistent.
	#[error("`{field}` is inconsistent: {reason}.")]
	Inconsistent {
		/// Configuration field name.
		field: &'static str,
		/// Human-readable reason.
		reason: &'static str,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration document is malformed.")]
	Parse {
		/// Structured parsing failure carrying the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

fn probe_mode(probed: &bool) -> &'static str {
	if *probed { "probing enabled" } else { "blind wait" }
}

fn deadline_suffix(deadline_exceeded: &bool) -> &'static str {
	if *deadline_exceeded { " (parent deadline exceeded)" } else { "" }
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;

	fn project() -> ProjectId {
		ProjectId::new("5f1d2c3b4a5e6f7081920a1b").expect("Project fixture should be valid.")
	}

	fn cluster() -> ClusterName {
		ClusterName::new("C1").expect("Cluster fixture should be valid.")
	}

	#[test]
	fn propagation_timeout_carries_nested_rejection() {
		let err = Error::PropagationTimedOut {
			project: project(),
			cluster: cluster(),
			username: "matlas-tmp-1-abc".into(),
			elapsed: Duration::from_secs(72),
			probed: true,
			suggestion: TIER_HINT,
			cause: Some(AuthenticationRejected::new("matlas-tmp-1-abc")),
			cleanup: None,
		};

		assert_eq!(err.kind(), ErrorKind::PropagationTimedOut);
		assert!(err.to_string().contains("matlas-tmp-1-abc"));
		assert!(err.to_string().contains("probing enabled"));
		assert_eq!(err.remediation(), Some(TIER_HINT));

		let source = StdError::source(&err).expect("Nested rejection should be exposed as source.");

		assert!(source.to_string().contains("M0"));
	}

	#[test]
	fn cleanup_attaches_to_primary_errors_only() {
		let failure = CleanupError::TimedOut {
			username: "matlas-tmp-2-xyz".into(),
			project: project(),
			timeout: Duration::from_secs(30),
		};
		let primary = Error::Cancelled {
			stage: BrokerStage::PropagationAwaited,
			deadline_exceeded: false,
			username: Some("matlas-tmp-2-xyz".into()),
			cleanup: None,
		};
		let (attached, leftover) = primary.attach_cleanup(failure);

		assert!(leftover.is_none());
		assert_eq!(attached.kind(), ErrorKind::Cancelled);
		assert_eq!(
			attached.cleanup_failure().map(CleanupError::username),
			Some("matlas-tmp-2-xyz")
		);

		let failure = CleanupError::TimedOut {
			username: "matlas-tmp-3-xyz".into(),
			project: project(),
			timeout: Duration::from_secs(30),
		};
		let (unchanged, leftover) =
			Error::from(UriError::AlreadyHasCredentials).attach_cleanup(failure);

		assert_eq!(unchanged.kind(), ErrorKind::UriAlreadyHasCredentials);
		assert!(leftover.is_some());
	}

	#[test]
	fn operation_error_is_displayed_verbatim() {
		let inner = std::io::Error::other("collection scan failed");
		let err = Error::Operation { source: Box::new(inner), cleanup: None };

		assert_eq!(err.to_string(), "collection scan failed");
		assert!(err.operation_error().is_some_and(|e| e.is::<std::io::Error>()));
	}
}
