//! Broker call inputs and the handle passed to the caller's operation.

// self
use crate::{
	_prelude::*,
	auth::{ClusterName, EphemeralUser, OperationClass, ProjectId},
	uri::AuthenticatedUri,
};

/// Immutable description of one broker call.
///
/// Role specifications stay raw until the facade normalizes them against the target
/// database, so a malformed role fails the call before any Atlas request is made.
#[derive(Clone, Debug)]
pub struct BrokerRequest {
	/// Cluster to reach.
	pub cluster: ClusterName,
	/// Project owning the cluster.
	pub project: ProjectId,
	/// Database the operation targets; also the default scope for bare role names.
	pub target_database: Option<String>,
	/// Raw role specifications (`role`, `role@db`, or comma-separated lists).
	pub roles: Vec<String>,
	/// Operation class selecting the default role set.
	pub operation_class: OperationClass,
	/// Expected duration of the caller's operation.
	pub operation_deadline: Option<Duration>,
	/// Probe the cluster instead of waiting blindly for propagation.
	pub use_probe: bool,
	/// Extra connection-string options (`appName`, `retryWrites`, ...). Authentication
	/// options are ignored.
	pub extra_params: Vec<(String, String)>,
}
impl BrokerRequest {
	/// Creates a request for `cluster` in `project` with default roles and no probing.
	pub fn new(project: ProjectId, cluster: ClusterName) -> Self {
		Self {
			cluster,
			project,
			target_database: None,
			roles: Vec::new(),
			operation_class: OperationClass::default(),
			operation_deadline: None,
			use_probe: false,
			extra_params: Vec::new(),
		}
	}

	/// Targets a database.
	pub fn with_target_database(mut self, database: impl Into<String>) -> Self {
		self.target_database = Some(database.into());

		self
	}

	/// Appends raw role specifications.
	pub fn with_roles<I, S>(mut self, roles: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.roles.extend(roles.into_iter().map(Into::into));

		self
	}

	/// Selects the operation class.
	pub fn with_operation_class(mut self, class: OperationClass) -> Self {
		self.operation_class = class;

		self
	}

	/// Declares how long the operation is expected to run.
	pub fn with_operation_deadline(mut self, deadline: Duration) -> Self {
		self.operation_deadline = Some(deadline);

		self
	}

	/// Adds a connection-string option.
	pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_params.push((key.into(), value.into()));

		self
	}

	/// Enables or disables probing during the propagation wait.
	pub fn with_probe(mut self, use_probe: bool) -> Self {
		self.use_probe = use_probe;

		self
	}
}

/// Credentials handed to the caller's operation; valid only for the callback's duration.
#[derive(Clone, Debug)]
pub struct BrokerResult {
	/// Connection string with embedded credentials; masked in `Debug`/`Display`.
	pub authenticated_uri: AuthenticatedUri,
	/// Temporary user backing the URI.
	pub temp_user: EphemeralUser,
}
