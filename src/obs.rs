//! Optional observability helpers for broker calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` (default) to emit a `matlas_broker.call` span with `cluster` and
//!   `project` fields, per-transition events in verbose mode, and one outcome event per call.
//! - Enable `metrics` to increment the `matlas_broker_call_total` counter for every
//!   attempt/success/failure, labeled by `stage` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// States a broker call moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerStage {
	/// Entry, before any validation.
	Start,
	/// Role specifications normalized.
	RolesValidated,
	/// Cluster SRV string resolved and validated.
	UriResolved,
	/// Temporary user created in Atlas.
	UserProvisioned,
	/// Cleanup registered for the temporary user.
	CleanupArmed,
	/// Propagation wait finished.
	PropagationAwaited,
	/// Caller's operation running.
	OperationRunning,
	/// User removed after a successful operation.
	Released,
	/// User removed after a failure.
	ReleasedAfterFailure,
}
impl BrokerStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			BrokerStage::Start => "start",
			BrokerStage::RolesValidated => "roles_validated",
			BrokerStage::UriResolved => "uri_resolved",
			BrokerStage::UserProvisioned => "user_provisioned",
			BrokerStage::CleanupArmed => "cleanup_armed",
			BrokerStage::PropagationAwaited => "propagation_awaited",
			BrokerStage::OperationRunning => "operation_running",
			BrokerStage::Released => "released",
			BrokerStage::ReleasedAfterFailure => "released_after_failure",
		}
	}
}
impl Display for BrokerStage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to the broker facade.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
