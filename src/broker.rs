//! Broker facade: provision, wait, run, release.
//!
//! [`Broker::with_ephemeral_credentials`] walks a call through
//! `Start → RolesValidated → UriResolved → UserProvisioned → CleanupArmed →
//! PropagationAwaited → OperationRunning → Released | ReleasedAfterFailure`. Once a user
//! exists, every exit path (success, error, cancellation, panic, or a dropped future) deletes
//! it on a detached context.

pub mod lifecycle;
pub mod propagation;

mod metrics;
mod request;

pub use lifecycle::CleanupHandle;
pub use metrics::*;
pub use propagation::{PropagationOutcome, PropagationReport};
pub use request::*;

// std
use std::{any::Any, panic::AssertUnwindSafe};
// crates.io
use futures::FutureExt;
// self
use crate::{
	_prelude::*,
	atlas::{AtlasControlPlane, AtlasError},
	auth::{self, EphemeralUser, RoleSet},
	config::BrokerConfig,
	context::OperationContext,
	error::{AuthenticationRejected, ConfigError, PROPAGATION_HINT, TIER_HINT},
	obs::{self, BrokerSpan, BrokerStage, CallDiagnostics, CallOutcome},
	probe::{MongoProbe, ProbeOutcome},
	uri::{self, AuthenticatedUri, ConnectionSpec},
};
#[cfg(feature = "reqwest")] use crate::atlas::AtlasHttpClient;
use crate::broker::lifecycle::{ProvisionError, ProvisionPlan};

#[cfg(feature = "reqwest")]
/// Broker specialized for the crate's reqwest-backed Atlas adapter.
pub type AtlasBroker<P = dyn MongoProbe> = Broker<AtlasHttpClient, P>;

type PanicPayload = Box<dyn Any + Send>;

/// Hands short-lived Atlas credentials to database-side operations.
///
/// The broker owns nothing but its collaborators and configuration; concurrent calls share
/// only the process-wide username counter and the metrics counters.
pub struct Broker<A, P = dyn MongoProbe>
where
	A: ?Sized + AtlasControlPlane,
	P: ?Sized + MongoProbe,
{
	/// Atlas control plane used to create, delete, and locate resources.
	pub atlas: Arc<A>,
	/// Probe used when a request enables probing.
	pub probe: Option<Arc<P>>,
	/// Behavior knobs.
	pub config: BrokerConfig,
	/// Shared counters for calls and temporary users.
	pub metrics: Arc<BrokerMetrics>,
}
impl<A> Broker<A>
where
	A: ?Sized + AtlasControlPlane,
{
	/// Creates a broker without a probe; requests must keep probing disabled.
	pub fn new(atlas: Arc<A>, config: BrokerConfig) -> Self {
		Self { atlas, probe: None, config, metrics: Default::default() }
	}
}
impl<A, P> Broker<A, P>
where
	A: ?Sized + AtlasControlPlane,
	P: ?Sized + MongoProbe,
{
	/// Attaches a probe, replacing any previous one.
	pub fn with_probe<Q>(self, probe: Arc<Q>) -> Broker<A, Q>
	where
		Q: ?Sized + MongoProbe,
	{
		Broker { atlas: self.atlas, probe: Some(probe), config: self.config, metrics: self.metrics }
	}

	/// Shares an existing metrics recorder.
	pub fn with_metrics(mut self, metrics: Arc<BrokerMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Runs `op` with a freshly provisioned temporary user and deletes the user afterwards.
	///
	/// `op` receives the authenticated URI and the user; both are valid only until it
	/// returns. An error from `op` comes back as [`Error::Operation`] with the original error
	/// as its source. A panic in `op` still deletes the user before unwinding continues.
	/// A cleanup failure never replaces a primary error; it is attached to it, or returned as
	/// [`Error::CleanupFailed`] when `op` succeeded.
	pub async fn with_ephemeral_credentials<T, E, F, Fut>(
		&self,
		ctx: &OperationContext,
		request: BrokerRequest,
		op: F,
	) -> Result<T>
	where
		F: FnOnce(BrokerResult) -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: Into<Box<dyn StdError + Send + Sync>>,
	{
		let span = BrokerSpan::new(&request.cluster, &request.project);
		let mut diag = CallDiagnostics::start(self.config.verbose);

		obs::record_call_outcome(BrokerStage::Start, CallOutcome::Attempt);
		self.metrics.record_call();

		let (stage, result) = span.instrument(self.run(ctx, request, op, &mut diag)).await;

		diag.finish(stage, result.as_ref().err());

		match &result {
			Ok(_) => {
				obs::record_call_outcome(stage, CallOutcome::Success);
				self.metrics.record_success();
			},
			Err(_) => {
				obs::record_call_outcome(stage, CallOutcome::Failure);
				self.metrics.record_failure();
			},
		}

		result
	}

	async fn run<T, E, F, Fut>(
		&self,
		ctx: &OperationContext,
		request: BrokerRequest,
		op: F,
		diag: &mut CallDiagnostics,
	) -> (BrokerStage, Result<T>)
	where
		F: FnOnce(BrokerResult) -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: Into<Box<dyn StdError + Send + Sync>>,
	{
		let mut stage = BrokerStage::Start;

		diag.transition(stage);

		if ctx.is_cancelled() {
			return (stage, Err(cancelled(ctx, stage, None)));
		}
		if let Err(e) = self.check_request(&request) {
			return (stage, Err(e));
		}

		let roles = match RoleSet::parse(
			&request.roles,
			request.target_database.as_deref(),
			request.operation_class,
		) {
			Ok(roles) => roles,
			Err(e) => return (stage, Err(e.into())),
		};

		advance(&mut stage, BrokerStage::RolesValidated, diag);

		let spec = match self.resolve_connection(ctx, &request, stage).await {
			Ok(spec) => spec,
			Err(e) => return (stage, Err(e)),
		};

		advance(&mut stage, BrokerStage::UriResolved, diag);

		let plan = ProvisionPlan {
			project: &request.project,
			cluster: &request.cluster,
			roles: &roles,
			ttl: auth::effective_ttl(self.config.user_ttl, request.operation_deadline),
			max_attempts: self.config.max_create_attempts,
		};
		let user = match lifecycle::provision(self.atlas.as_ref(), ctx, plan).await {
			Ok(user) => user,
			Err(ProvisionError::Failed { error, in_doubt: None }) => return (stage, Err(error)),
			Err(ProvisionError::Cancelled { in_flight: None }) =>
				return (stage, Err(cancelled(ctx, stage, None))),
			// Atlas may have applied the create before the failure or cancellation.
			Err(ProvisionError::Failed { error, in_doubt: Some(user) }) =>
				return self.release_in_doubt(user, error, diag).await,
			Err(ProvisionError::Cancelled { in_flight: Some(user) }) => {
				let err = cancelled(ctx, stage, Some(user.username.clone()));

				return self.release_in_doubt(user, err, diag).await;
			},
		};

		self.metrics.record_provisioned();
		diag.set_username(&user.username);
		advance(&mut stage, BrokerStage::UserProvisioned, diag);

		let mut cleanup = self.arm(user.clone());

		advance(&mut stage, BrokerStage::CleanupArmed, diag);

		match self.run_armed(ctx, &request, &spec, user, op, diag, &mut stage).await {
			Ok(outcome) => {
				let result = self.settle(&mut cleanup, outcome, diag).await;
				let last = match &result {
					Ok(_) => BrokerStage::Released,
					Err(_) => BrokerStage::ReleasedAfterFailure,
				};

				diag.transition(last);

				(last, result)
			},
			Err(payload) => {
				if let Err(failure) = cleanup.release().await {
					diag.cleanup_failed(&failure);
				}

				diag.transition(BrokerStage::ReleasedAfterFailure);
				std::panic::resume_unwind(payload)
			},
		}
	}

	#[allow(clippy::too_many_arguments)]
	async fn run_armed<T, E, F, Fut>(
		&self,
		ctx: &OperationContext,
		request: &BrokerRequest,
		spec: &ConnectionSpec,
		user: EphemeralUser,
		op: F,
		diag: &mut CallDiagnostics,
		stage: &mut BrokerStage,
	) -> std::result::Result<Result<T>, PanicPayload>
	where
		F: FnOnce(BrokerResult) -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: Into<Box<dyn StdError + Send + Sync>>,
	{
		let authenticated_uri = match uri::rewrite(spec, &user.username, &user.password) {
			Ok(uri) => uri,
			Err(e) => return Ok(Err(e.into())),
		};

		diag.set_masked_uri(authenticated_uri.masked());

		if let Err(e) = self.await_propagation(ctx, request, &user, &authenticated_uri).await {
			return Ok(Err(e));
		}

		advance(stage, BrokerStage::PropagationAwaited, diag);
		advance(stage, BrokerStage::OperationRunning, diag);

		let handoff = BrokerResult { authenticated_uri, temp_user: user };

		AssertUnwindSafe(async move { op(handoff).await })
			.catch_unwind()
			.await
			.map(|outcome| outcome.map_err(|e| Error::Operation { source: e.into(), cleanup: None }))
	}

	async fn await_propagation(
		&self,
		ctx: &OperationContext,
		request: &BrokerRequest,
		user: &EphemeralUser,
		uri: &AuthenticatedUri,
	) -> Result<()> {
		let probe = if request.use_probe { self.probe.as_deref() } else { None };
		let report = propagation::await_propagation(
			ctx,
			&self.config.propagation,
			probe,
			uri,
			request.operation_deadline,
		)
		.await;

		#[cfg(feature = "tracing")]
		{
			if self.config.verbose {
				tracing::info!(
					username = user.username.as_str(),
					uri = uri.masked(),
					outcome = ?report.outcome,
					probes = report.probes,
					budget_ms = u64::try_from(report.budget.as_millis()).unwrap_or(u64::MAX),
					elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
					"Propagation wait finished."
				);
			}
		}

		match report.outcome {
			PropagationOutcome::Propagated => Ok(()),
			PropagationOutcome::TimedOut if !report.probed => Ok(()),
			PropagationOutcome::TimedOut => {
				let rejected = report.last_probe == Some(ProbeOutcome::AuthenticationRejected);

				Err(Error::PropagationTimedOut {
					project: request.project.clone(),
					cluster: request.cluster.clone(),
					username: user.username.clone(),
					elapsed: report.elapsed,
					probed: true,
					suggestion: if rejected { TIER_HINT } else { PROPAGATION_HINT },
					cause: rejected.then(|| AuthenticationRejected::new(&user.username)),
					cleanup: None,
				})
			},
			PropagationOutcome::Cancelled => Err(cancelled(
				ctx,
				BrokerStage::PropagationAwaited,
				Some(user.username.clone()),
			)),
		}
	}

	async fn resolve_connection(
		&self,
		ctx: &OperationContext,
		request: &BrokerRequest,
		stage: BrokerStage,
	) -> Result<ConnectionSpec> {
		let lookup = ctx
			.run(self.atlas.get_cluster_srv_uri(ctx, &request.project, &request.cluster))
			.await;
		let srv = match lookup {
			Some(Ok(srv)) => srv,
			None | Some(Err(AtlasError::Cancelled)) => return Err(cancelled(ctx, stage, None)),
			Some(Err(AtlasError::ClusterHasNoPublicEndpoint { .. })) =>
				return Err(Error::ClusterHasNoPublicEndpoint {
					project: request.project.clone(),
					cluster: request.cluster.clone(),
				}),
			Some(Err(source)) =>
				return Err(Error::ControlPlane {
					operation: "get_cluster_srv_uri",
					project: request.project.clone(),
					cluster: request.cluster.clone(),
					source,
				}),
		};
		let mut spec = ConnectionSpec::parse(&srv)?;

		if let Some(database) = request.target_database.as_deref() {
			spec = spec.with_database(database)?;
		}

		Ok(request
			.extra_params
			.iter()
			.fold(spec, |spec, (key, value)| spec.with_param(key.as_str(), value.as_str())))
	}

	async fn release_in_doubt<T>(
		&self,
		user: EphemeralUser,
		primary: Error,
		diag: &mut CallDiagnostics,
	) -> (BrokerStage, Result<T>) {
		self.metrics.record_provisioned();
		diag.set_username(&user.username);

		let mut cleanup = self.arm(user);
		let result = self.settle(&mut cleanup, Err(primary), diag).await;

		(BrokerStage::ReleasedAfterFailure, result)
	}

	fn check_request(&self, request: &BrokerRequest) -> Result<()> {
		self.config.validate()?;

		if request.use_probe && self.probe.is_none() {
			return Err(ConfigError::Inconsistent {
				field: "use_probe",
				reason: "no probe is attached to the broker",
			}
			.into());
		}

		Ok(())
	}

	fn arm(&self, user: EphemeralUser) -> CleanupHandle<A> {
		CleanupHandle::arm(
			self.atlas.clone(),
			user,
			self.config.cleanup_timeout,
			self.metrics.clone(),
		)
	}

	async fn settle<T>(
		&self,
		cleanup: &mut CleanupHandle<A>,
		outcome: Result<T>,
		diag: &CallDiagnostics,
	) -> Result<T> {
		let failure = match cleanup.release().await {
			Ok(()) => return outcome,
			Err(failure) => failure,
		};

		diag.cleanup_failed(&failure);

		match outcome {
			Ok(_) => Err(Error::CleanupFailed(failure)),
			// Errors that cannot carry the failure keep priority; it was logged above.
			Err(primary) => Err(primary.attach_cleanup(failure).0),
		}
	}
}
impl<A, P> Clone for Broker<A, P>
where
	A: ?Sized + AtlasControlPlane,
	P: ?Sized + MongoProbe,
{
	fn clone(&self) -> Self {
		Self {
			atlas: self.atlas.clone(),
			probe: self.probe.clone(),
			config: self.config.clone(),
			metrics: self.metrics.clone(),
		}
	}
}
impl<A, P> Debug for Broker<A, P>
where
	A: ?Sized + AtlasControlPlane,
	P: ?Sized + MongoProbe,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("config", &self.config)
			.field("probe_set", &self.probe.is_some())
			.field("metrics", &self.metrics)
			.finish()
	}
}

fn advance(stage: &mut BrokerStage, next: BrokerStage, diag: &CallDiagnostics) {
	*stage = next;

	diag.transition(next);
}

fn cancelled(ctx: &OperationContext, stage: BrokerStage, username: Option<String>) -> Error {
	Error::Cancelled { stage, deadline_exceeded: ctx.deadline_exceeded(), username, cleanup: None }
}
