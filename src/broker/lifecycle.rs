//! Temporary user provisioning and guaranteed release.

// crates.io
use tokio::{runtime::Handle, time};
// self
use crate::{
	_prelude::*,
	atlas::{AtlasControlPlane, AtlasError},
	auth::{self, ClusterName, DatabaseUserPassword, EphemeralUser, ProjectId, RoleSet},
	broker::BrokerMetrics,
	context::OperationContext,
	error::CleanupError,
};

/// Why provisioning stopped without a usable user.
#[derive(Debug)]
pub(crate) enum ProvisionError {
	/// Atlas refused every attempt. `in_doubt` holds a user whose last create failed in a
	/// way that does not rule out Atlas having applied it.
	Failed { error: Error, in_doubt: Option<EphemeralUser> },
	/// The parent context ended. `in_flight` holds a user Atlas may already have created.
	Cancelled { in_flight: Option<EphemeralUser> },
}

/// Inputs shared by every create attempt.
pub(crate) struct ProvisionPlan<'a> {
	pub(crate) project: &'a ProjectId,
	pub(crate) cluster: &'a ClusterName,
	pub(crate) roles: &'a RoleSet,
	pub(crate) ttl: Duration,
	pub(crate) max_attempts: u32,
}

/// Creates a user with fresh credentials, regenerating them on username collisions.
pub(crate) async fn provision<A>(
	atlas: &A,
	ctx: &OperationContext,
	plan: ProvisionPlan<'_>,
) -> Result<EphemeralUser, ProvisionError>
where
	A: ?Sized + AtlasControlPlane,
{
	let mut attempts = 0;

	loop {
		if ctx.is_cancelled() {
			return Err(ProvisionError::Cancelled { in_flight: None });
		}

		attempts += 1;

		let user = EphemeralUser::new(
			auth::generate_username(),
			DatabaseUserPassword::generate(),
			plan.project.clone(),
			plan.roles.clone(),
			OffsetDateTime::now_utc(),
			plan.ttl,
		);
		let created = ctx
			.run(atlas.create_database_user(
				ctx,
				plan.project,
				&user.username,
				&user.password,
				plan.roles,
				plan.ttl,
			))
			.await;

		match created {
			Some(Ok(())) => return Ok(user),
			None | Some(Err(AtlasError::Cancelled)) =>
				return Err(ProvisionError::Cancelled { in_flight: Some(user) }),
			Some(Err(AtlasError::UserAlreadyExists)) if attempts < plan.max_attempts => {
				#[cfg(feature = "tracing")]
				tracing::debug!(
					username = user.username.as_str(),
					attempts,
					"Temporary username collided; regenerating credentials."
				);
			},
			Some(Err(source)) => {
				let in_doubt = source.is_retryable().then(|| user.clone());

				return Err(ProvisionError::Failed {
					error: Error::UserProvisioningFailed {
						project: plan.project.clone(),
						cluster: plan.cluster.clone(),
						username: user.username,
						attempts,
						source,
					},
					in_doubt,
				});
			},
		}
	}
}

/// Deletes its user exactly once, on a detached context bounded by the cleanup timeout.
///
/// Dropping a handle that was never released hands the delete to the current tokio runtime,
/// so a broker future dropped mid-call still removes the user.
pub struct CleanupHandle<A>
where
	A: ?Sized + AtlasControlPlane,
{
	atlas: Arc<A>,
	user: EphemeralUser,
	timeout: Duration,
	metrics: Arc<BrokerMetrics>,
	settled: bool,
}
impl<A> CleanupHandle<A>
where
	A: ?Sized + AtlasControlPlane,
{
	/// Registers cleanup for `user`.
	pub fn arm(
		atlas: Arc<A>,
		user: EphemeralUser,
		timeout: Duration,
		metrics: Arc<BrokerMetrics>,
	) -> Self {
		Self { atlas, user, timeout, metrics, settled: false }
	}

	/// User this handle releases.
	pub fn user(&self) -> &EphemeralUser {
		&self.user
	}

	/// Returns `true` once a delete has completed, successfully or not.
	pub fn is_settled(&self) -> bool {
		self.settled
	}

	/// Deletes the user. Later calls return `Ok(())` without contacting Atlas.
	pub async fn release(&mut self) -> Result<(), CleanupError> {
		if self.settled {
			return Ok(());
		}

		let outcome = delete_detached(
			self.atlas.as_ref(),
			&self.user.project,
			&self.user.username,
			self.timeout,
		)
		.await;

		self.settled = true;
		self.user.mark_released(OffsetDateTime::now_utc());

		match &outcome {
			Ok(()) => self.metrics.record_released(),
			Err(_) => self.metrics.record_cleanup_failure(),
		}

		outcome
	}
}
impl<A> Debug for CleanupHandle<A>
where
	A: ?Sized + AtlasControlPlane,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CleanupHandle")
			.field("username", &self.user.username)
			.field("timeout", &self.timeout)
			.field("settled", &self.settled)
			.finish()
	}
}
impl<A> Drop for CleanupHandle<A>
where
	A: ?Sized + AtlasControlPlane,
{
	fn drop(&mut self) {
		if self.settled {
			return;
		}

		let Ok(runtime) = Handle::try_current() else {
			#[cfg(feature = "tracing")]
			tracing::warn!(
				username = self.user.username.as_str(),
				"No tokio runtime to release the temporary user; Atlas removes it once its TTL lapses."
			);

			return;
		};
		let atlas = self.atlas.clone();
		let user = self.user.clone();
		let timeout = self.timeout;
		let metrics = self.metrics.clone();

		runtime.spawn(async move {
			let outcome =
				delete_detached(atlas.as_ref(), &user.project, &user.username, timeout).await;

			user.mark_released(OffsetDateTime::now_utc());

			match outcome {
				Ok(()) => metrics.record_released(),
				Err(_e) => {
					metrics.record_cleanup_failure();

					#[cfg(feature = "tracing")]
					tracing::warn!(
						username = user.username.as_str(),
						error = %_e,
						"Temporary user cleanup failed; Atlas removes it once its TTL lapses."
					);
				},
			}
		});
	}
}

async fn delete_detached<A>(
	atlas: &A,
	project: &ProjectId,
	username: &str,
	timeout: Duration,
) -> Result<(), CleanupError>
where
	A: ?Sized + AtlasControlPlane,
{
	let ctx = OperationContext::detached(timeout);
	let timed_out = || CleanupError::TimedOut {
		username: username.to_owned(),
		project: project.clone(),
		timeout,
	};

	match time::timeout(timeout, atlas.delete_database_user(&ctx, project, username)).await {
		Ok(Ok(())) => Ok(()),
		Ok(Err(AtlasError::Cancelled)) | Err(_) => Err(timed_out()),
		Ok(Err(source)) => Err(CleanupError::Delete {
			username: username.to_owned(),
			project: project.clone(),
			source,
		}),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::time::Instant;
	// self
	use super::*;
	use crate::{_preludet::*, auth::OperationClass};

	fn project() -> ProjectId {
		ProjectId::new("5f1d2c3b4a5e6f7081920a1b").expect("Project fixture should be valid.")
	}

	fn cluster() -> ClusterName {
		ClusterName::new("C1").expect("Cluster fixture should be valid.")
	}

	fn plan<'a>(
		project: &'a ProjectId,
		cluster: &'a ClusterName,
		roles: &'a RoleSet,
	) -> ProvisionPlan<'a> {
		ProvisionPlan { project, cluster, roles, ttl: Duration::from_secs(3600), max_attempts: 3 }
	}

	#[tokio::test]
	async fn collisions_regenerate_credentials() {
		let atlas = MockAtlas::default();
		let (project, cluster) = (project(), cluster());
		let roles = RoleSet::default_for(OperationClass::SchemaRead);

		atlas.script_create(Some(AtlasError::UserAlreadyExists));
		atlas.script_create(Some(AtlasError::UserAlreadyExists));

		let user = provision(&atlas, &OperationContext::new(), plan(&project, &cluster, &roles))
			.await
			.expect("Third attempt should succeed.");
		let creates = atlas.creates();

		assert_eq!(creates.len(), 3);
		assert_eq!(creates[2].username, user.username);
		assert_ne!(creates[0].username, creates[1].username);
		assert_ne!(creates[0].password, creates[1].password);
	}

	#[tokio::test]
	async fn persistent_collision_reports_attempts() {
		let atlas = MockAtlas::default();
		let (project, cluster) = (project(), cluster());
		let roles = RoleSet::default_for(OperationClass::SchemaRead);

		for _ in 0..3 {
			atlas.script_create(Some(AtlasError::UserAlreadyExists));
		}

		let err = provision(&atlas, &OperationContext::new(), plan(&project, &cluster, &roles))
			.await
			.expect_err("Every attempt collides.");

		match err {
			ProvisionError::Failed {
				error: Error::UserProvisioningFailed { attempts, username, .. },
				in_doubt: None,
			} => {
				assert_eq!(attempts, 3);
				assert_eq!(username, atlas.creates()[2].username);
			},
			other => panic!("Unexpected provisioning error: {other:?}."),
		}
	}

	#[tokio::test]
	async fn server_failure_leaves_the_user_in_doubt() {
		let atlas = MockAtlas::default();
		let (project, cluster) = (project(), cluster());
		let roles = RoleSet::default_for(OperationClass::SchemaRead);

		atlas.script_create(Some(AtlasError::Api {
			status: 503,
			code: None,
			detail: "Service unavailable.".into(),
			retry_after: None,
		}));

		let err = provision(&atlas, &OperationContext::new(), plan(&project, &cluster, &roles))
			.await
			.expect_err("Server failure should stop provisioning.");

		match err {
			ProvisionError::Failed { in_doubt: Some(user), .. } =>
				assert_eq!(user.username, atlas.creates()[0].username),
			other => panic!("Unexpected provisioning error: {other:?}."),
		}
	}

	#[tokio::test]
	async fn rejected_create_is_not_in_doubt() {
		let atlas = MockAtlas::default();
		let (project, cluster) = (project(), cluster());
		let roles = RoleSet::default_for(OperationClass::SchemaRead);

		atlas.script_create(Some(AtlasError::Api {
			status: 403,
			code: Some("ORG_REQUIRES_ACCESS_LIST".into()),
			detail: "Access list required.".into(),
			retry_after: None,
		}));

		let err = provision(&atlas, &OperationContext::new(), plan(&project, &cluster, &roles))
			.await
			.expect_err("Forbidden create should stop provisioning.");

		assert!(matches!(err, ProvisionError::Failed { in_doubt: None, .. }));
	}

	#[tokio::test]
	async fn cancelled_context_skips_create() {
		let atlas = MockAtlas::default();
		let ctx = OperationContext::new();
		let (project, cluster) = (project(), cluster());
		let roles = RoleSet::default_for(OperationClass::SchemaRead);

		ctx.cancel();

		let err = provision(&atlas, &ctx, plan(&project, &cluster, &roles))
			.await
			.expect_err("Cancelled context must not create users.");

		assert!(matches!(err, ProvisionError::Cancelled { in_flight: None }));
		assert!(atlas.creates().is_empty());
	}

	fn live_user() -> EphemeralUser {
		EphemeralUser::new(
			auth::generate_username(),
			DatabaseUserPassword::generate(),
			project(),
			RoleSet::default_for(OperationClass::SchemaRead),
			OffsetDateTime::now_utc(),
			Duration::from_secs(3600),
		)
	}

	#[tokio::test]
	async fn release_is_idempotent() {
		let atlas = MockAtlas::default();
		let metrics = Arc::new(BrokerMetrics::default());
		let user = live_user();
		let mut handle = CleanupHandle::arm(
			Arc::new(atlas.clone()),
			user.clone(),
			Duration::from_secs(30),
			metrics.clone(),
		);

		handle.release().await.expect("First release should succeed.");
		handle.release().await.expect("Second release is a no-op.");

		assert_eq!(atlas.deletes(), [user.username.clone()]);
		assert!(user.is_released());
		assert_eq!(metrics.released(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn slow_delete_times_out_at_the_cleanup_bound() {
		let atlas = MockAtlas::default();

		atlas.delay_deletes(Duration::from_secs(120));

		let mut handle = CleanupHandle::arm(
			Arc::new(atlas.clone()),
			live_user(),
			Duration::from_secs(30),
			Arc::default(),
		);
		let started = Instant::now();
		let err = handle.release().await.expect_err("Delete outlives the cleanup bound.");

		assert!(matches!(err, CleanupError::TimedOut { .. }));
		assert_eq!(started.elapsed(), Duration::from_secs(30));
	}

	#[tokio::test]
	async fn dropped_handle_spawns_the_delete() {
		let atlas = MockAtlas::default();
		let user = live_user();
		let handle = CleanupHandle::arm(
			Arc::new(atlas.clone()),
			user.clone(),
			Duration::from_secs(30),
			Arc::default(),
		);

		drop(handle);

		for _ in 0..16 {
			if user.is_released() {
				break;
			}

			tokio::task::yield_now().await;
		}

		assert_eq!(atlas.deletes(), [user.username.clone()]);
		assert!(user.is_released());
	}
}
