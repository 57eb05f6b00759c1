//! Temporary-credential broker for matlas-cli: provision a scoped MongoDB Atlas database user,
//! wait for it to propagate, hand out an authenticated SRV URI, and revoke the user on every
//! exit path.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod atlas;
pub mod auth;
pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod obs;
pub mod probe;
pub mod uri;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and mock collaborators for tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{collections::VecDeque, io};
	// self
	use crate::{
		atlas::{AtlasControlPlane, AtlasError, AtlasFuture},
		auth::{DatabaseUserPassword, ProjectId, RoleSet},
		broker::Broker,
		config::BrokerConfig,
		context::OperationContext,
		probe::{MongoProbe, ProbeFuture, ProbeOutcome},
		uri::AuthenticatedUri,
	};

	/// Broker type alias wired to the in-memory mocks.
	pub type MockBroker = Broker<MockAtlas, MockProbe>;

	/// A single `create_database_user` call observed by [`MockAtlas`].
	#[derive(Clone, Debug)]
	pub struct CreateCall {
		/// Project the user was created in.
		pub project: ProjectId,
		/// Generated username.
		pub username: String,
		/// Generated password; only test code may read it.
		pub password: String,
		/// Roles requested for the user.
		pub roles: RoleSet,
		/// TTL forwarded to Atlas.
		pub ttl: Duration,
	}

	#[derive(Debug, Default)]
	struct MockAtlasState {
		srv_uri: Option<String>,
		srv_error: Option<AtlasError>,
		create_script: VecDeque<Option<AtlasError>>,
		create_delay: Option<Duration>,
		delete_error: Option<AtlasError>,
		delete_delay: Option<Duration>,
		creates: Vec<CreateCall>,
		deletes: Vec<String>,
		srv_lookups: usize,
	}

	/// In-memory [`AtlasControlPlane`] recording every create/delete pair.
	#[derive(Clone, Debug, Default)]
	pub struct MockAtlas(Arc<Mutex<MockAtlasState>>);
	impl MockAtlas {
		/// Creates a mock that advertises the provided SRV connection string.
		pub fn with_srv(srv: impl Into<String>) -> Self {
			let mock = Self::default();

			mock.0.lock().srv_uri = Some(srv.into());

			mock
		}

		/// Makes the cluster lookup fail with `error`.
		pub fn fail_srv_lookup(&self, error: AtlasError) {
			self.0.lock().srv_error = Some(error);
		}

		/// Queues a create outcome; `None` means success. Unscripted creates succeed.
		pub fn script_create(&self, outcome: Option<AtlasError>) {
			self.0.lock().create_script.push_back(outcome);
		}

		/// Delays every create by `delay` after recording it.
		pub fn delay_creates(&self, delay: Duration) {
			self.0.lock().create_delay = Some(delay);
		}

		/// Makes every delete fail with `error`.
		pub fn fail_deletes(&self, error: AtlasError) {
			self.0.lock().delete_error = Some(error);
		}

		/// Delays every delete by `delay` (virtual time under paused tokio clocks).
		pub fn delay_deletes(&self, delay: Duration) {
			self.0.lock().delete_delay = Some(delay);
		}

		/// Returns every create call observed so far.
		pub fn creates(&self) -> Vec<CreateCall> {
			self.0.lock().creates.clone()
		}

		/// Returns every username passed to delete so far.
		pub fn deletes(&self) -> Vec<String> {
			self.0.lock().deletes.clone()
		}

		/// Returns the number of cluster lookups observed.
		pub fn srv_lookups(&self) -> usize {
			self.0.lock().srv_lookups
		}
	}
	impl AtlasControlPlane for MockAtlas {
		fn create_database_user<'a>(
			&'a self,
			_ctx: &'a OperationContext,
			project: &'a ProjectId,
			username: &'a str,
			password: &'a DatabaseUserPassword,
			roles: &'a RoleSet,
			ttl: Duration,
		) -> AtlasFuture<'a, ()> {
			let state = self.0.clone();

			Box::pin(async move {
				let (outcome, delay) = {
					let mut guard = state.lock();

					guard.creates.push(CreateCall {
						project: project.clone(),
						username: username.to_owned(),
						password: password.expose().to_owned(),
						roles: roles.clone(),
						ttl,
					});

					(guard.create_script.pop_front().flatten(), guard.create_delay)
				};

				if let Some(delay) = delay {
					tokio::time::sleep(delay).await;
				}

				match outcome {
					Some(err) => Err(err),
					None => Ok(()),
				}
			})
		}

		fn delete_database_user<'a>(
			&'a self,
			_ctx: &'a OperationContext,
			_project: &'a ProjectId,
			username: &'a str,
		) -> AtlasFuture<'a, ()> {
			let state = self.0.clone();

			Box::pin(async move {
				let delay = {
					let mut guard = state.lock();

					guard.deletes.push(username.to_owned());

					guard.delete_delay
				};

				if let Some(delay) = delay {
					tokio::time::sleep(delay).await;
				}

				match state.lock().delete_error.clone() {
					Some(err) => Err(err),
					None => Ok(()),
				}
			})
		}

		fn get_cluster_srv_uri<'a>(
			&'a self,
			_ctx: &'a OperationContext,
			_project: &'a ProjectId,
			cluster: &'a str,
		) -> AtlasFuture<'a, String> {
			let state = self.0.clone();

			Box::pin(async move {
				let mut guard = state.lock();

				guard.srv_lookups += 1;

				if let Some(err) = guard.srv_error.clone() {
					return Err(err);
				}

				guard.srv_uri.clone().ok_or_else(|| AtlasError::ClusterHasNoPublicEndpoint {
					cluster: cluster.to_owned(),
				})
			})
		}
	}

	#[derive(Debug)]
	struct MockProbeState {
		script: VecDeque<ProbeOutcome>,
		fallback: ProbeOutcome,
		observed: Vec<String>,
	}

	/// Scripted [`MongoProbe`] that records every URI it was asked to ping.
	#[derive(Clone, Debug)]
	pub struct MockProbe(Arc<Mutex<MockProbeState>>);
	impl MockProbe {
		/// Replays `script` in order, then keeps answering `fallback`.
		pub fn scripted(
			script: impl IntoIterator<Item = ProbeOutcome>,
			fallback: ProbeOutcome,
		) -> Self {
			Self(Arc::new(Mutex::new(MockProbeState {
				script: script.into_iter().collect(),
				fallback,
				observed: Vec::new(),
			})))
		}

		/// Always answers `outcome`.
		pub fn always(outcome: ProbeOutcome) -> Self {
			Self::scripted([], outcome)
		}

		/// Number of probes performed.
		pub fn calls(&self) -> usize {
			self.0.lock().observed.len()
		}

		/// Raw URIs passed to the probe.
		pub fn observed_uris(&self) -> Vec<String> {
			self.0.lock().observed.clone()
		}
	}
	impl MongoProbe for MockProbe {
		fn probe<'a>(
			&'a self,
			ctx: &'a OperationContext,
			uri: &'a AuthenticatedUri,
		) -> ProbeFuture<'a> {
			let state = self.0.clone();

			Box::pin(async move {
				if ctx.is_cancelled() {
					return ProbeOutcome::Cancelled;
				}

				let mut guard = state.lock();

				guard.observed.push(uri.expose().to_owned());

				let fallback = guard.fallback;

				guard.script.pop_front().unwrap_or(fallback)
			})
		}
	}

	/// Shared buffer that captures formatted tracing output.
	#[derive(Clone, Debug, Default)]
	pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);
	impl CapturedLogs {
		/// Returns everything captured so far as UTF-8 text.
		pub fn contents(&self) -> String {
			String::from_utf8_lossy(&self.0.lock()).into_owned()
		}

		/// Returns a writer handle appending to the shared buffer.
		pub fn writer(&self) -> CapturedLogsWriter {
			CapturedLogsWriter(self.0.clone())
		}
	}

	/// [`io::Write`] handle produced by [`CapturedLogs::writer`].
	#[derive(Debug)]
	pub struct CapturedLogsWriter(Arc<Mutex<Vec<u8>>>);
	impl io::Write for CapturedLogsWriter {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			self.0.lock().extend_from_slice(buf);

			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	/// Builds a broker over the provided mocks with the given configuration.
	pub fn build_mock_broker(
		atlas: &MockAtlas,
		probe: &MockProbe,
		config: BrokerConfig,
	) -> MockBroker {
		Broker::new(Arc::new(atlas.clone()), config).with_probe(Arc::new(probe.clone()))
	}
}

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration,
	};

	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "mongodb")] pub use mongodb;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tracing_subscriber as _};
