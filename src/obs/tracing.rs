// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::{ClusterName, ProjectId},
	error::CleanupError,
	obs::BrokerStage,
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// Span wrapping one broker call.
#[derive(Clone, Debug)]
pub struct BrokerSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl BrokerSpan {
	/// Creates a new span tagged with the cluster and project.
	pub fn new(cluster: &ClusterName, project: &ProjectId) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"matlas_broker.call",
				cluster = cluster.as_ref(),
				project = project.as_ref()
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (cluster, project);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Per-call diagnostics: transition lines in verbose mode, one outcome line otherwise.
///
/// Only usernames and masked URIs are ever recorded.
#[derive(Debug)]
pub struct CallDiagnostics {
	verbose: bool,
	started: Instant,
	username: Option<String>,
	masked_uri: Option<String>,
}
impl CallDiagnostics {
	/// Starts the elapsed-time clock.
	pub fn start(verbose: bool) -> Self {
		Self { verbose, started: Instant::now(), username: None, masked_uri: None }
	}

	/// Time since [`CallDiagnostics::start`].
	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	/// Remembers the temporary username for later lines.
	pub fn set_username(&mut self, username: &str) {
		self.username = Some(username.to_owned());
	}

	/// Remembers the masked URI for later lines.
	pub fn set_masked_uri(&mut self, masked: &str) {
		self.masked_uri = Some(masked.to_owned());
	}

	/// Logs a transition when verbose.
	pub fn transition(&self, stage: BrokerStage) {
		if !self.verbose {
			return;
		}

		#[cfg(feature = "tracing")]
		tracing::info!(
			stage = stage.as_str(),
			username = self.username.as_deref().unwrap_or("-"),
			uri = self.masked_uri.as_deref().unwrap_or("-"),
			elapsed_ms = self.elapsed_ms(),
			"Broker state transition."
		);
		#[cfg(not(feature = "tracing"))]
		let _ = stage;
	}

	/// Logs the call outcome; always emitted.
	pub fn finish(&self, stage: BrokerStage, error: Option<&Error>) {
		#[cfg(feature = "tracing")]
		match error {
			None => tracing::info!(
				stage = stage.as_str(),
				username = self.username.as_deref().unwrap_or("-"),
				elapsed_ms = self.elapsed_ms(),
				"Broker call finished."
			),
			Some(e) => tracing::warn!(
				stage = stage.as_str(),
				username = self.username.as_deref().unwrap_or("-"),
				elapsed_ms = self.elapsed_ms(),
				kind = e.kind().as_str(),
				error = %e,
				"Broker call failed."
			),
		}
		#[cfg(not(feature = "tracing"))]
		let _ = (stage, error);
	}

	/// Warns about a cleanup failure; always emitted.
	pub fn cleanup_failed(&self, failure: &CleanupError) {
		#[cfg(feature = "tracing")]
		tracing::warn!(
			username = failure.username(),
			elapsed_ms = self.elapsed_ms(),
			error = %failure,
			"Temporary user cleanup failed; Atlas removes it once its TTL lapses."
		);
		#[cfg(not(feature = "tracing"))]
		let _ = failure;
	}

	#[cfg(feature = "tracing")]
	fn elapsed_ms(&self) -> u64 {
		u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
	}
}
