//! Cancellation and deadline propagation for a single broker call.

// crates.io
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Cancellation token plus an optional deadline, threaded through every suspension point.
///
/// Child contexts inherit cancellation from their parent and never extend its deadline.
/// [`OperationContext::detached`] builds a context that ignores the caller entirely, which
/// cleanup relies on.
#[derive(Clone, Debug)]
pub struct OperationContext {
	token: CancellationToken,
	deadline: Option<Instant>,
}
impl OperationContext {
	/// Creates a root context without a deadline.
	pub fn new() -> Self {
		Self { token: CancellationToken::new(), deadline: None }
	}

	/// Creates a root context that ends `timeout` from now.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self::new().with_deadline(Instant::now() + timeout)
	}

	/// Returns a copy bounded by `deadline`; an earlier existing deadline wins.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));

		self
	}

	/// Creates a child context cancelled together with this one.
	pub fn child(&self) -> Self {
		Self { token: self.token.child_token(), deadline: self.deadline }
	}

	/// Creates an independent context bounded by `timeout`, unaffected by this one.
	pub fn detached(timeout: Duration) -> Self {
		Self::with_timeout(timeout)
	}

	/// Cancels this context and every child.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Deadline of this context, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Time left before the deadline; `None` when unbounded.
	pub fn remaining(&self) -> Option<Duration> {
		self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
	}

	/// Returns `true` when the deadline has passed.
	pub fn deadline_exceeded(&self) -> bool {
		self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
	}

	/// Returns `true` when cancelled explicitly or past the deadline.
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled() || self.deadline_exceeded()
	}

	/// Resolves once the context is cancelled or its deadline passes.
	pub async fn done(&self) {
		match self.deadline {
			Some(deadline) => tokio::select! {
				_ = self.token.cancelled() => {},
				_ = time::sleep_until(deadline) => {},
			},
			None => self.token.cancelled().await,
		}
	}

	/// Sleeps for `duration`, returning `false` if the context ended first.
	pub async fn sleep(&self, duration: Duration) -> bool {
		tokio::select! {
			_ = self.done() => false,
			_ = time::sleep(duration) => true,
		}
	}

	/// Runs `fut` unless the context ends first.
	pub async fn run<F>(&self, fut: F) -> Option<F::Output>
	where
		F: Future,
	{
		tokio::select! {
			biased;
			_ = self.done() => None,
			output = fut => Some(output),
		}
	}
}
impl Default for OperationContext {
	fn default() -> Self {
		Self::new()
	}
}
