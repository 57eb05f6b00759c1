// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for broker calls and temporary users.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
	calls: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	provisioned: AtomicU64,
	released: AtomicU64,
	cleanup_failures: AtomicU64,
}
impl BrokerMetrics {
	/// Returns the total number of broker calls.
	pub fn calls(&self) -> u64 {
		self.calls.load(Ordering::Relaxed)
	}

	/// Returns the number of calls that returned `Ok`.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of calls that returned an error.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns the number of temporary users created.
	pub fn provisioned(&self) -> u64 {
		self.provisioned.load(Ordering::Relaxed)
	}

	/// Returns the number of temporary users deleted.
	pub fn released(&self) -> u64 {
		self.released.load(Ordering::Relaxed)
	}

	/// Returns the number of deletes that failed or timed out.
	pub fn cleanup_failures(&self) -> u64 {
		self.cleanup_failures.load(Ordering::Relaxed)
	}

	/// Users created but not (yet) deleted.
	pub fn outstanding(&self) -> u64 {
		self.provisioned().saturating_sub(self.released() + self.cleanup_failures())
	}

	pub(crate) fn record_call(&self) {
		self.calls.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_provisioned(&self) {
		self.provisioned.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_released(&self) {
		self.released.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cleanup_failure(&self) {
		self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
	}
}
