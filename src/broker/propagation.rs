//! Waits for a freshly created user to become usable on every cluster node.

// crates.io
use tokio::time::{self, Instant};
// self
use crate::{
	_prelude::*,
	config::PropagationPolicy,
	context::OperationContext,
	probe::{MongoProbe, ProbeOutcome},
	uri::AuthenticatedUri,
};

/// How a propagation wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropagationOutcome {
	/// A probe authenticated successfully.
	Propagated,
	/// The budget elapsed; for blind waits this is the normal ending.
	TimedOut,
	/// The parent context ended first.
	Cancelled,
}

/// Summary of one propagation wait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropagationReport {
	/// How the wait ended.
	pub outcome: PropagationOutcome,
	/// Budget derived from the deadlines.
	pub budget: Duration,
	/// Time spent waiting.
	pub elapsed: Duration,
	/// Whether probes were issued.
	pub probed: bool,
	/// Number of probes issued.
	pub probes: u32,
	/// Last probe result, if any.
	pub last_probe: Option<ProbeOutcome>,
}

/// Waits for propagation within a budget derived from the nearest deadline.
///
/// With a probe, pings with exponential backoff until one succeeds; every probe is cut off at
/// the budget end so the wait never overruns it by more than scheduling slack. Without a
/// probe, sleeps for the whole budget.
pub async fn await_propagation<P>(
	ctx: &OperationContext,
	policy: &PropagationPolicy,
	probe: Option<&P>,
	uri: &AuthenticatedUri,
	operation_deadline: Option<Duration>,
) -> PropagationReport
where
	P: ?Sized + MongoProbe,
{
	let started = Instant::now();
	let budget = policy.budget(nearest(ctx.remaining(), operation_deadline));
	let budget_end = started + budget;
	let mut report = PropagationReport {
		outcome: PropagationOutcome::TimedOut,
		budget,
		elapsed: Duration::ZERO,
		probed: probe.is_some(),
		probes: 0,
		last_probe: None,
	};
	let Some(probe) = probe else {
		if !ctx.sleep(budget).await {
			report.outcome = PropagationOutcome::Cancelled;
		}

		report.elapsed = started.elapsed();

		return report;
	};
	let mut delay = policy.initial_backoff;

	report.outcome = loop {
		let probe_ctx = ctx.child().with_deadline(budget_end);
		let attempt = tokio::select! {
			biased;
			_ = ctx.done() => ProbeOutcome::Cancelled,
			outcome = time::timeout_at(budget_end, probe.probe(&probe_ctx, uri)) =>
				outcome.unwrap_or(ProbeOutcome::TransportFailed),
		};
		// A probe cut off by the budget rather than the caller counts as a failed attempt.
		let attempt = match attempt {
			ProbeOutcome::Cancelled if !ctx.is_cancelled() => ProbeOutcome::TransportFailed,
			other => other,
		};

		report.probes += 1;
		report.last_probe = Some(attempt);

		match attempt {
			ProbeOutcome::Succeeded => break PropagationOutcome::Propagated,
			ProbeOutcome::Cancelled => break PropagationOutcome::Cancelled,
			ProbeOutcome::AuthenticationRejected | ProbeOutcome::TransportFailed => {},
		}

		let now = Instant::now();

		if now >= budget_end {
			break PropagationOutcome::TimedOut;
		}
		if !ctx.sleep(delay.min(budget_end - now)).await {
			break PropagationOutcome::Cancelled;
		}
		if Instant::now() >= budget_end {
			break PropagationOutcome::TimedOut;
		}

		delay = policy.next_backoff(delay);
	};
	report.elapsed = started.elapsed();

	report
}

fn nearest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
	match (a, b) {
		(Some(a), Some(b)) => Some(a.min(b)),
		(a, b) => a.or(b),
	}
}
