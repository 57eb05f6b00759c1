//! Authenticated reachability checks for freshly provisioned users.

#[cfg(feature = "mongodb")] pub mod mongodb;
#[cfg(feature = "mongodb")] pub use self::mongodb::DriverProbe;

// self
use crate::{_prelude::*, context::OperationContext, uri::AuthenticatedUri};

/// Boxed future returned by [`MongoProbe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeOutcome> + 'a + Send>>;

/// Performs one authenticated `ping` against a cluster.
///
/// Implementations open at most a short-lived client and must return
/// [`ProbeOutcome::Cancelled`] promptly once `ctx` ends.
pub trait MongoProbe
where
	Self: Send + Sync,
{
	/// Attempts a single authenticated round-trip using `uri`.
	fn probe<'a>(&'a self, ctx: &'a OperationContext, uri: &'a AuthenticatedUri)
	-> ProbeFuture<'a>;
}

/// Classified result of a single probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeOutcome {
	/// The cluster accepted the credentials.
	Succeeded,
	/// The cluster refused the credentials; usually the user has not propagated yet.
	AuthenticationRejected,
	/// Network, DNS, TLS, or server-selection failure.
	TransportFailed,
	/// The context ended before the probe finished.
	Cancelled,
}
impl ProbeOutcome {
	/// Returns a stable label suitable for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Succeeded => "succeeded",
			Self::AuthenticationRejected => "authentication_rejected",
			Self::TransportFailed => "transport_failed",
			Self::Cancelled => "cancelled",
		}
	}
}
impl Display for ProbeOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
