//! [`MongoProbe`] backed by the official MongoDB driver.

// crates.io
use mongodb::{
	Client,
	bson::doc,
	error::{Error as DriverError, ErrorKind},
	options::ClientOptions,
};
// self
use crate::{
	_prelude::*,
	auth::ADMIN_DATABASE,
	context::OperationContext,
	probe::{MongoProbe, ProbeFuture, ProbeOutcome},
	uri::AuthenticatedUri,
};

// Server code for `AuthenticationFailed`.
const AUTHENTICATION_FAILED: i32 = 18;

/// Pings `admin` with a throwaway driver client.
#[derive(Clone, Debug)]
pub struct DriverProbe {
	timeout: Duration,
	app_name: Option<String>,
}
impl DriverProbe {
	/// Upper bound for connect and server-selection timeouts.
	pub const MAX_TIMEOUT: Duration = Duration::from_secs(5);

	/// Creates a probe with the maximum per-attempt timeout.
	pub fn new() -> Self {
		Self { timeout: Self::MAX_TIMEOUT, app_name: Some("matlas-cli".into()) }
	}

	/// Lowers the per-attempt timeout; values above [`DriverProbe::MAX_TIMEOUT`] are capped.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout.min(Self::MAX_TIMEOUT);

		self
	}

	/// Overrides the application name reported to the server.
	pub fn with_app_name(mut self, app_name: Option<String>) -> Self {
		self.app_name = app_name;

		self
	}

	async fn ping(&self, uri: &str, timeout: Duration) -> Result<(), DriverError> {
		let mut options = ClientOptions::parse(uri).await?;

		options.connect_timeout = Some(timeout);
		options.server_selection_timeout = Some(timeout);
		options.app_name = self.app_name.clone();

		let client = Client::with_options(options)?;
		let outcome = client.database(ADMIN_DATABASE).run_command(doc! { "ping": 1 }).await;

		client.shutdown().await;

		outcome.map(drop)
	}
}
impl Default for DriverProbe {
	fn default() -> Self {
		Self::new()
	}
}
impl MongoProbe for DriverProbe {
	fn probe<'a>(
		&'a self,
		ctx: &'a OperationContext,
		uri: &'a AuthenticatedUri,
	) -> ProbeFuture<'a> {
		Box::pin(async move {
			let timeout = ctx.remaining().map_or(self.timeout, |left| left.min(self.timeout));

			if timeout.is_zero() {
				return ProbeOutcome::Cancelled;
			}

			match ctx.run(self.ping(uri.expose(), timeout)).await {
				None => ProbeOutcome::Cancelled,
				Some(Ok(())) => ProbeOutcome::Succeeded,
				Some(Err(e)) => classify(&e),
			}
		})
	}
}

fn classify(err: &DriverError) -> ProbeOutcome {
	let failure = match err.kind.as_ref() {
		ErrorKind::Authentication { .. } => DriverFailure::Authentication,
		ErrorKind::Command(command) => DriverFailure::Command(command.code),
		ErrorKind::ServerSelection { message, .. } => DriverFailure::ServerSelection(message),
		_ => DriverFailure::Other,
	};

	failure.outcome()
}

// Driver error shapes that decide between "rejected" and "keep waiting".
#[derive(Debug)]
enum DriverFailure<'a> {
	Authentication,
	Command(i32),
	ServerSelection(&'a str),
	Other,
}
impl DriverFailure<'_> {
	fn outcome(&self) -> ProbeOutcome {
		match self {
			Self::Authentication => ProbeOutcome::AuthenticationRejected,
			Self::Command(AUTHENTICATION_FAILED) => ProbeOutcome::AuthenticationRejected,
			// Handshake auth failures can surface wrapped in a server-selection timeout.
			Self::ServerSelection(message) if message.contains("Authentication failed") =>
				ProbeOutcome::AuthenticationRejected,
			_ => ProbeOutcome::TransportFailed,
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::io;
	// crates.io
	use mongodb::{bson, error::CommandError};
	// self
	use super::*;

	fn command_error(code: i32, code_name: &str) -> DriverError {
		let command: CommandError = bson::from_document(doc! {
			"code": code,
			"codeName": code_name,
			"errmsg": "Command failed.",
		})
		.expect("Command error document should deserialize.");

		DriverError::from(ErrorKind::Command(command))
	}

	#[test]
	fn authentication_failed_command_is_a_rejection() {
		assert_eq!(
			classify(&command_error(AUTHENTICATION_FAILED, "AuthenticationFailed")),
			ProbeOutcome::AuthenticationRejected
		);
		assert_eq!(
			classify(&command_error(13, "Unauthorized")),
			ProbeOutcome::TransportFailed
		);
	}

	#[test]
	fn io_failures_keep_waiting() {
		let io = io::Error::from(io::ErrorKind::ConnectionRefused);

		assert_eq!(
			classify(&DriverError::from(ErrorKind::Io(Arc::new(io)))),
			ProbeOutcome::TransportFailed
		);
	}

	#[test]
	fn authentication_kinds_map_to_rejection() {
		assert_eq!(DriverFailure::Authentication.outcome(), ProbeOutcome::AuthenticationRejected);
		assert_eq!(
			DriverFailure::ServerSelection(
				"Server selection timeout: No available servers. Topology: { Servers: [ \
				{ Address: ac-1.mongodb.net:27017, Error: Authentication failed. } ] }"
			)
			.outcome(),
			ProbeOutcome::AuthenticationRejected
		);
		assert_eq!(
			DriverFailure::ServerSelection(
				"Server selection timeout: No available servers. Topology: { Servers: [ \
				{ Address: ac-1.mongodb.net:27017, Error: connection refused } ] }"
			)
			.outcome(),
			ProbeOutcome::TransportFailed
		);
		assert_eq!(DriverFailure::Other.outcome(), ProbeOutcome::TransportFailed);
	}
}
