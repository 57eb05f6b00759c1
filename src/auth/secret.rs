//! Secret wrappers that keep passwords and API tokens out of logs.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

/// Generated password length; 24 alphanumeric characters carry roughly 142 bits of entropy.
pub const PASSWORD_LEN: usize = 24;

macro_rules! def_secret {
	($name:ident, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq)]
		pub struct $name(String);
		impl $name {
			/// Wraps a new secret string.
			pub fn new(value: impl Into<String>) -> Self {
				Self(value.into())
			}

			/// Returns the inner secret. Callers must avoid logging this string.
			pub fn expose(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.debug_tuple(stringify!($name)).field(&"<redacted>").finish()
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str("<redacted>")
			}
		}
	};
}

def_secret! { DatabaseUserPassword, "SCRAM password of a temporary database user." }
def_secret! { AtlasApiToken, "Bearer token authorizing Atlas Admin API calls." }

impl DatabaseUserPassword {
	/// Draws a fresh password from the thread-local CSPRNG.
	///
	/// Only ASCII letters and digits are used, so the value is valid for SCRAM and needs no
	/// escaping beyond what the URI rewriter already does.
	pub fn generate() -> Self {
		Self(rand::rng().sample_iter(Alphanumeric).take(PASSWORD_LEN).map(char::from).collect())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let password = DatabaseUserPassword::new("hunter2");
		let token = AtlasApiToken::new("atlas-token");

		assert_eq!(format!("{password:?}"), "DatabaseUserPassword(\"<redacted>\")");
		assert_eq!(format!("{password}"), "<redacted>");
		assert_eq!(format!("{token}"), "<redacted>");
		assert_eq!(token.expose(), "atlas-token");
	}

	#[test]
	fn generated_passwords_are_long_and_distinct() {
		let first = DatabaseUserPassword::generate();
		let second = DatabaseUserPassword::generate();

		assert_eq!(first.expose().len(), PASSWORD_LEN);
		assert!(first.expose().chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(first, second);
	}
}
