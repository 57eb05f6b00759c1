//! Temporary database users, their generated credentials, and lifecycle status.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	auth::{DatabaseUserPassword, ProjectId, RoleSet},
};

/// Prefix shared by every temporary username so operators can find orphans.
pub const USERNAME_PREFIX: &str = "matlas-tmp-";
/// Atlas must never expire a temporary user sooner than this.
pub const MIN_USER_TTL: Duration = Duration::from_secs(15 * 60);
/// Default lifetime requested from Atlas for temporary users.
pub const DEFAULT_USER_TTL: Duration = Duration::from_secs(60 * 60);

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

static USERNAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current lifecycle status for a temporary user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
	/// User exists and has not reached its Atlas expiry.
	Live,
	/// Atlas expiry passed before the broker released the user.
	Expired,
	/// Cleanup ran for this user.
	Released,
}

/// Temporary Atlas database user owned by a single broker call.
///
/// Clones share lifecycle state, so a clone handed to the caller's operation observes the
/// `Live → Released` transition performed by the broker's cleanup.
#[derive(Clone)]
pub struct EphemeralUser {
	/// Opaque, process-unique username.
	pub username: String,
	/// SCRAM password; redacted in every formatter.
	pub password: DatabaseUserPassword,
	/// Project owning the user.
	pub project: ProjectId,
	/// Roles granted to the user.
	pub roles: RoleSet,
	/// Instant the user was requested.
	pub issued_at: OffsetDateTime,
	/// Instant Atlas deletes the user on its own.
	pub expires_at: OffsetDateTime,
	released_at: Arc<Mutex<Option<OffsetDateTime>>>,
}
impl EphemeralUser {
	/// Creates a live user record issued at `issued_at` with lifetime `ttl`.
	pub fn new(
		username: impl Into<String>,
		password: DatabaseUserPassword,
		project: ProjectId,
		roles: RoleSet,
		issued_at: OffsetDateTime,
		ttl: Duration,
	) -> Self {
		Self {
			username: username.into(),
			password,
			project,
			roles,
			issued_at,
			expires_at: issued_at + ttl,
			released_at: Default::default(),
		}
	}

	/// Lifetime requested from Atlas.
	pub fn ttl(&self) -> Duration {
		(self.expires_at - self.issued_at).try_into().unwrap_or_default()
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> UserStatus {
		if self.released_at.lock().is_some() {
			return UserStatus::Released;
		}
		if instant >= self.expires_at {
			return UserStatus::Expired;
		}

		UserStatus::Live
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> UserStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` once cleanup has run for this user.
	pub fn is_released(&self) -> bool {
		self.released_at.lock().is_some()
	}

	/// Instant cleanup ran, if it has.
	pub fn released_at(&self) -> Option<OffsetDateTime> {
		*self.released_at.lock()
	}

	/// Marks the user released. Returns `false` if it already was.
	pub(crate) fn mark_released(&self, instant: OffsetDateTime) -> bool {
		let mut guard = self.released_at.lock();

		if guard.is_some() {
			return false;
		}

		*guard = Some(instant);

		true
	}
}
impl Debug for EphemeralUser {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EphemeralUser")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("project", &self.project)
			.field("roles", &self.roles)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("released_at", &self.released_at())
			.finish()
	}
}

/// Generates `matlas-tmp-<counter>-<base32>` with 64 random bits in the suffix.
pub fn generate_username() -> String {
	let counter = USERNAME_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
	let suffix = rand::rng().random::<u64>().to_be_bytes();

	format!("{USERNAME_PREFIX}{counter}-{}", base32_lower(&suffix))
}

/// Lifetime requested from Atlas: the configured TTL, stretched to cover the operation
/// deadline and never below [`MIN_USER_TTL`].
pub fn effective_ttl(configured: Duration, operation_deadline: Option<Duration>) -> Duration {
	configured.max(operation_deadline.unwrap_or_default()).max(MIN_USER_TTL)
}

// RFC 4648 base32, lowercase, unpadded.
fn base32_lower(bytes: &[u8]) -> String {
	let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
	let mut buffer = 0_u32;
	let mut bits = 0_u32;

	for &byte in bytes {
		buffer = (buffer << 8) | u32::from(byte);
		bits += 8;

		while bits >= 5 {
			bits -= 5;
			out.push(char::from(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize]));
		}

		buffer &= (1 << bits) - 1;
	}
	if bits > 0 {
		out.push(char::from(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize]));
	}

	out
}

#[cfg(test)]
mod tests {
	// std
	use std::{collections::HashSet, thread};
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn user(issued: OffsetDateTime, ttl: Duration) -> EphemeralUser {
		EphemeralUser::new(
			"matlas-tmp-1-abc",
			DatabaseUserPassword::new("pw"),
			ProjectId::new("5f1d2c3b4a5e6f7081920a1b")
				.expect("Project fixture should be valid."),
			RoleSet::from_str("readWrite@shop").expect("Role fixture should parse."),
			issued,
			ttl,
		)
	}

	#[test]
	fn base32_matches_rfc_vectors() {
		assert_eq!(base32_lower(b""), "");
		assert_eq!(base32_lower(b"f"), "my");
		assert_eq!(base32_lower(b"fo"), "mzxq");
		assert_eq!(base32_lower(b"foobar"), "mzxw6ytboi");
	}

	#[test]
	fn usernames_follow_format_and_never_repeat() {
		let handles = (0..4)
			.map(|_| thread::spawn(|| (0..256).map(|_| generate_username()).collect::<Vec<_>>()))
			.collect::<Vec<_>>();
		let mut seen = HashSet::new();

		for handle in handles {
			for name in handle.join().expect("Username generator thread should not panic.") {
				let rest = name.strip_prefix(USERNAME_PREFIX).expect("Prefix should be present.");
				let (counter, suffix) = rest.split_once('-').expect("Counter separator expected.");

				assert!(counter.parse::<u64>().is_ok());
				assert_eq!(suffix.len(), 13);
				assert!(seen.insert(name));
			}
		}
	}

	#[test]
	fn ttl_covers_deadline_and_floor() {
		let hour = Duration::from_secs(3600);

		assert_eq!(effective_ttl(hour, None), hour);
		assert_eq!(effective_ttl(hour, Some(Duration::from_secs(7200))), Duration::from_secs(7200));
		assert_eq!(effective_ttl(Duration::from_secs(60), Some(Duration::from_secs(120))), MIN_USER_TTL);
	}

	#[test]
	fn status_transitions_cover_all_states() {
		let issued = macros::datetime!(2026-01-01 00:00 UTC);
		let record = user(issued, Duration::from_secs(3600));

		assert_eq!(record.ttl(), Duration::from_secs(3600));
		assert_eq!(record.status_at(macros::datetime!(2026-01-01 00:30 UTC)), UserStatus::Live);
		assert_eq!(record.status_at(macros::datetime!(2026-01-01 01:00 UTC)), UserStatus::Expired);

		let shared = record.clone();

		assert!(record.mark_released(macros::datetime!(2026-01-01 00:10 UTC)));
		assert!(!record.mark_released(macros::datetime!(2026-01-01 00:11 UTC)));
		assert_eq!(shared.status_at(macros::datetime!(2026-01-01 00:30 UTC)), UserStatus::Released);
		assert!(!format!("{shared:?}").contains("pw\""));
	}
}
