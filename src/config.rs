//! Broker and Atlas adapter configuration.

// self
use crate::{
	_prelude::*,
	auth::{AtlasApiToken, DEFAULT_USER_TTL, MIN_USER_TTL},
	error::ConfigError,
};

/// Default Atlas Admin API v2 base URL.
pub const DEFAULT_ATLAS_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas/v2";
/// Versioned media type sent in `Accept`; pins the Admin API resource version.
pub const ATLAS_API_MEDIA_TYPE: &str = "application/vnd.atlas.2023-01-01+json";

/// Broker behavior knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
	/// Log every state transition instead of only the final outcome.
	pub verbose: bool,
	/// Lifetime requested from Atlas for temporary users.
	#[serde(with = "secs")]
	pub user_ttl: Duration,
	/// Propagation wait policy.
	pub propagation: PropagationPolicy,
	/// Upper bound for a single cleanup delete.
	#[serde(with = "secs")]
	pub cleanup_timeout: Duration,
	/// Create attempts before giving up on username collisions.
	pub max_create_attempts: u32,
}
impl BrokerConfig {
	/// Default cleanup bound.
	pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);
	/// Default number of create attempts.
	pub const DEFAULT_MAX_CREATE_ATTEMPTS: u32 = 3;

	/// Parses a JSON document, reporting the failing path on error, then validates it.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::Parse { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Enables or disables per-transition logging.
	pub fn with_verbose(mut self, verbose: bool) -> Self {
		self.verbose = verbose;

		self
	}

	/// Overrides the user TTL.
	pub fn with_user_ttl(mut self, ttl: Duration) -> Self {
		self.user_ttl = ttl;

		self
	}

	/// Overrides the propagation policy.
	pub fn with_propagation(mut self, policy: PropagationPolicy) -> Self {
		self.propagation = policy;

		self
	}

	/// Overrides the cleanup bound.
	pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
		self.cleanup_timeout = timeout;

		self
	}

	/// Overrides the number of create attempts.
	pub fn with_max_create_attempts(mut self, attempts: u32) -> Self {
		self.max_create_attempts = attempts;

		self
	}

	/// Checks floors and ranges.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.user_ttl < MIN_USER_TTL {
			return Err(ConfigError::DurationTooShort {
				field: "user_ttl",
				min: MIN_USER_TTL,
				actual: self.user_ttl,
			});
		}
		if self.cleanup_timeout.is_zero() {
			return Err(ConfigError::Inconsistent {
				field: "cleanup_timeout",
				reason: "must be positive",
			});
		}
		if self.max_create_attempts == 0 {
			return Err(ConfigError::Inconsistent {
				field: "max_create_attempts",
				reason: "at least one attempt is required",
			});
		}

		self.propagation.validate()
	}
}
impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			verbose: false,
			user_ttl: DEFAULT_USER_TTL,
			propagation: PropagationPolicy::default(),
			cleanup_timeout: Self::DEFAULT_CLEANUP_TIMEOUT,
			max_create_attempts: Self::DEFAULT_MAX_CREATE_ATTEMPTS,
		}
	}
}

/// How long to wait for a new user to reach every node, and how often to probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PropagationPolicy {
	/// Share of the remaining deadline spent waiting.
	pub budget_fraction: f64,
	/// Budget floor.
	#[serde(with = "secs")]
	pub min_budget: Duration,
	/// Budget ceiling.
	#[serde(with = "secs")]
	pub max_budget: Duration,
	/// Budget used when no deadline applies.
	#[serde(with = "secs")]
	pub default_budget: Duration,
	/// First delay between probes.
	#[serde(with = "secs")]
	pub initial_backoff: Duration,
	/// Delay cap between probes.
	#[serde(with = "secs")]
	pub max_backoff: Duration,
}
impl PropagationPolicy {
	/// Computes the wait budget from the time left before the nearest deadline.
	pub fn budget(&self, remaining: Option<Duration>) -> Duration {
		match remaining {
			Some(remaining) =>
				remaining.mul_f64(self.budget_fraction).max(self.min_budget).min(self.max_budget),
			None => self.default_budget,
		}
	}

	/// Doubles `current`, capped at [`PropagationPolicy::max_backoff`].
	pub fn next_backoff(&self, current: Duration) -> Duration {
		current.saturating_mul(2).min(self.max_backoff)
	}

	/// Checks the fraction and that every range is ordered.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !(self.budget_fraction > 0. && self.budget_fraction <= 1.) {
			return Err(ConfigError::Inconsistent {
				field: "propagation.budget_fraction",
				reason: "must be in (0, 1]",
			});
		}
		if self.min_budget > self.max_budget {
			return Err(ConfigError::Inconsistent {
				field: "propagation.min_budget",
				reason: "exceeds max_budget",
			});
		}
		if self.initial_backoff.is_zero() || self.initial_backoff > self.max_backoff {
			return Err(ConfigError::Inconsistent {
				field: "propagation.initial_backoff",
				reason: "must be positive and not exceed max_backoff",
			});
		}

		Ok(())
	}
}
impl Default for PropagationPolicy {
	fn default() -> Self {
		Self {
			budget_fraction: 0.6,
			min_budget: Duration::from_secs(30),
			max_budget: Duration::from_secs(180),
			default_budget: Duration::from_secs(90),
			initial_backoff: Duration::from_secs(2),
			max_backoff: Duration::from_secs(15),
		}
	}
}

/// Settings for [`AtlasHttpClient`](crate::atlas::AtlasHttpClient).
#[derive(Clone, Debug)]
pub struct AtlasHttpConfig {
	/// Admin API base URL; `groups/...` paths are appended to it.
	pub base_url: String,
	/// Bearer token; redacted in `Debug`.
	pub token: AtlasApiToken,
	/// `Accept` media type pinning the API version.
	pub accept: String,
	/// Attempts per call, including the first.
	pub max_attempts: u32,
	/// First retry delay when Atlas gives no `Retry-After`.
	pub initial_backoff: Duration,
	/// Retry delay cap, also applied to `Retry-After`.
	pub max_backoff: Duration,
	/// Per-request timeout.
	pub request_timeout: Duration,
}
impl AtlasHttpConfig {
	/// Creates a configuration for the public Atlas endpoint.
	pub fn new(token: AtlasApiToken) -> Self {
		Self {
			base_url: DEFAULT_ATLAS_BASE_URL.into(),
			token,
			accept: ATLAS_API_MEDIA_TYPE.into(),
			max_attempts: 3,
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(8),
			request_timeout: Duration::from_secs(30),
		}
	}

	/// Points the client at another base URL (tests, Atlas for Government).
	pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.base_url = base_url.into();

		self
	}

	/// Overrides the retry policy.
	pub fn with_retry(mut self, max_attempts: u32, initial_backoff: Duration) -> Self {
		self.max_attempts = max_attempts.max(1);
		self.initial_backoff = initial_backoff;

		self
	}

	/// Overrides the per-request timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Parses the base URL, requiring an absolute `http(s)` URL.
	pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
		let invalid = || ConfigError::InvalidBaseUrl { url: self.base_url.clone() };
		let url = Url::parse(&self.base_url).map_err(|_| invalid())?;

		if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
			return Err(invalid());
		}

		Ok(url)
	}
}

mod secs {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_f64(value.as_secs_f64())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let secs = f64::deserialize(deserializer)?;

		Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn budget_follows_deadline_and_clamps() {
		let policy = PropagationPolicy::default();

		assert_eq!(policy.budget(None), Duration::from_secs(90));
		assert_eq!(policy.budget(Some(Duration::from_secs(120))), Duration::from_secs(72));
		assert_eq!(policy.budget(Some(Duration::from_secs(10))), Duration::from_secs(30));
		assert_eq!(policy.budget(Some(Duration::from_secs(3600))), Duration::from_secs(180));
	}

	#[test]
	fn backoff_doubles_to_cap() {
		let policy = PropagationPolicy::default();
		let mut delay = policy.initial_backoff;
		let mut seen = Vec::new();

		for _ in 0..5 {
			seen.push(delay.as_secs());
			delay = policy.next_backoff(delay);
		}

		assert_eq!(seen, [2, 4, 8, 15, 15]);
	}

	#[test]
	fn json_overrides_merge_with_defaults() {
		let config = BrokerConfig::from_json_str(
			r#"{"verbose":true,"user_ttl":7200,"propagation":{"max_backoff":10}}"#,
		)
		.expect("Config document should parse.");

		assert!(config.verbose);
		assert_eq!(config.user_ttl, Duration::from_secs(7200));
		assert_eq!(config.propagation.max_backoff, Duration::from_secs(10));
		assert_eq!(config.propagation.initial_backoff, Duration::from_secs(2));
		assert_eq!(config.max_create_attempts, 3);
	}

	#[test]
	fn parse_errors_report_the_path() {
		let err = BrokerConfig::from_json_str(r#"{"propagation":{"min_budget":"soon"}}"#)
			.expect_err("String durations should be rejected.");

		match err {
			ConfigError::Parse { source } =>
				assert_eq!(source.path().to_string(), "propagation.min_budget"),
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[test]
	fn validation_rejects_short_ttl_and_inverted_ranges() {
		let short = BrokerConfig::default().with_user_ttl(Duration::from_secs(60));

		assert!(matches!(short.validate(), Err(ConfigError::DurationTooShort { .. })));

		let inverted = BrokerConfig::default().with_propagation(PropagationPolicy {
			min_budget: Duration::from_secs(200),
			..Default::default()
		});

		assert!(matches!(inverted.validate(), Err(ConfigError::Inconsistent { .. })));
		assert!(BrokerConfig::default().validate().is_ok());
	}

	#[test]
	fn atlas_base_url_must_be_http() {
		let config = AtlasHttpConfig::new(AtlasApiToken::new("t"));

		assert!(config.parsed_base_url().is_ok());
		assert!(config.clone().with_base_url("ftp://example.com").parsed_base_url().is_err());
		assert!(config.with_base_url("not a url").parsed_base_url().is_err());
	}
}
