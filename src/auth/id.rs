//! Atlas project and cluster identifiers, validated against the shapes Atlas accepts.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

/// Length of an Atlas project (group) ID: a 12-byte ObjectId rendered as hex.
pub const PROJECT_ID_LEN: usize = 24;
/// Longest cluster name Atlas accepts.
pub const CLUSTER_NAME_MAX_LEN: usize = 64;

macro_rules! def_id {
	($name:ident, $doc:literal, $check:path) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates `value` and wraps it.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				$check(&value)?;

				Ok(Self(value))
			}

			/// Borrowed string form.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.debug_tuple(stringify!($name)).field(&self.0).finish()
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

/// Rejected project IDs and cluster names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Project ID is not 24 hexadecimal characters.
	#[error("Project ID `{value}` must be 24 hexadecimal characters.")]
	MalformedProjectId {
		/// Rejected input.
		value: String,
	},
	/// Cluster name is empty.
	#[error("Cluster name cannot be empty.")]
	EmptyClusterName,
	/// Cluster name is longer than Atlas allows.
	#[error("Cluster name `{value}` exceeds 64 characters.")]
	ClusterNameTooLong {
		/// Rejected input.
		value: String,
	},
	/// Cluster name contains a character outside `[A-Za-z0-9-]`.
	#[error("Cluster name `{value}` contains `{found}`; only ASCII letters, digits and `-` fit.")]
	InvalidClusterCharacter {
		/// Rejected input.
		value: String,
		/// First offending character.
		found: char,
	},
}

def_id! { ProjectId, "Atlas project (group) ID.", check_project_id }
def_id! { ClusterName, "Cluster name, unique within an Atlas project.", check_cluster_name }

fn check_project_id(value: &str) -> Result<(), IdentifierError> {
	if value.len() == PROJECT_ID_LEN && value.bytes().all(|b| b.is_ascii_hexdigit()) {
		Ok(())
	} else {
		Err(IdentifierError::MalformedProjectId { value: value.to_owned() })
	}
}

fn check_cluster_name(value: &str) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::EmptyClusterName);
	}
	if let Some(found) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
		return Err(IdentifierError::InvalidClusterCharacter { value: value.to_owned(), found });
	}
	if value.len() > CLUSTER_NAME_MAX_LEN {
		return Err(IdentifierError::ClusterNameTooLong { value: value.to_owned() });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashMap;
	// self
	use super::*;

	#[test]
	fn project_ids_are_object_id_hex() {
		let project = ProjectId::new("5f1d2c3b4a5e6f7081920a1b").expect("ObjectId hex is valid.");

		assert_eq!(project.as_str(), "5f1d2c3b4a5e6f7081920a1b");
		assert_eq!(format!("{project:?}"), "ProjectId(\"5f1d2c3b4a5e6f7081920a1b\")");

		for bad in [
			"",
			"P1",
			"5f1d2c3b4a5e6f7081920a1",
			"5f1d2c3b4a5e6f7081920a1bc",
			"5f1d2c3b4a5e6f7081920a1g",
		] {
			assert!(
				matches!(ProjectId::new(bad), Err(IdentifierError::MalformedProjectId { .. })),
				"{bad:?} should be rejected."
			);
		}
	}

	#[test]
	fn cluster_names_allow_letters_digits_and_hyphens() {
		ClusterName::new("Cluster0").expect("Default Atlas name is valid.");
		ClusterName::new("analytics-eu-1").expect("Hyphenated name is valid.");
		ClusterName::new("a".repeat(CLUSTER_NAME_MAX_LEN)).expect("Longest name is valid.");

		assert_eq!(ClusterName::new(""), Err(IdentifierError::EmptyClusterName));
		assert!(matches!(
			ClusterName::new("a".repeat(CLUSTER_NAME_MAX_LEN + 1)),
			Err(IdentifierError::ClusterNameTooLong { .. })
		));
		assert!(matches!(
			ClusterName::new("Cluster0 "),
			Err(IdentifierError::InvalidClusterCharacter { found: ' ', .. })
		));
		assert!(matches!(
			ClusterName::new("my_cluster"),
			Err(IdentifierError::InvalidClusterCharacter { found: '_', .. })
		));
	}

	#[test]
	fn deserialization_validates() {
		let cluster: ClusterName =
			serde_json::from_str("\"Cluster0\"").expect("Cluster should deserialize.");

		assert_eq!(cluster.as_str(), "Cluster0");
		assert!(serde_json::from_str::<ClusterName>("\"with.dot\"").is_err());
		assert!(serde_json::from_str::<ProjectId>("\"not-a-project\"").is_err());
	}

	#[test]
	fn borrow_supports_str_lookup() {
		let map = HashMap::from([(ClusterName::new("analytics").expect("Valid name."), 3_u8)]);

		assert_eq!(map.get("analytics"), Some(&3));
	}
}
