//! Role modeling and parsing for temporary database users.
//!
//! Callers describe roles as `role`, `role@database`, or comma-separated lists of both. The
//! parser strips whitespace around every field, scopes bare roles to the caller's target
//! database (or `admin` when there is none), drops duplicate bindings while keeping the first
//! occurrence's position, and substitutes an operation-class default when nothing was
//! requested.

// std
use std::{collections::HashSet, slice::Iter};
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
// self
use crate::_prelude::*;

/// Authentication database for every Atlas database user and the fallback role scope.
pub const ADMIN_DATABASE: &str = "admin";
/// Default binding for operations that read schemas or data.
pub const DEFAULT_SCHEMA_READ_ROLE: (&str, &str) = ("readWriteAnyDatabase", ADMIN_DATABASE);
/// Default binding for operations that manage custom roles or users.
pub const DEFAULT_ROLE_MANAGEMENT_ROLE: (&str, &str) = ("atlasAdmin", ADMIN_DATABASE);

/// Errors emitted when parsing role specifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum RoleSpecError {
	/// Role name was empty after trimming.
	#[error("Role specification `{spec}` has an empty role name.")]
	EmptyRole {
		/// The offending specification.
		spec: String,
	},
	/// Database name after `@` was empty after trimming.
	#[error("Role specification `{spec}` has an empty database name.")]
	EmptyDatabase {
		/// The offending specification.
		spec: String,
	},
	/// More than one `@` separator was present.
	#[error("Role specification `{spec}` contains more than one `@`.")]
	MultipleSeparators {
		/// The offending specification.
		spec: String,
	},
	/// A field contains embedded whitespace.
	#[error("Role specification `{spec}` contains whitespace inside a name.")]
	ContainsWhitespace {
		/// The offending specification.
		spec: String,
	},
}

/// Operation class used to pick a default role set when the caller requests none.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
	/// Listing databases, collections, indexes, or documents.
	#[default]
	SchemaRead,
	/// Creating, updating, or deleting custom roles and users.
	RoleManagement,
}
impl OperationClass {
	/// Returns the `(role, database)` pair granted when no roles were requested.
	pub const fn default_binding(self) -> (&'static str, &'static str) {
		match self {
			Self::SchemaRead => DEFAULT_SCHEMA_READ_ROLE,
			Self::RoleManagement => DEFAULT_ROLE_MANAGEMENT_ROLE,
		}
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::SchemaRead => "schema_read",
			Self::RoleManagement => "role_management",
		}
	}
}

/// Single role granted on a single database.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct RoleBinding {
	#[serde(rename = "roleName")]
	role_name: String,
	#[serde(rename = "databaseName")]
	database_name: String,
}
impl RoleBinding {
	/// Builds a binding from already-trimmed parts.
	pub fn new(
		role_name: impl Into<String>,
		database_name: impl Into<String>,
	) -> Result<Self, RoleSpecError> {
		let role_name = role_name.into();
		let database_name = database_name.into();
		let spec = format!("{role_name}@{database_name}");

		validate_field(&role_name, &spec, |spec| RoleSpecError::EmptyRole { spec })?;
		validate_field(&database_name, &spec, |spec| RoleSpecError::EmptyDatabase { spec })?;

		Ok(Self { role_name, database_name })
	}

	/// Role name, e.g. `readWrite`.
	pub fn role_name(&self) -> &str {
		&self.role_name
	}

	/// Database the role applies to.
	pub fn database_name(&self) -> &str {
		&self.database_name
	}

	fn parse(raw: &str, default_database: &str) -> Result<Self, RoleSpecError> {
		let spec = raw.trim();
		let mut parts = spec.split('@');
		let role = parts.next().unwrap_or_default().trim();
		let database = parts.next().map(str::trim);

		if parts.next().is_some() {
			return Err(RoleSpecError::MultipleSeparators { spec: spec.to_owned() });
		}

		validate_field(role, spec, |spec| RoleSpecError::EmptyRole { spec })?;

		let database = match database {
			Some(database) => {
				validate_field(database, spec, |spec| RoleSpecError::EmptyDatabase { spec })?;

				database
			},
			None => default_database,
		};

		Ok(Self { role_name: role.to_owned(), database_name: database.to_owned() })
	}
}
impl Display for RoleBinding {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}@{}", self.role_name, self.database_name)
	}
}

/// Ordered, duplicate-free, non-empty set of role bindings.
///
/// Sets are only produced by the parser (or the operation-class defaults) and are never
/// mutated afterwards. The [`Display`] form (`role@db,role@db`) parses back into an equal
/// set.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RoleSet {
	bindings: Arc<[RoleBinding]>,
}
impl RoleSet {
	/// Parses role specifications scoped against an optional target database.
	///
	/// Each item may itself be a comma-separated list. An input without any non-blank item
	/// yields the default binding for `class`.
	pub fn parse<I, S>(
		specs: I,
		target_database: Option<&str>,
		class: OperationClass,
	) -> Result<Self, RoleSpecError>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let default_database = target_database
			.map(str::trim)
			.filter(|database| !database.is_empty())
			.unwrap_or(ADMIN_DATABASE);
		let mut seen = HashSet::new();
		let mut bindings = Vec::new();

		for item in specs {
			let item = item.as_ref();

			if item.trim().is_empty() {
				continue;
			}

			for raw in item.split(',') {
				let binding = RoleBinding::parse(raw, default_database)?;

				if seen.insert(binding.clone()) {
					bindings.push(binding);
				}
			}
		}

		if bindings.is_empty() {
			return Ok(Self::default_for(class));
		}

		Ok(Self { bindings: Arc::from(bindings) })
	}

	/// Returns the conservative default set for an operation class.
	pub fn default_for(class: OperationClass) -> Self {
		let (role_name, database_name) = class.default_binding();

		Self {
			bindings: Arc::from(vec![RoleBinding {
				role_name: role_name.to_owned(),
				database_name: database_name.to_owned(),
			}]),
		}
	}

	/// Number of distinct bindings (always at least one).
	pub fn len(&self) -> usize {
		self.bindings.len()
	}

	/// Returns `true` if the set has no bindings.
	pub fn is_empty(&self) -> bool {
		self.bindings.is_empty()
	}

	/// Returns true if the set grants `role` on `database`.
	pub fn contains(&self, role: &str, database: &str) -> bool {
		self.bindings.iter().any(|b| b.role_name == role && b.database_name == database)
	}

	/// Iterator over bindings in request order.
	pub fn iter(&self) -> Iter<'_, RoleBinding> {
		self.bindings.iter()
	}

	/// Returns the underlying slice of bindings.
	pub fn as_slice(&self) -> &[RoleBinding] {
		&self.bindings
	}
}
impl Debug for RoleSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("RoleSet").field(&self.to_string()).finish()
	}
}
impl Display for RoleSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		for (idx, binding) in self.bindings.iter().enumerate() {
			if idx > 0 {
				f.write_str(",")?;
			}

			Display::fmt(binding, f)?;
		}

		Ok(())
	}
}
impl FromStr for RoleSet {
	type Err = RoleSpecError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse([s], None, OperationClass::default())
	}
}
impl<'a> IntoIterator for &'a RoleSet {
	type IntoIter = Iter<'a, RoleBinding>;
	type Item = &'a RoleBinding;

	fn into_iter(self) -> Self::IntoIter {
		self.bindings.iter()
	}
}
impl Serialize for RoleSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.bindings.len()))?;

		for binding in self.bindings.iter() {
			seq.serialize_element(&binding.to_string())?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for RoleSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		RoleSet::parse(values, None, OperationClass::default()).map_err(DeError::custom)
	}
}

fn validate_field(
	value: &str,
	spec: &str,
	empty: impl FnOnce(String) -> RoleSpecError,
) -> Result<(), RoleSpecError> {
	if value.is_empty() {
		return Err(empty(spec.to_owned()));
	}
	if value.chars().any(char::is_whitespace) {
		return Err(RoleSpecError::ContainsWhitespace { spec: spec.to_owned() });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn parse(specs: &[&str], target: Option<&str>) -> Result<RoleSet, RoleSpecError> {
		RoleSet::parse(specs.iter().copied(), target, OperationClass::SchemaRead)
	}

	#[test]
	fn bare_roles_scope_to_target_database() {
		let roles = parse(&["readWrite"], Some("analytics")).expect("Bare role should parse.");

		assert_eq!(roles.to_string(), "readWrite@analytics");
		assert!(!roles.contains("readWrite", "admin"));
	}

	#[test]
	fn bare_roles_fall_back_to_admin() {
		let roles = parse(&["readWrite"], None).expect("Bare role should parse.");

		assert_eq!(roles.to_string(), "readWrite@admin");

		let roles = parse(&["readWrite"], Some("  ")).expect("Blank target should be ignored.");

		assert_eq!(roles.to_string(), "readWrite@admin");
	}

	#[test]
	fn lists_trim_and_deduplicate_in_order() {
		let roles = parse(&[" read @ shop , readWrite@shop", "read@shop,dbAdmin"], Some("shop"))
			.expect("Comma list should parse.");

		assert_eq!(roles.to_string(), "read@shop,readWrite@shop,dbAdmin@shop");
		assert_eq!(roles.len(), 3);
	}

	#[test]
	fn empty_input_uses_operation_class_defaults() {
		let schema = parse(&[], Some("shop")).expect("Empty input should default.");

		assert_eq!(schema.to_string(), "readWriteAnyDatabase@admin");

		let blank = parse(&["", "   "], None).expect("Blank items count as empty input.");

		assert_eq!(blank, schema);

		let management =
			RoleSet::parse(Vec::<String>::new(), None, OperationClass::RoleManagement)
				.expect("Empty input should default.");

		assert_eq!(management.to_string(), "atlasAdmin@admin");
	}

	#[test]
	fn malformed_specs_are_rejected() {
		assert!(matches!(parse(&["@shop"], None), Err(RoleSpecError::EmptyRole { .. })));
		assert!(matches!(parse(&["read@"], None), Err(RoleSpecError::EmptyDatabase { .. })));
		assert!(matches!(parse(&["read,,write"], None), Err(RoleSpecError::EmptyRole { .. })));
		assert!(matches!(
			parse(&["read@a@b"], None),
			Err(RoleSpecError::MultipleSeparators { .. })
		));
		assert!(matches!(
			parse(&["read write@shop"], None),
			Err(RoleSpecError::ContainsWhitespace { .. })
		));
	}

	#[test]
	fn display_form_parses_back_to_the_same_set() {
		for input in ["readWrite", "read@shop, read@shop ,dbAdmin@admin", "a@x,b,c@y"] {
			let parsed = parse(&[input], Some("target")).expect("Fixture should parse.");
			let reparsed = RoleSet::from_str(&parsed.to_string())
				.expect("Serialized role set should parse.");

			assert_eq!(parsed, reparsed);
		}
	}

	#[test]
	fn serde_uses_role_at_database_strings() {
		let roles = parse(&["read@shop,dbAdmin@admin"], None).expect("Fixture should parse.");
		let json = serde_json::to_string(&roles).expect("Role set should serialize.");

		assert_eq!(json, "[\"read@shop\",\"dbAdmin@admin\"]");

		let back: RoleSet = serde_json::from_str(&json).expect("Role set should deserialize.");

		assert_eq!(back, roles);

		let binding = serde_json::to_value(&roles.as_slice()[0])
			.expect("Binding should serialize in Atlas field names.");

		assert_eq!(binding["roleName"], "read");
		assert_eq!(binding["databaseName"], "shop");
	}
}
