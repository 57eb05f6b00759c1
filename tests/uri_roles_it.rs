// self
use matlas_broker::{
	auth::{DatabaseUserPassword, OperationClass, RoleSet, RoleSpecError, generate_username},
	uri::{self, ConnectionSpec, MASK_TOKEN, REDACTED},
};

#[test]
fn role_lists_scope_to_target_database_and_round_trip() {
	let roles = RoleSet::parse(
		[" read ", "readWrite@sales, read", "", "dbAdmin@ops"],
		Some("inventory"),
		OperationClass::SchemaRead,
	)
	.expect("Mixed role list should parse.");

	assert_eq!(roles.len(), 3);
	assert!(roles.contains("read", "inventory"));
	assert!(roles.contains("readWrite", "sales"));
	assert!(roles.contains("dbAdmin", "ops"));
	assert_eq!(roles.to_string(), "read@inventory,readWrite@sales,dbAdmin@ops");

	let reparsed = roles.to_string().parse::<RoleSet>().expect("Display form should parse back.");

	assert_eq!(reparsed, roles);
}

#[test]
fn empty_role_requests_fall_back_to_operation_class_defaults() {
	let schema = RoleSet::parse(Vec::<String>::new(), None, OperationClass::SchemaRead)
		.expect("Empty request should use the schema-read default.");
	let management = RoleSet::parse(["  "], Some("shop"), OperationClass::RoleManagement)
		.expect("Blank request should use the role-management default.");

	assert!(schema.contains("readWriteAnyDatabase", "admin"));
	assert!(!schema.is_empty());
	assert!(management.contains("atlasAdmin", "admin"));
	assert_eq!(management.len(), 1);
}

#[test]
fn malformed_role_specs_are_rejected() {
	assert!(matches!(
		RoleSet::parse(["@sales"], None, OperationClass::SchemaRead),
		Err(RoleSpecError::EmptyRole { .. })
	));
	assert!(matches!(
		RoleSet::parse(["read@"], None, OperationClass::SchemaRead),
		Err(RoleSpecError::EmptyDatabase { .. })
	));
	assert!(matches!(
		RoleSet::parse(["read@a@b"], None, OperationClass::SchemaRead),
		Err(RoleSpecError::MultipleSeparators { .. })
	));
	assert!(matches!(
		RoleSet::parse(["read write@sales"], None, OperationClass::SchemaRead),
		Err(RoleSpecError::ContainsWhitespace { .. })
	));
}

#[test]
fn generated_credentials_survive_rewrite_and_masking() {
	let username = generate_username();
	let password = DatabaseUserPassword::generate();
	let spec = ConnectionSpec::parse("mongodb+srv://cluster0.ab12c.mongodb.net")
		.expect("Atlas SRV string should parse.")
		.with_database("sales")
		.expect("Database name should be accepted.")
		.with_param("retryWrites", "true");
	let authenticated =
		uri::rewrite(&spec, &username, &password).expect("Generated credentials should rewrite.");

	assert!(authenticated.expose().contains(&format!("{username}:{}@", password.expose())));
	assert!(authenticated.expose().ends_with("/sales?authSource=admin&retryWrites=true"));
	assert!(!authenticated.masked().contains(password.expose()));
	assert!(authenticated.masked().contains(&format!("{username}:{MASK_TOKEN}@")));
	assert_eq!(uri::mask_uri(authenticated.masked()), authenticated.masked());
	assert_eq!(uri::mask_uri(authenticated.expose()), authenticated.masked());
	assert_eq!(uri::mask_uri("::not a uri::"), REDACTED);
}

#[test]
fn invalid_database_names_are_rejected() {
	let spec = ConnectionSpec::parse("mongodb+srv://cluster0.ab12c.mongodb.net")
		.expect("Atlas SRV string should parse.");

	assert!(spec.clone().with_database("bad/name").is_err());
	assert!(spec.clone().with_database("bad.name").is_err());
	assert_eq!(
		spec.with_database("  ").expect("Blank database should be ignored.").database(),
		None
	);
}
