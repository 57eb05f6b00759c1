//! Lists the databases of a real Atlas cluster through a temporary user that is provisioned,
//! probed until it authenticates, and deleted again before the program exits.
//!
//! Set `ATLAS_API_TOKEN`, `ATLAS_PROJECT_ID`, and `ATLAS_CLUSTER` before running.

// std
use std::{env, sync::Arc, time::Duration};
// crates.io
use color_eyre::{Result, eyre::WrapErr};
// self
use matlas_broker::{
	atlas::AtlasHttpClient,
	auth::{AtlasApiToken, ClusterName, OperationClass, ProjectId},
	broker::{Broker, BrokerRequest},
	config::{AtlasHttpConfig, BrokerConfig},
	context::OperationContext,
	mongodb::{Client, error::Error as DriverError},
	probe::DriverProbe,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let token = env::var("ATLAS_API_TOKEN").wrap_err("ATLAS_API_TOKEN must be set.")?;
	let project =
		ProjectId::new(env::var("ATLAS_PROJECT_ID").wrap_err("ATLAS_PROJECT_ID must be set.")?)?;
	let cluster =
		ClusterName::new(env::var("ATLAS_CLUSTER").wrap_err("ATLAS_CLUSTER must be set.")?)?;
	let atlas = AtlasHttpClient::new(AtlasHttpConfig::new(AtlasApiToken::new(token)))?;
	let broker = Broker::new(Arc::new(atlas), BrokerConfig::default().with_verbose(true))
		.with_probe(Arc::new(DriverProbe::new()));
	let ctx = OperationContext::with_timeout(Duration::from_secs(300));
	let request = BrokerRequest::new(project, cluster)
		.with_operation_class(OperationClass::SchemaRead)
		.with_probe(true);
	let databases = broker
		.with_ephemeral_credentials(&ctx, request, |granted| async move {
			println!("Connecting as {}.", granted.authenticated_uri);

			let client = Client::with_uri_str(granted.authenticated_uri.expose()).await?;
			let names = client.list_database_names().await;

			client.shutdown().await;

			Ok::<_, DriverError>(names?)
		})
		.await?;

	for name in databases {
		println!("- {name}");
	}

	Ok(())
}
