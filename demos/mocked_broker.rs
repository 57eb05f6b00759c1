//! Walks the broker lifecycle against the in-memory Atlas and probe mocks: the first probe is
//! rejected while the user propagates, the second succeeds, and the user is deleted after the
//! operation returns.

// std
use std::{io, time::Duration};
// crates.io
use color_eyre::Result;
// self
use matlas_broker::{
	_preludet::{MockAtlas, MockProbe, build_mock_broker},
	auth::{ClusterName, ProjectId},
	broker::BrokerRequest,
	config::{BrokerConfig, PropagationPolicy},
	context::OperationContext,
	probe::ProbeOutcome,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let atlas = MockAtlas::with_srv("mongodb+srv://cluster0.ab12c.mongodb.net");
	let probe =
		MockProbe::scripted([ProbeOutcome::AuthenticationRejected], ProbeOutcome::Succeeded);
	let policy =
		PropagationPolicy { initial_backoff: Duration::from_millis(50), ..Default::default() };
	let config = BrokerConfig::default().with_propagation(policy);
	let broker = build_mock_broker(&atlas, &probe, config);
	let project = ProjectId::new("5f1d2c3b4a5e6f7081920a1b")?;
	let request = BrokerRequest::new(project, ClusterName::new("Cluster0")?)
		.with_target_database("sales")
		.with_roles(["read", "readWrite@reports"])
		.with_probe(true);
	let ctx = OperationContext::with_timeout(Duration::from_secs(30));
	let username = broker
		.with_ephemeral_credentials(&ctx, request, |granted| async move {
			println!("Operation sees {}.", granted.authenticated_uri);
			println!("Granted roles: {}.", granted.temp_user.roles);

			Ok::<_, io::Error>(granted.temp_user.username.clone())
		})
		.await?;

	println!("Probed {} times before the operation ran.", probe.calls());
	println!("Created {} user(s), deleted {:?}.", atlas.creates().len(), atlas.deletes());

	assert_eq!(atlas.deletes(), vec![username]);

	Ok(())
}
