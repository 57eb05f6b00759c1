//! Atlas Admin API v2 adapter over reqwest.

// crates.io
use reqwest::{
	RequestBuilder, Response, StatusCode,
	header::{ACCEPT, HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use time::format_description::well_known::{Rfc2822, Rfc3339};
// self
use crate::{
	_prelude::*,
	atlas::{AtlasControlPlane, AtlasError, AtlasFuture, TransportError},
	auth::{ADMIN_DATABASE, DatabaseUserPassword, ProjectId, RoleBinding, RoleSet},
	config::AtlasHttpConfig,
	context::OperationContext,
	error::ConfigError,
};

const CODE_USER_ALREADY_EXISTS: &str = "USER_ALREADY_EXISTS";
const CODE_USERNAME_NOT_FOUND: &str = "USERNAME_NOT_FOUND";
const CODE_CLUSTER_NOT_FOUND: &str = "CLUSTER_NOT_FOUND";

/// [`AtlasControlPlane`] backed by the Atlas Admin API v2.
///
/// Requests carry the configured bearer token and versioned `Accept` header. Transport
/// failures, HTTP 429, and 5xx responses are retried with exponential backoff that honors
/// `Retry-After`, up to [`AtlasHttpConfig::max_attempts`] attempts.
#[derive(Clone, Debug)]
pub struct AtlasHttpClient {
	http: ReqwestClient,
	base_url: Url,
	config: AtlasHttpConfig,
}
impl AtlasHttpClient {
	/// Builds a client with redirects disabled and the configured request timeout.
	pub fn new(config: AtlasHttpConfig) -> Result<Self, ConfigError> {
		let http = ReqwestClient::builder()
			.redirect(Policy::none())
			.timeout(config.request_timeout)
			.build()?;

		Self::with_client(http, config)
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(http: ReqwestClient, config: AtlasHttpConfig) -> Result<Self, ConfigError> {
		let base_url = config.parsed_base_url()?;

		Ok(Self { http, base_url, config })
	}

	fn endpoint(&self, segments: &[&str]) -> Url {
		let mut url = self.base_url.clone();

		// `parsed_base_url` rejects cannot-be-a-base URLs.
		if let Ok(mut path) = url.path_segments_mut() {
			path.pop_if_empty().extend(segments);
		}

		url
	}

	async fn send<F>(
		&self,
		ctx: &OperationContext,
		operation: &'static str,
		build: F,
	) -> Result<Response, AtlasError>
	where
		F: Fn() -> RequestBuilder,
	{
		self.send_counted(ctx, operation, build).await.0
	}

	// Also reports how many attempts were made; every attempt after the first follows a
	// retryable failure that Atlas may have applied anyway.
	async fn send_counted<F>(
		&self,
		ctx: &OperationContext,
		operation: &'static str,
		build: F,
	) -> (Result<Response, AtlasError>, u32)
	where
		F: Fn() -> RequestBuilder,
	{
		let mut attempt = 1;
		let mut backoff = self.config.initial_backoff;

		loop {
			let request = build()
				.bearer_auth(self.config.token.expose())
				.header(ACCEPT, self.config.accept.as_str());
			let Some(outcome) = ctx.run(request.send()).await else {
				return (Err(AtlasError::Cancelled), attempt);
			};
			let err = match outcome {
				Ok(response) if response.status().is_success() => return (Ok(response), attempt),
				Ok(response) => api_error(response).await,
				Err(e) => TransportError::from(e).into(),
			};

			if !err.is_retryable() || attempt >= self.config.max_attempts {
				return (Err(err), attempt);
			}

			let retry_after = match &err {
				AtlasError::Api { retry_after, .. } => *retry_after,
				_ => None,
			};
			let delay = retry_after.unwrap_or(backoff).min(self.config.max_backoff);

			#[cfg(feature = "tracing")]
			tracing::debug!(operation, attempt, ?delay, error = %err, "Retrying Atlas call.");
			#[cfg(not(feature = "tracing"))]
			let _ = operation;

			if !ctx.sleep(delay).await {
				return (Err(AtlasError::Cancelled), attempt);
			}

			attempt += 1;
			backoff = backoff.saturating_mul(2).min(self.config.max_backoff);
		}
	}
}
impl AtlasControlPlane for AtlasHttpClient {
	fn create_database_user<'a>(
		&'a self,
		ctx: &'a OperationContext,
		project: &'a ProjectId,
		username: &'a str,
		password: &'a DatabaseUserPassword,
		roles: &'a RoleSet,
		ttl: Duration,
	) -> AtlasFuture<'a, ()> {
		Box::pin(async move {
			let delete_after_date = (OffsetDateTime::now_utc() + ttl)
				.format(&Rfc3339)
				.map_err(|e| AtlasError::Encode { message: e.to_string() })?;
			let body = CreateDatabaseUser {
				database_name: ADMIN_DATABASE,
				group_id: project,
				username,
				password: password.expose(),
				roles: roles.iter().collect(),
				delete_after_date,
			};
			let url = self.endpoint(&["groups", project, "databaseUsers"]);

			let (outcome, attempts) = self
				.send_counted(ctx, "create_database_user", || self.http.post(url.clone()).json(&body))
				.await;

			match outcome {
				Ok(_) => Ok(()),
				// A retried create that conflicts has met its own earlier attempt.
				Err(AtlasError::UserAlreadyExists) if attempts > 1 => Ok(()),
				Err(e) => Err(e),
			}
		})
	}

	fn delete_database_user<'a>(
		&'a self,
		ctx: &'a OperationContext,
		project: &'a ProjectId,
		username: &'a str,
	) -> AtlasFuture<'a, ()> {
		Box::pin(async move {
			let url =
				self.endpoint(&["groups", project, "databaseUsers", ADMIN_DATABASE, username]);

			match self.send(ctx, "delete_database_user", || self.http.delete(url.clone())).await {
				Ok(_) | Err(AtlasError::NotFound { .. }) => Ok(()),
				Err(e) => Err(e),
			}
		})
	}

	fn get_cluster_srv_uri<'a>(
		&'a self,
		ctx: &'a OperationContext,
		project: &'a ProjectId,
		cluster: &'a str,
	) -> AtlasFuture<'a, String> {
		Box::pin(async move {
			let url = self.endpoint(&["groups", project, "clusters", cluster]);
			let response =
				self.send(ctx, "get_cluster_srv_uri", || self.http.get(url.clone())).await?;
			let status = response.status().as_u16();
			let bytes = response.bytes().await.map_err(TransportError::from)?;
			let description: ClusterDescription = parse_json(&bytes, Some(status))?;

			description
				.connection_strings
				.and_then(|strings| strings.standard_srv)
				.filter(|srv| !srv.trim().is_empty())
				.ok_or_else(|| AtlasError::ClusterHasNoPublicEndpoint {
					cluster: cluster.to_owned(),
				})
		})
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateDatabaseUser<'a> {
	database_name: &'a str,
	group_id: &'a str,
	username: &'a str,
	password: &'a str,
	roles: Vec<&'a RoleBinding>,
	delete_after_date: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterDescription {
	connection_strings: Option<ConnectionStrings>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionStrings {
	standard_srv: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
	error_code: Option<String>,
	detail: Option<String>,
	reason: Option<String>,
}

fn parse_json<T>(bytes: &[u8], status: Option<u16>) -> Result<T, AtlasError>
where
	T: for<'de> Deserialize<'de>,
{
	let mut de = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut de)
		.map_err(|source| AtlasError::Parse { status, source: Arc::new(source) })
}

async fn api_error(response: Response) -> AtlasError {
	let status = response.status();
	let retry_after = parse_retry_after(response.headers());
	let body = match response.bytes().await {
		Ok(bytes) => parse_json::<ApiErrorBody>(&bytes, Some(status.as_u16())).unwrap_or_else(|_| {
			ApiErrorBody {
				detail: Some(String::from_utf8_lossy(&bytes).trim().to_owned())
					.filter(|text| !text.is_empty()),
				..Default::default()
			}
		}),
		Err(e) => return TransportError::from(e).into(),
	};

	classify(status, body, retry_after)
}

fn classify(status: StatusCode, body: ApiErrorBody, retry_after: Option<Duration>) -> AtlasError {
	let detail = body
		.detail
		.or(body.reason)
		.or_else(|| status.canonical_reason().map(str::to_owned))
		.unwrap_or_default();

	match body.error_code.as_deref() {
		Some(CODE_USER_ALREADY_EXISTS) => AtlasError::UserAlreadyExists,
		_ if status == StatusCode::CONFLICT => AtlasError::UserAlreadyExists,
		Some(code @ (CODE_USERNAME_NOT_FOUND | CODE_CLUSTER_NOT_FOUND)) =>
			AtlasError::NotFound { code: code.to_owned(), detail },
		_ if status == StatusCode::NOT_FOUND => AtlasError::NotFound {
			code: body.error_code.unwrap_or_else(|| "NOT_FOUND".into()),
			detail,
		},
		_ => AtlasError::Api { status: status.as_u16(), code: body.error_code, detail, retry_after },
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return delta.try_into().ok();
		}
	}

	None
}
