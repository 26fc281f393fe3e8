//! HTTP implementation of the remote service
//!
//! Maps each typed mutation onto one backend endpoint. HTTP status handling
//! and wire details are private to this module; callers only see
//! [`TransportError`].

use reqwest::{header, Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{AppliedRecord, DateRange, RemoteService, Result, TransportError};
use crate::mutation::RemoteMutation;

/// Remote service configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Backend base URL, without a trailing slash
    pub base_url: String,
    /// Bearer token attached to every request, if set
    pub bearer_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Create a configuration for a backend base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            bearer_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the bearer token
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One planned HTTP call for a mutation
struct Route {
    method: Method,
    path: String,
    body: Value,
    idempotency_key: Option<String>,
}

/// Translate a mutation into its endpoint, method, and body.
fn route(mutation: &RemoteMutation) -> Route {
    match mutation {
        RemoteMutation::SetShiftStatus(p) => Route {
            method: Method::PATCH,
            path: format!("/shifts/{}", p.shift_id),
            body: json!({ "status": p.status }),
            idempotency_key: None,
        },
        RemoteMutation::UpdateTrip(p) => {
            let mut body = Value::Object(p.fields.clone());
            body["status"] = Value::String(p.status.clone());
            Route {
                method: Method::PATCH,
                path: format!("/trips/{}", p.trip_id),
                body,
                idempotency_key: None,
            }
        }
        RemoteMutation::CheckInPassenger(p) => Route {
            method: Method::PATCH,
            path: format!("/trips/{}/manifest/{}", p.trip_id, p.manifest_entry_id),
            body: json!({ "checked_in": p.checked_in }),
            idempotency_key: None,
        },
        RemoteMutation::AppendTripLog(p) => Route {
            method: Method::POST,
            path: format!("/trips/{}/logs", p.trip_id),
            body: json!({ "message": p.message, "logged_at": p.logged_at }),
            idempotency_key: Some(p.idempotency_key.clone()),
        },
        RemoteMutation::CreateIssueReport(p) => Route {
            method: Method::POST,
            path: "/issues".to_string(),
            body: json!({
                "trip_id": p.trip_id,
                "category": p.category,
                "description": p.description,
                "photo_url": p.photo_url,
            }),
            idempotency_key: Some(p.idempotency_key.clone()),
        },
    }
}

/// Remote service over HTTP
pub struct HttpRemoteService {
    config: RemoteConfig,
    client: Client,
}

impl HttpRemoteService {
    /// Build a service from configuration
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send_json(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let raw = response.text().await?;
        serde_json::from_str(&raw).map_err(TransportError::Decode)
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn apply(&self, mutation: &RemoteMutation) -> Result<AppliedRecord> {
        let route = route(mutation);
        tracing::debug!(
            method = %route.method,
            path = %route.path,
            "applying mutation remotely"
        );

        let mut builder = self.request(route.method, &route.path).json(&route.body);
        if let Some(key) = &route.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let record = self.send_json(builder).await?;
        Ok(AppliedRecord { record })
    }

    async fn fetch_driver_profile(&self, driver_id: &str) -> Result<Value> {
        self.send_json(self.request(Method::GET, &format!("/drivers/{driver_id}")))
            .await
    }

    async fn fetch_shifts(&self, driver_id: &str, range: Option<&DateRange>) -> Result<Vec<Value>> {
        let mut builder = self.request(Method::GET, &format!("/drivers/{driver_id}/shifts"));
        if let Some(range) = range {
            builder = builder.query(&[("from", &range.from), ("to", &range.to)]);
        }
        expect_array(self.send_json(builder).await?)
    }

    async fn fetch_trips(&self, shift_id: &str) -> Result<Vec<Value>> {
        expect_array(
            self.send_json(self.request(Method::GET, &format!("/shifts/{shift_id}/trips")))
                .await?,
        )
    }

    async fn fetch_manifest(&self, trip_id: &str) -> Result<Vec<Value>> {
        expect_array(
            self.send_json(self.request(Method::GET, &format!("/trips/{trip_id}/manifest")))
                .await?,
        )
    }

    async fn upload_photo(&self, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let builder = self
            .request(Method::POST, "/uploads")
            .header(header::CONTENT_TYPE, content_type.to_string())
            .body(bytes);

        let response = self.send_json(builder).await?;
        response
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::Decode(serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "upload response missing `url`",
                )))
            })
    }
}

fn expect_array(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(TransportError::Decode(serde_json::Error::io(
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected a JSON array, got {other}"),
            ),
        ))),
    }
}
