//! REST client for the admin backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde_json::{Value, json};
use storeops_api_types::{ApiEnvelope, ApiErrorBody};
use tracing::debug;

use crate::application::error::FetchError;
use crate::application::fetch::Fetcher;
use crate::application::mutations::Mutator;
use crate::domain::{FetchRequest, MutationAction, MutationRequest};

use super::error::InfraError;
use super::sse::HttpEventSource;

#[derive(Clone, Debug)]
pub struct HttpApiClient {
    client: Client,
    base: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpApiClient {
    pub fn new(base: &str, token: Option<String>, timeout: Duration) -> Result<Self, InfraError> {
        let base = Url::parse(base)?.join("/")?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            token,
            timeout,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("storeops/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.base
            .join(path)
            .map_err(|err| FetchError::unknown(format!("invalid endpoint `{path}`: {err}")))
    }

    /// Event stream at `path`, sharing this client's connection pool and
    /// credentials. Streams are long-lived, so no request timeout applies.
    pub fn event_source(&self, path: &str) -> Result<HttpEventSource, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .build()?;
        Ok(HttpEventSource::new(
            client,
            self.base.join(path)?,
            self.token.clone(),
        ))
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value, FetchError> {
        debug!(method = %method, url = %url, "Admin API request");
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        self.handle(response).await
    }

    fn transport_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                elapsed_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            FetchError::network(err.to_string())
        }
    }

    /// Unwrap the `{ success, data, pagination }` envelope.
    ///
    /// Paginated lists come back as `{ "items": [...], "pagination": {...} }`
    /// so the page metadata stays with the cached value.
    async fn handle(&self, response: Response) -> Result<Value, FetchError> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<ApiErrorBody>(&bytes)
                .ok()
                .and_then(|body| body.detail().map(str::to_string))
                .unwrap_or_else(|| status_text(status));
            return Err(FetchError::from_status(status.as_u16(), detail));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        let envelope: ApiEnvelope<Value> =
            serde_json::from_slice(&bytes).map_err(|err| FetchError::Unknown {
                status: Some(status.as_u16()),
                detail: format!("malformed response body: {err}"),
            })?;
        if !envelope.success {
            return Err(FetchError::Unknown {
                status: Some(status.as_u16()),
                detail: envelope
                    .message
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            });
        }

        let data = envelope.data.unwrap_or(Value::Null);
        Ok(match envelope.pagination {
            Some(pagination) => json!({ "items": data, "pagination": pagination }),
            None => data,
        })
    }
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_str().to_string(), str::to_string)
}

#[async_trait]
impl Fetcher for HttpApiClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        let mut url = self.url(&request.endpoint()?)?;
        if !request.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in request.params.iter() {
                pairs.append_pair(key, value);
            }
        }
        self.send(Method::GET, url, None).await
    }
}

#[async_trait]
impl Mutator for HttpApiClient {
    async fn mutate(&self, request: &MutationRequest) -> Result<Value, FetchError> {
        let url = self.url(&request.endpoint()?)?;
        let method = match request.action {
            MutationAction::Create => Method::POST,
            MutationAction::Update => Method::PUT,
            MutationAction::Delete => Method::DELETE,
        };
        self.send(method, url, request.payload.as_ref()).await
    }
}
