//! HTTP transport with access token storage, retries, and vendor response decoding
//!
//! Pandora Online reports failures through a mix of HTTP statuses and status
//! texts inside JSON bodies; [`decode_response`] folds both into [`PandoraError`].

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::config::PandoraClientConfig;
use crate::error::{PandoraError, Result};
use crate::model::conv::is_truthy;

/// Keys that may carry a human readable status, in lookup order
const STATUS_KEYS: [&str; 3] = ["error_text", "status", "action_result"];

/// HTTP client bound to a single Pandora Online host
pub struct PandoraHttpClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
    access_token: RwLock<Option<String>>,
}

impl PandoraHttpClient {
    /// Create a new HTTP client
    pub fn new(config: &PandoraClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            access_token: RwLock::new(config.access_token.clone()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build full URL for an API path
    pub(crate) fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Get the current access token
    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().clone()
    }

    /// Replace the access token
    pub fn set_access_token(&self, access_token: Option<String>) {
        *self.access_token.write() = access_token;
    }

    /// Current access token, or [`PandoraError::MissingAccessToken`]
    pub fn require_token(&self) -> Result<String> {
        self.access_token()
            .filter(|t| !t.is_empty())
            .ok_or(PandoraError::MissingAccessToken)
    }

    /// Make a GET request with query parameters
    pub async fn get<Q: Serialize + ?Sized>(&self, path: &str, query: &Q) -> Result<Value> {
        let response = self
            .send_with_retry(
                |client, url| async move { client.get(&url).query(query).send().await },
                path,
                true,
            )
            .await?;
        handle_json_response(response).await
    }

    /// Make a POST request with query parameters and form data
    pub async fn post_form<Q, F>(&self, path: &str, query: &Q, form: &F) -> Result<Value>
    where
        Q: Serialize + ?Sized,
        F: Serialize + ?Sized,
    {
        let response = self
            .send_with_retry(
                |client, url| async move {
                    client.post(&url).query(query).form(form).send().await
                },
                path,
                false,
            )
            .await?;
        handle_json_response(response).await
    }

    /// Make a bodiless POST request carrying an `Authorization` header
    pub async fn post_authorized(&self, path: &str, authorization: &str) -> Result<Value> {
        let response = self
            .send_with_retry(
                |client, url| async move {
                    client
                        .post(&url)
                        .header(reqwest::header::AUTHORIZATION, authorization)
                        .send()
                        .await
                },
                path,
                false,
            )
            .await?;
        handle_json_response(response).await
    }

    /// Make a POST request with form data and return status and raw body
    pub async fn post_form_raw<F: Serialize + ?Sized>(
        &self,
        path: &str,
        form: &F,
    ) -> Result<(StatusCode, String)> {
        let response = self
            .send_with_retry(
                |client, url| async move { client.post(&url).form(form).send().await },
                path,
                false,
            )
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Generic request with retry on connect errors.
    ///
    /// Timeouts are retried only for `idempotent` requests: a timed out POST
    /// may already have reached the device.
    async fn send_with_retry<F, Fut>(
        &self,
        request_fn: F,
        path: &str,
        idempotent: bool,
    ) -> Result<Response>
    where
        F: Fn(Client, String) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<Response, reqwest::Error>>,
    {
        let url = self.build_url(path);
        let mut attempt = 0;

        loop {
            debug!("Requesting {}", path);
            match request_fn(self.client.clone(), url.clone()).await {
                Ok(response) => return Ok(response),
                Err(e)
                    if (e.is_connect() || (idempotent && e.is_timeout()))
                        && attempt < self.max_retries =>
                {
                    attempt += 1;
                    warn!(
                        "Request to {} failed: {}, retrying ({}/{})",
                        path, e, attempt, self.max_retries
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    error!("Request to {} failed: {}", path, e);
                    return Err(e.into());
                }
            }
        }
    }
}

/// Read the response body and decode it
async fn handle_json_response(response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    decode_response(status, &body)
}

/// Extract the status text a vendor response carries, if any
pub fn status_text(data: &Value) -> Option<String> {
    STATUS_KEYS.iter().find_map(|key| match data.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(v) if is_truthy(v) && !v.is_string() => Some(v.to_string()),
        _ => None,
    })
}

/// Turn status and body into decoded JSON or the error they describe
pub fn decode_response(status: StatusCode, body: &str) -> Result<Value> {
    let parsed = serde_json::from_str::<Value>(body);
    let text = parsed.as_ref().ok().and_then(status_text);

    if (400..=403).contains(&status.as_u16()) {
        return Err(PandoraError::AuthFailed(
            text.unwrap_or_else(|| "unknown auth error".to_string()),
        ));
    }

    if status.is_client_error() || status.is_server_error() {
        return Err(match text {
            Some(text) => PandoraError::Api(text),
            None => PandoraError::RequestFailed {
                status: status.as_u16(),
                body: body.to_string(),
            },
        });
    }

    parsed.map_err(|_| PandoraError::MalformedResponse("bad JSON encoding".to_string()))
}

/// Require a JSON object
pub fn expect_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(PandoraError::MalformedResponse(
            "response is not a mapping".to_string(),
        )),
    }
}

/// Require a JSON array
pub fn expect_array(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(PandoraError::MalformedResponse(
            "response is not a list".to_string(),
        )),
    }
}
