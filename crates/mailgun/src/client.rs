//! Mailgun client configuration

use std::time::Duration;

use mailbridge_shared::{StoreError, StoreResult};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

/// Mailgun v3 API endpoint (US region)
pub const DEFAULT_API_BASE: &str = "https://api.mailgun.net/v3";

/// Deadline applied to every provider request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the Mailgun API
#[derive(Debug, Clone)]
pub struct MailgunConfig {
    /// Sending domain the routes and credentials belong to
    pub domain: String,
    /// Private API key
    pub private_key: String,
    /// API base URL, e.g. the EU endpoint or a test server
    pub api_base: String,
    pub request_timeout: Duration,
}

impl MailgunConfig {
    pub fn new(domain: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            private_key: private_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Error body returned by Mailgun on non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Mailgun API client
#[derive(Clone)]
pub struct MailgunClient {
    client: Client,
    config: MailgunConfig,
}

impl MailgunClient {
    /// Create a new Mailgun client from config
    pub fn new(config: MailgunConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Sending domain of this client
    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// Get the config
    pub fn config(&self) -> &MailgunConfig {
        &self.config
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base, path.trim_start_matches('/'))
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    pub(crate) fn put(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.put(self.url(path)))
    }

    pub(crate) fn delete(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.delete(self.url(path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth("api", Some(&self.config.private_key))
    }

    /// Send a request, turning transport failures and non-2xx statuses into errors
    pub(crate) async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);

        tracing::error!(status = %status, message = %message, "Mailgun API returned error status");

        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Transport(err.to_string())
    }
}
