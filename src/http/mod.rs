//! HTTP execution layer
//!
//! A reqwest-backed [`Fetcher`] for callers that dispatch plain GET requests.
//! The dispatcher itself does not depend on it.

use crate::config::UserAgentConfig;
use crate::dispatch::{FetchOutcome, Fetcher};
use crate::task::TaskDescriptor;
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use ripple_dispatch::config::UserAgentConfig;
/// use ripple_dispatch::http::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "RippleDispatch".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: Some("https://example.com/about".to_string()),
///     contact_email: Some("admin@example.com".to_string()),
///     request_timeout: 30.0,
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a descriptor's URL with a GET request
///
/// 2xx responses succeed; any other status is a failed outcome carrying the
/// status, so the rate limiter can see 429 and 503 answers. The body is
/// returned as a `String` payload.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &UserAgentConfig) -> Result<Self, crate::DispatchError> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }

    /// Reuses a client built elsewhere, such as one shared with the robots checker
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, descriptor: &TaskDescriptor) -> FetchOutcome {
        let response = match self.client.get(descriptor.url().clone()).send().await {
            Ok(response) => response,
            Err(e) => return FetchOutcome::failure(classify_error(&e)),
        };

        let status = response.status();
        let headers = lowercase_headers(&response);

        let mut outcome = if status.is_success() {
            FetchOutcome::success(status.as_u16())
        } else {
            FetchOutcome::status(status.as_u16(), format!("HTTP {}", status))
        };
        outcome.headers = headers;

        match response.text().await {
            Ok(body) => outcome.with_payload(Arc::new(body)),
            Err(e) => {
                outcome.success = false;
                outcome.error_message = format!("Failed to read body: {}", e);
                outcome
            }
        }
    }
}

fn lowercase_headers(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn classify_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        "Connection refused".to_string()
    } else if error.is_redirect() {
        "Too many redirects".to_string()
    } else {
        error.to_string()
    }
}
