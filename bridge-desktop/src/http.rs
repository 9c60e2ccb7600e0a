//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("notesync/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - Retry with exponential backoff on 429, 5xx and transport failures,
///   honoring `Retry-After`
/// - TLS via rustls
///
/// `execute` only retries idempotent methods; a `POST` or `PATCH` is sent
/// once unless the caller passes a policy to `execute_with_retry`.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// Policy used by `execute` for a method.
    fn default_policy(method: HttpMethod) -> RetryPolicy {
        if method.is_idempotent() {
            RetryPolicy::default()
        } else {
            RetryPolicy::no_retry()
        }
    }

    /// Wait before the next attempt. A server-sent `Retry-After` wins over
    /// the policy's backoff but never exceeds `max_delay`.
    fn retry_delay(
        policy: &RetryPolicy,
        attempt: u32,
        response: Option<&HttpResponse>,
    ) -> Duration {
        response
            .and_then(HttpResponse::retry_after)
            .map(|delay| delay.min(policy.max_delay))
            .unwrap_or_else(|| policy.delay_for(attempt))
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    /// Execute request with retry logic
    ///
    /// When retries run out on a retryable status, the last response is
    /// returned so the caller can read the error body.
    async fn execute_with_retry_internal(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last_attempt = attempt >= max_attempts;
            debug!(
                attempt,
                max_attempts,
                method = ?request.method,
                url = %request.url,
                "Sending request"
            );

            let delay = match self.build_request(request.clone()).send().await {
                Ok(response) => {
                    let response = Self::into_response(response).await?;
                    if !response.is_retryable() || last_attempt {
                        return Ok(response);
                    }
                    warn!(status = response.status, attempt, "Retryable status");
                    Self::retry_delay(&policy, attempt, Some(&response))
                }
                Err(e) if last_attempt => {
                    warn!(error = %e, attempt, "Giving up on request");
                    return Err(BridgeError::Transport(Self::describe(&e)));
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Request failed");
                    Self::retry_delay(&policy, attempt, None)
                }
            };

            debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
            sleep(delay).await;
        }
    }

    fn describe(error: &reqwest::Error) -> String {
        if error.is_timeout() {
            "Request timed out".to_string()
        } else if error.is_connect() {
            format!("Connection failed: {}", error)
        } else {
            error.to_string()
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let policy = Self::default_policy(request.method);
        self.execute_with_retry(request, policy).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        self.execute_with_retry_internal(request, policy).await
    }
}
