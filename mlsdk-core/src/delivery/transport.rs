//! HTTP transport for the Mindlytics events API
//!
//! A [`Transport`] turns one request into one [`DeliveryOutcome`]. It never
//! returns an error: connection failures are retried with exponential backoff
//! until the time budget runs out, and anything still failing becomes an
//! errored outcome. HTTP error responses are not retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::logging::LogHandle;
use crate::types::DeliveryOutcome;

pub use reqwest::Method;

/// Path of the event ingestion endpoint
pub const EVENTS_PATH: &str = "/bc/v1/events/event";

/// Header carrying the project id
pub const APP_ID_HEADER: &str = "X-App-ID";

/// One call to the backend
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: &'a Method,
    /// Path appended to the server endpoint
    pub path: &'a str,
    /// Project id sent as `X-App-ID`
    pub app_id: &'a str,
    pub body: &'a serde_json::Value,
}

/// Sends requests and normalizes the result
///
/// Implementations are shared by every session of a client, so they must be
/// stateless from the caller's point of view.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request<'_>) -> DeliveryOutcome;
}

/// Exponential backoff bounded by a total time budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Stop retrying once the next wait would exceed this elapsed time
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            max_elapsed: config.max_retry_elapsed(),
        }
    }

    /// Delay to wait after `delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(delay * 2, self.max_backoff)
    }

    /// Whether waiting `delay` more still fits in the budget
    pub fn allows(&self, elapsed: Duration, delay: Duration) -> bool {
        elapsed + delay <= self.max_elapsed
    }
}

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    log: LogHandle,
}

impl HttpTransport {
    /// Create a transport from client configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ClientConfig, log: LogHandle) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = format!("Bearer {}", config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.endpoint(),
            timeout: config.timeout(),
            retry: RetryPolicy::from_config(config),
            log,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single attempt; `Err` means no HTTP response was received
    async fn send_once(
        &self,
        request: &Request<'_>,
    ) -> std::result::Result<DeliveryOutcome, reqwest::Error> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .header(APP_ID_HEADER, request.app_id);

        builder = if *request.method == Method::GET {
            builder.query(request.body)
        } else {
            builder.json(request.body)
        };

        let response = builder.send().await?;
        let status = response.status();

        if status != reqwest::StatusCode::OK {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Ok(DeliveryOutcome::http_error(status.as_u16(), &error_text));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str::<DeliveryOutcome>(&body)
            .unwrap_or_else(|_| DeliveryOutcome::success(body)))
    }

    async fn send_with_retry(&self, request: &Request<'_>) -> DeliveryOutcome {
        let started = Instant::now();
        let mut delay = self.retry.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.send_once(request).await {
                Ok(outcome) => {
                    if self.log.is_debug() {
                        tracing::debug!(
                            attempt,
                            status = outcome.status,
                            errored = outcome.errored,
                            "Request completed"
                        );
                    }
                    return outcome;
                }
                Err(e) if !is_retryable(&e) => {
                    tracing::warn!(error = %e, "Request could not be sent");
                    return DeliveryOutcome::request_failed(e);
                }
                Err(e) => {
                    if !self.retry.allows(started.elapsed(), delay) {
                        tracing::warn!(attempt, error = %e, "Giving up after retries");
                        return DeliveryOutcome::request_failed(e);
                    }
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "Transient error sending request, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                }
            }
        }
    }
}

/// Connection-level failures are worth retrying; malformed requests are not
fn is_retryable(error: &reqwest::Error) -> bool {
    !error.is_builder() && (error.is_connect() || error.is_timeout() || error.is_request())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request<'_>) -> DeliveryOutcome {
        if !matches!(
            *request.method,
            Method::GET | Method::POST | Method::PUT | Method::PATCH
        ) {
            return DeliveryOutcome::request_failed(format!(
                "unsupported HTTP method {}",
                request.method
            ));
        }

        let span = self.log.span().clone();
        let total = self.timeout;
        match tokio::time::timeout(total, self.send_with_retry(&request).instrument(span)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(path = request.path, "Request timed out after {:?}", total);
                DeliveryOutcome::request_failed(format!("timed out after {:?}", total))
            }
        }
    }
}
