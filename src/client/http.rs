//! Authenticated HTTP transport with retry policy.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode, header::HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    auth::Credentials,
    error::{Error, Result, TransportError},
};

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between retries.
const BASE_DELAY: Duration = Duration::from_millis(100);

/// Cap on the backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// HTTP client that signs every request and retries transient failures.
///
/// Retry policy: timeouts, network errors, 429 and 5xx responses retry with
/// exponential backoff (`BASE_DELAY * 2^attempt`, capped). 401 surfaces
/// immediately as `AuthFailed`; other 4xx surface immediately.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_prefix: String,
    credentials: Credentials,
    timeout: Duration,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(
        credentials: Credentials,
        base_url: impl Into<String>,
        api_prefix: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Transport(TransportError::Network(e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_prefix: api_prefix.into(),
            credentials,
            timeout: REQUEST_TIMEOUT,
            max_retries: MAX_RETRIES,
        })
    }

    /// Build auth headers for one attempt. The timestamp is part of the
    /// signed message, so headers are regenerated per attempt.
    fn auth_headers(&self, method: &Method, path: &str) -> Result<HeaderMap> {
        let timestamp_ms = Credentials::timestamp_ms();

        let path_without_query = path.split('?').next().unwrap_or(path);
        let sign_path = format!("{}{}", self.api_prefix, path_without_query);

        let signature = self
            .credentials
            .sign(timestamp_ms, method.as_str(), &sign_path)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "KALSHI-ACCESS-KEY",
            self.credentials
                .access_key()
                .parse()
                .map_err(|e| Error::InvalidHeaderValue(format!("access_key: {}", e)))?,
        );
        headers.insert(
            "KALSHI-ACCESS-TIMESTAMP",
            timestamp_ms
                .to_string()
                .parse()
                .map_err(|e| Error::InvalidHeaderValue(format!("timestamp: {}", e)))?,
        );
        headers.insert(
            "KALSHI-ACCESS-SIGNATURE",
            signature
                .parse()
                .map_err(|e| Error::InvalidHeaderValue(format!("signature: {}", e)))?,
        );

        Ok(headers)
    }

    fn delay_for_attempt(attempt: u32) -> Duration {
        let delay = BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(MAX_DELAY)
    }

    /// Execute one request with the retry policy, returning the response body.
    async fn execute(&self, method: Method, path: &str, body: Option<&JsonValue>) -> Result<String> {
        let url = format!("{}{}{}", self.base_url, self.api_prefix, path);
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Self::delay_for_attempt(attempt - 1);
                debug!(target: "state", attempt, delay_ms = delay.as_millis() as u64, %url, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let headers = self.auth_headers(&method, path)?;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(headers)
                .timeout(self.timeout);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    warn!(target: "state", %url, "request timed out");
                    last_err = Some(Error::Transport(TransportError::TimedOut));
                    continue;
                }
                Err(e) => {
                    warn!(target: "state", %url, error = %e, "network error");
                    last_err = Some(Error::Transport(TransportError::Network(e)));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .text()
                    .await
                    .map_err(|e| Error::Transport(TransportError::Network(e)));
            }

            match status {
                StatusCode::UNAUTHORIZED => {
                    return Err(Error::Transport(TransportError::AuthFailed));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    warn!(target: "state", %url, "rate limited");
                    last_err = Some(Error::Transport(TransportError::RateLimited));
                    continue;
                }
                s if s.is_server_error() => {
                    let body = response.text().await.unwrap_or_default();
                    warn!(target: "state", %url, status = s.as_u16(), "server error");
                    last_err = Some(Error::Transport(TransportError::HttpStatus {
                        status: s.as_u16(),
                        body,
                    }));
                    continue;
                }
                s => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Transport(TransportError::HttpStatus {
                        status: s.as_u16(),
                        body,
                    }));
                }
            }
        }

        Err(last_err.unwrap_or(Error::Transport(TransportError::TimedOut)))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<T> {
        let text = self.execute(method, path, body).await?;
        serde_json::from_str(&text).map_err(Error::Json)
    }

    /// GET a path and deserialize the response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute_json(Method::GET, path, None).await
    }

    /// POST a JSON body and deserialize the response.
    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &JsonValue) -> Result<T> {
        self.execute_json(Method::POST, path, Some(body)).await
    }

    /// DELETE with a JSON body and deserialize the response.
    pub async fn delete_with_body<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &JsonValue,
    ) -> Result<T> {
        self.execute_json(Method::DELETE, path, Some(body)).await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(HttpClient::delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(HttpClient::delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(HttpClient::delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(HttpClient::delay_for_attempt(10), MAX_DELAY);
    }

    #[test]
    fn test_auth_headers_present() {
        let credentials =
            Credentials::new("key-id", crate::auth::tests::TEST_PRIVATE_KEY_PEM).unwrap();
        let client =
            HttpClient::new(credentials, "https://example.com", "/trade-api/v2").unwrap();
        let headers = client
            .auth_headers(&Method::GET, "/portfolio/balance?limit=1")
            .unwrap();
        assert!(headers.contains_key("KALSHI-ACCESS-KEY"));
        assert!(headers.contains_key("KALSHI-ACCESS-SIGNATURE"));
        assert!(headers.contains_key("KALSHI-ACCESS-TIMESTAMP"));
    }
}
