//! HTTP transport for fetching source pages.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::{HTTP_TIMEOUT_SECS, MAX_RETRIES, RETRY_BASE_DELAY_MS, USER_AGENT};
use crate::error::{HarvesterError, Result};

/// Fetches the raw body of a URL.
///
/// The harvester only depends on this trait, so runs can be driven from
/// fixtures in tests.
pub trait Fetcher {
    /// Fetch the body of `url`.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Create a configured HTTP client.
///
/// # Arguments
/// * `timeout_secs` - Request timeout
///
/// # Returns
/// A `reqwest::blocking::Client` configured with the timeout and user agent.
pub fn create_client(timeout_secs: u64) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Blocking HTTP fetcher with retry on transient failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry_base_delay: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT_SECS)
    }

    /// Create a fetcher with a custom timeout in seconds.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: create_client(timeout_secs)?,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        })
    }

    /// Override the backoff base delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

impl Fetcher for HttpFetcher {
    /// Download a URL, retrying connection errors, timeouts and 5xx responses
    /// with exponential backoff.
    ///
    /// A non-2xx status is not an error: the body is returned and parsing
    /// decides whether it is usable. When every attempt got a 5xx response,
    /// the last body is returned.
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_error: Option<String> = None;
        let mut last_body: Option<Vec<u8>> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 500ms, 1000ms, 2000ms
                let delay = self.retry_base_delay * (1 << (attempt - 1));
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after delay");
                thread::sleep(delay);
            }

            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status();

                    if status.is_server_error() {
                        tracing::warn!(
                            url,
                            status = %status,
                            attempt = attempt + 1,
                            max_retries = MAX_RETRIES,
                            "Server error, will retry"
                        );
                        last_error = Some(format!("Server error: {status}"));
                        last_body = Some(
                            response
                                .bytes()
                                .map_err(|source| HarvesterError::Fetch {
                                    url: url.to_string(),
                                    source,
                                })?
                                .to_vec(),
                        );
                        continue;
                    }

                    if !status.is_success() {
                        tracing::warn!(url, status = %status, "Unexpected status, parsing body anyway");
                    }

                    let bytes = response.bytes().map_err(|source| HarvesterError::Fetch {
                        url: url.to_string(),
                        source,
                    })?;
                    return Ok(bytes.to_vec());
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!(
                            url,
                            error = %e,
                            attempt = attempt + 1,
                            max_retries = MAX_RETRIES,
                            "Connection error, will retry"
                        );
                        last_error = Some(e.to_string());
                        continue;
                    }
                    return Err(HarvesterError::Fetch {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }
        }

        if let Some(body) = last_body {
            tracing::warn!(url, "Server kept failing, using last response body");
            return Ok(body);
        }

        Err(HarvesterError::RetriesExhausted {
            attempts: MAX_RETRIES,
            message: last_error.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Decode a response body as text.
///
/// Invalid UTF-8 sequences are replaced rather than rejected; the payload
/// parsers report anything that is really broken.
#[must_use]
pub fn bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client() {
        let client = create_client(HTTP_TIMEOUT_SECS);
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_url_is_not_retried() {
        let fetcher = HttpFetcher::new().unwrap().with_retry_delay(Duration::ZERO);
        let result = fetcher.fetch("not a url");
        assert!(matches!(result, Err(HarvesterError::Fetch { .. })));
    }

    #[test]
    fn test_bytes_to_string_lossy() {
        assert_eq!(bytes_to_string(b"{\"a\":1}"), "{\"a\":1}");
        assert_eq!(bytes_to_string(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }
}
