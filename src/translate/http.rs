//! Shared HTTP plumbing for provider adapters: pooled client, request pacing,
//! retry on 429 / 5xx / timeout.

use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::TranslateError;

const MAX_429_RETRIES: u32 = 3;
const MAX_5XX_RETRIES: u32 = 2;

pub(crate) struct HttpClient {
    http: reqwest::Client,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: tokio::sync::Mutex<Instant>,
    min_interval: Duration,
    /// Upper bound on any single backoff, including server-sent Retry-After.
    max_wait: Duration,
}

impl HttpClient {
    pub(crate) fn new(timeout: Duration, min_interval: Duration) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            next_allowed: tokio::sync::Mutex::new(Instant::now()),
            min_interval,
            max_wait: timeout,
        })
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.http
    }

    /// Wait until the pacing window allows another request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Send the request built by `build`, retrying, and decode a JSON body.
    pub(crate) async fn send_json<T, F>(&self, build: F) -> Result<T, TranslateError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(build).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TranslateError::ApiError(format!("malformed response: {e}")))
    }

    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, TranslateError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt: u32 = 0;
        let mut timeout_retried = false;

        loop {
            self.rate_limit_wait().await;

            match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let retry_after = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .map(Duration::from_secs);
                    if attempt >= MAX_429_RETRIES {
                        return Err(TranslateError::RateLimited {
                            retry_after_ms: retry_after.map(|d| d.as_millis() as u64).unwrap_or(0),
                        });
                    }
                    let wait = rate_limit_delay(retry_after, attempt, self.max_wait);
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= MAX_5XX_RETRIES {
                        return Err(TranslateError::ApiError(format!(
                            "server error: {}",
                            resp.status()
                        )));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(TranslateError::ApiError(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(TranslateError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(TranslateError::ApiError(e.to_string())),
            }
        }
    }
}

/// Retry-After when given, else 1s/2s/4s; never longer than `cap`.
fn rate_limit_delay(retry_after: Option<Duration>, attempt: u32, cap: Duration) -> Duration {
    retry_after
        .unwrap_or_else(|| Duration::from_secs(1 << attempt))
        .min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_without_retry_after() {
        let cap = Duration::from_secs(60);
        assert_eq!(rate_limit_delay(None, 0, cap), Duration::from_secs(1));
        assert_eq!(rate_limit_delay(None, 2, cap), Duration::from_secs(4));
    }

    #[test]
    fn retry_after_is_capped() {
        let cap = Duration::from_secs(60);
        assert_eq!(
            rate_limit_delay(Some(Duration::from_secs(5)), 0, cap),
            Duration::from_secs(5)
        );
        assert_eq!(rate_limit_delay(Some(Duration::from_secs(3600)), 0, cap), cap);
    }
}
