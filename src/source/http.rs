//! Shared HTTP construction and request policy for source clients.
//!
//! Centralizes networking defaults so every source stays consistent on
//! timeout, user-agent, compression, redirect bounds, and the
//! one-retry-on-transient rule.

use std::time::Duration;

use rand::Rng;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

use super::rate_limit::{RateLimiter, parse_retry_after};
use super::{SourceError, SourceResult};

/// Redirect hop bound shared by all source transports.
const MAX_REDIRECTS: usize = 5;

/// Keep-alive window for pooled connections.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum pooled connections per host.
const MAX_CONNECTIONS_PER_HOST: usize = 32;

/// Builds the shared source user-agent string.
///
/// One UA for every source so traffic is not fingerprintable per client;
/// the contact email satisfies the polite-pool conventions of Crossref,
/// OpenAlex, and Unpaywall.
#[must_use]
pub fn source_user_agent(contact_email: &str) -> String {
    format!(
        "geolit/{} (research-tool; mailto:{contact_email})",
        env!("CARGO_PKG_VERSION")
    )
}

/// Builds a source HTTP client using the shared project policy.
///
/// # Errors
///
/// Returns [`SourceError::Transient`] when client construction fails.
pub fn build_source_http_client(
    contact_email: &str,
    request_timeout: Duration,
) -> Result<Client, SourceError> {
    Client::builder()
        .user_agent(source_user_agent(contact_email))
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(MAX_CONNECTIONS_PER_HOST)
        .gzip(true)
        .build()
        .map_err(|e| SourceError::Transient(format!("HTTP client construction failed: {e}")))
}

/// Builds a source client, panicking only on programmer error.
///
/// # Panics
///
/// Panics if the HTTP client builder fails with the static configuration.
/// This should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub(super) fn standard_client(contact_email: &str, request_timeout: Duration) -> Client {
    build_source_http_client(contact_email, request_timeout)
        .expect("failed to build source HTTP client with static configuration")
}

/// Sends a request with the shared retry policy.
///
/// Acquires a rate-limit slot per attempt, retries exactly once on a
/// transient failure (5xx, network, timeout, 429) with 1-2 s jitter, and
/// records any `Retry-After` with the limiter. 4xx responses are terminal.
///
/// `build` constructs a fresh request per attempt since `RequestBuilder`
/// is consumed by `send`.
pub(super) async fn send_with_retry<F>(
    limiter: &RateLimiter,
    source: &'static str,
    build: F,
) -> SourceResult<Response>
where
    F: Fn() -> RequestBuilder + Send + Sync,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        limiter.acquire(source).await;

        let error = match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                if let Some(delay) = retry_after.as_deref().and_then(parse_retry_after) {
                    limiter.record_rate_limit(source, delay);
                }
                SourceError::from_status(status.as_u16(), retry_after)
            }
            Err(e) if e.is_timeout() => SourceError::Transient(format!("timeout: {e}")),
            Err(e) => SourceError::Transient(format!("network error: {e}")),
        };

        if attempt == 1 && error.is_transient() {
            let jitter_ms = rand::thread_rng().gen_range(1000..=2000);
            debug!(source, attempt, jitter_ms, error = %error, "retrying transient source failure");
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            continue;
        }

        return Err(error);
    }
}
