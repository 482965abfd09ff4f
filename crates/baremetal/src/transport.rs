//! Resilient HTTP transport.
//!
//! Every remote call in this crate goes through [`Transport::execute`],
//! which replays the request with exponential backoff until the retry
//! policy declares the failure terminal or the attempt budget is spent.
//! The policy mirrors the backend's failure modes: transport-level errors
//! and 5xx responses are transient, redirect loops and broken trust chains
//! are not, and an explicit cancellation always wins.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

/// Default timeout for a single API request.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default minimum backoff between attempts.
pub const DEFAULT_RETRY_WAIT_MIN: Duration = Duration::from_secs(1);

/// Default maximum backoff between attempts.
pub const DEFAULT_RETRY_WAIT_MAX: Duration = Duration::from_secs(30);

/// Default attempt budget per request.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 10;

/// Retry behavior of a [`Transport`]. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Backoff before the second attempt.
    pub min_wait: Duration,
    /// Cap on the backoff between attempts.
    pub max_wait: Duration,
    /// Total attempts per request, first try included.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_RETRY_WAIT_MIN,
            max_wait: DEFAULT_RETRY_WAIT_MAX,
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
        }
    }
}

/// Verdict on a completed attempt. Produced per attempt, never persisted.
#[derive(Debug)]
pub struct RetryDecision {
    /// Whether the attempt should be repeated.
    pub retry: bool,
    /// Error to surface immediately instead of retrying or returning the
    /// attempt's own outcome.
    pub terminal: Option<Error>,
}

impl RetryDecision {
    fn retry() -> Self {
        Self {
            retry: true,
            terminal: None,
        }
    }

    fn halt() -> Self {
        Self {
            retry: false,
            terminal: None,
        }
    }
}

/// Classify a completed attempt.
///
/// Rules, in order: an already-cancelled caller stops everything; redirect
/// loops and TLS authority failures are terminal; any other transport error
/// and any 5xx response is retryable; a non-5xx response is never retried
/// here, its status code is the caller's concern.
#[must_use]
pub fn retry_policy(
    cancel: &CancellationToken,
    status: Option<StatusCode>,
    error: Option<&reqwest::Error>,
) -> RetryDecision {
    if cancel.is_cancelled() {
        return RetryDecision {
            retry: false,
            terminal: Some(Error::Cancelled),
        };
    }

    if let Some(err) = error {
        // The request was abandoned after exceeding the redirect limit;
        // that loop will not resolve on a retry.
        if err.is_redirect() {
            return RetryDecision::halt();
        }

        // A trust chain the client cannot verify stays broken.
        if is_unknown_authority(err) {
            return RetryDecision::halt();
        }

        return RetryDecision::retry();
    }

    if status.is_some_and(|s| s.is_server_error()) {
        return RetryDecision::retry();
    }

    RetryDecision::halt()
}

/// Whether the error chain reports a TLS certificate verification failure.
fn is_unknown_authority(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if text.contains("UnknownIssuer") || text.contains("certificate") {
            return true;
        }
        source = cause.source();
    }
    false
}

/// HTTP executor with bounded retries and exponential backoff.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    retry: RetryConfig,
}

impl Transport {
    /// Create a transport with its own HTTP client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(retry: RetryConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, retry })
    }

    /// Wrap an existing HTTP client.
    #[must_use]
    pub fn with_client(client: Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// The underlying HTTP client, for building requests.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request, replaying it per the retry policy.
    ///
    /// The builder must carry a replayable body (JSON bodies are). On a
    /// terminal classification or an exhausted attempt budget, the last
    /// error is returned.
    ///
    /// # Errors
    /// Returns the terminal or final attempt's error, or
    /// [`Error::Cancelled`] when the cancellation signal fires mid-backoff.
    pub async fn execute(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_err: Option<Error> = None;

        for attempt in 1..=attempts {
            let Some(req) = request.try_clone() else {
                return Err(Error::Validation(
                    "request body cannot be replayed for retries".to_string(),
                ));
            };

            let outcome = req.send().await;
            let decision = match &outcome {
                Ok(response) => retry_policy(cancel, Some(response.status()), None),
                Err(err) => retry_policy(cancel, None, Some(err)),
            };
            if let Some(terminal) = decision.terminal {
                return Err(terminal);
            }

            match outcome {
                Ok(response) => {
                    if !decision.retry {
                        return Ok(response);
                    }
                    let status = response.status();
                    let message = response.text().await.unwrap_or_default();
                    warn!(status = status.as_u16(), attempt, "server error, will retry");
                    last_err = Some(Error::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(err) => {
                    if !decision.retry {
                        return Err(Error::Http(err));
                    }
                    warn!(error = %err, attempt, "transport error, will retry");
                    last_err = Some(Error::Http(err));
                }
            }

            if attempt < attempts {
                let wait = self.backoff(attempt);
                debug!(wait = ?wait, attempt, "backing off before retry");
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = sleep(wait) => {}
                }
            }
        }

        Err(last_err.unwrap_or(Error::Cancelled))
    }

    /// Backoff before the attempt following `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let wait = self.retry.min_wait.saturating_mul(2u32.saturating_pow(exp));
        wait.min(self.retry.max_wait)
    }
}
