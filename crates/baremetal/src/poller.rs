//! Generic wait-for-state polling.
//!
//! Provisioning is asynchronous on the backend: a creation call returns
//! immediately and the device walks through `queued` and `provisioning`
//! before settling in `active`. [`StateChange`] polls a refresh function
//! until the target state is reached, a state outside the expected set shows
//! up, the refresh itself fails, or the overall timeout elapses. The four
//! outcomes are distinct error variants so callers can recover differently.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors from a [`StateChange::wait`] call.
#[derive(Error, Debug)]
pub enum WaitError<E: std::error::Error + 'static> {
    /// The timeout elapsed before the target state was observed.
    #[error("timed out after {timeout:?} waiting for state \"{target}\"; last observed state \"{last_state}\"")]
    Timeout {
        target: String,
        last_state: String,
        timeout: Duration,
    },

    /// The refresh call itself failed.
    #[error("state refresh failed")]
    Refresh(#[source] E),

    /// The backend reported a state outside the pending/target set.
    #[error("unexpected state \"{state}\" while waiting for \"{target}\"")]
    UnexpectedState { state: String, target: String },

    /// The caller's cancellation signal fired.
    #[error("wait cancelled")]
    Cancelled,
}

/// One wait-for-state operation. Built per invocation and consumed by
/// [`StateChange::wait`]; never shared across calls.
pub struct StateChange<F> {
    /// States the resource is allowed to pass through.
    pub pending: Vec<String>,
    /// State that completes the wait.
    pub target: String,
    /// Overall deadline for the wait.
    pub timeout: Duration,
    /// Delay before the first refresh.
    pub poll_interval: Duration,
    /// Floor between subsequent refreshes.
    pub min_poll_interval: Duration,
    /// Fetches the current state, returning the refreshed value with it.
    pub refresh: F,
}

impl<F> StateChange<F> {
    /// Poll until the target state is reached or the wait fails.
    ///
    /// Sleeps `poll_interval` before the first refresh (provisioning never
    /// settles instantly), then `min_poll_interval` between refreshes.
    ///
    /// # Errors
    /// See [`WaitError`] for the four failure modes.
    pub async fn wait<T, E, Fut>(mut self, cancel: &CancellationToken) -> Result<T, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, String), E>>,
        E: std::error::Error + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let mut interval = self.poll_interval;
        let mut last_state = String::from("unknown");

        loop {
            let next = Instant::now() + interval;
            if next >= deadline {
                // Not enough budget left for another refresh: run the clock
                // out and report the timeout.
                tokio::select! {
                    () = cancel.cancelled() => return Err(WaitError::Cancelled),
                    () = sleep_until(deadline) => {}
                }
                return Err(WaitError::Timeout {
                    target: self.target,
                    last_state,
                    timeout: self.timeout,
                });
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(WaitError::Cancelled),
                () = sleep_until(next) => {}
            }

            match (self.refresh)().await {
                Err(e) => return Err(WaitError::Refresh(e)),
                Ok((value, state)) => {
                    debug!(state = %state, target = %self.target, "polled state");
                    if state == self.target {
                        return Ok(value);
                    }
                    if !self.pending.iter().any(|p| *p == state) {
                        return Err(WaitError::UnexpectedState {
                            state,
                            target: self.target,
                        });
                    }
                    last_state = state;
                }
            }

            interval = self.min_poll_interval;
        }
    }
}
