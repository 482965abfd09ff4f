//! Error types shared across the crate.

use thiserror::Error;

use crate::poller::WaitError;
use crate::timeexpr::TimeExprError;

/// Errors that can occur while managing devices.
#[derive(Error, Debug)]
pub enum Error {
    /// Option combination rejected before any network call.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// HTTP request failed after retries were exhausted.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Response body could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Time expression matched none of the accepted formats.
    #[error(transparent)]
    TimeExpr(#[from] TimeExprError),

    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Provisioning exceeded the time limit and the backend denied further
    /// reads. The local identity has been disowned; only the provider's
    /// support team can recover the device.
    #[error("provisioning time limit exceeded for device {id}; operator intervention required")]
    ProvisioningTimeLimit { id: String },

    /// A state wait failed in a way that keeps the device identity valid.
    /// The device may still settle on its own or can be inspected manually.
    #[error("device {id} never reached the requested state")]
    StateWait {
        id: String,
        #[source]
        source: Box<WaitError<Error>>,
    },
}

impl Error {
    /// Whether this error is an authorization denial from the backend.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Api { status: 403, .. })
    }

    /// Whether this error is a not-found response.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_detection() {
        let err = Error::Api {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(err.is_forbidden());

        let err = Error::Api {
            status: 404,
            message: "nope".to_string(),
        };
        assert!(!err.is_forbidden());
        assert!(!Error::Cancelled.is_forbidden());
    }
}
