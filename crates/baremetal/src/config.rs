//! Provider-level configuration.
//!
//! One [`ProviderConfig`] is built per process and shared by reference into
//! every orchestrator instance. It owns the API client (with its retrying
//! transport) and the creation admission gate; nothing in this crate
//! reaches for ambient or global state.

use crate::client::ApiClient;
use crate::error::Error;
use crate::gate::CreateGate;
use crate::transport::{RetryConfig, Transport};

/// Default bound on concurrent device creation calls.
pub const DEFAULT_MAX_CONCURRENT_CREATES: usize = 10;

/// Shared provider state: the API client and the creation gate.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Client for the provisioning API.
    pub client: ApiClient,
    /// Admission gate for creation calls.
    pub create_gate: CreateGate,
}

impl ProviderConfig {
    /// Build a provider configuration with default retry behavior.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        auth_token: impl Into<String>,
        max_concurrent_creates: usize,
    ) -> Result<Self, Error> {
        let transport = Transport::new(RetryConfig::default())?;
        Ok(Self::with_client(
            ApiClient::with_transport(transport, auth_token),
            max_concurrent_creates,
        ))
    }

    /// Build a provider configuration around an explicitly constructed
    /// client.
    #[must_use]
    pub fn with_client(client: ApiClient, max_concurrent_creates: usize) -> Self {
        Self {
            client,
            create_gate: CreateGate::new(max_concurrent_creates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_sized_from_config() {
        let provider = ProviderConfig::new("token", 3).unwrap();
        assert_eq!(provider.create_gate.capacity(), 3);
        assert_eq!(provider.create_gate.available(), 3);
    }
}
