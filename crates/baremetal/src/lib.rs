//! Bare metal device lifecycle management.
//!
//! This crate drives a remote provisioning API: it issues device creation
//! requests, polls asynchronous state transitions to completion, bounds the
//! number of concurrent creations, and narrows facility/device sets under
//! multiple simultaneous filter criteria.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use baremetal::{DeviceConfig, DeviceOrchestrator, ProviderConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Arc::new(ProviderConfig::new("api_token", 10)?);
//!     let orchestrator = DeviceOrchestrator::new(provider);
//!
//!     let state = orchestrator
//!         .create(
//!             &DeviceConfig {
//!                 project_id: "project".into(),
//!                 hostname: "node-1".into(),
//!                 plan: "c1.small.x86".into(),
//!                 facility: "ewr1".into(),
//!                 operating_system: "ubuntu_24_04".into(),
//!                 billing_cycle: "hourly".into(),
//!                 ..DeviceConfig::default()
//!             },
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!
//!     println!("ssh root@{}", state.ssh_host.unwrap_or_default());
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capacity;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod gate;
pub mod models;
pub mod poller;
pub mod timeexpr;
pub mod transport;

pub use capacity::{filter_devices, filter_facilities, DeviceFilter, FacilityFilter};
pub use client::ApiClient;
pub use config::ProviderConfig;
pub use device::{DeviceConfig, DeviceOrchestrator, DeviceState};
pub use error::Error;
pub use gate::CreateGate;
pub use poller::{StateChange, WaitError};
pub use transport::{RetryConfig, Transport};
