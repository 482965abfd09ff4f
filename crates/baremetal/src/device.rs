//! Device lifecycle orchestration.
//!
//! Composes the admission gate, the retrying client, the state poller and
//! the termination time resolver into create/read/update/delete semantics
//! for one managed device. Reads always re-list the project to pick up
//! external drift; nothing is cached across calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::error::Error;
use crate::models::{Device, DeviceCreateRequest, DeviceUpdateRequest};
use crate::poller::{StateChange, WaitError};
use crate::timeexpr::{self, TERMINATION_TIME_PARSERS, TERMINATION_TIME_ROUND};

/// How long a device may take to reach `active` after creation.
pub const PROVISION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Delay before the first provisioning poll.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Floor between subsequent provisioning polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(3);

const STATE_ACTIVE: &str = "active";
const STATE_QUEUED: &str = "queued";
const STATE_PROVISIONING: &str = "provisioning";
const STATE_OFF: &str = "off";

const OS_CUSTOM_IPXE: &str = "custom_ipxe";
const ACTION_POWER_ON: &str = "power_on";

/// Typed creation options for one device. Every option is a named field;
/// validation happens exhaustively before any network call.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    /// Project to create the device in.
    pub project_id: String,
    /// Device hostname.
    pub hostname: String,
    /// Plan slug.
    pub plan: String,
    /// Facility code.
    pub facility: String,
    /// Operating system slug.
    pub operating_system: String,
    /// Billing cycle.
    pub billing_cycle: String,
    /// Cloud-init user data.
    pub user_data: Option<String>,
    /// iPXE script URL, only legal with the `custom_ipxe` OS.
    pub ipxe_script_url: Option<String>,
    /// PXE-boot on every boot.
    pub always_pxe: bool,
    /// Hardware reservation to deploy onto.
    pub hardware_reservation_id: Option<String>,
    /// Requested public IPv4 subnet size.
    pub public_ipv4_subnet_size: Option<u32>,
    /// Bid on the spot market instead of on-demand.
    pub spot_instance: bool,
    /// Maximum spot price bid; required with `spot_instance`.
    pub spot_price_max: Option<f64>,
    /// Termination time expression; only legal with `spot_instance`.
    pub termination_time: Option<String>,
    /// User tags.
    pub tags: Vec<String>,
}

/// Resolved spot termination schedule, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotTermination {
    /// The instant the device terminates, rounded to the fixed granularity.
    pub at: DateTime<Utc>,
}

impl DeviceConfig {
    /// Check option combinations and resolve the termination schedule.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for conflicting or missing options and
    /// [`Error::TimeExpr`] for an unparsable termination time.
    pub fn validate(&self) -> Result<Option<SpotTermination>, Error> {
        if self.operating_system == OS_CUSTOM_IPXE {
            match (&self.ipxe_script_url, &self.user_data) {
                (None, None) => {
                    return Err(Error::Validation(format!(
                        "\"ipxe_script_url\" or \"user_data\" must be provided when the \"{OS_CUSTOM_IPXE}\" OS is selected"
                    )));
                }
                (Some(_), Some(_)) => {
                    return Err(Error::Validation(format!(
                        "\"ipxe_script_url\" and \"user_data\" are mutually exclusive for the \"{OS_CUSTOM_IPXE}\" OS"
                    )));
                }
                _ => {}
            }
        } else if self.ipxe_script_url.is_some() {
            return Err(Error::Validation(format!(
                "\"ipxe_script_url\" provided, but OS is not \"{OS_CUSTOM_IPXE}\"; verify and fix the device arguments"
            )));
        }

        let mut termination = None;
        if self.spot_instance {
            let Some(max) = self.spot_price_max else {
                return Err(Error::Validation(
                    "\"spot_price_max\" must be provided when \"spot_instance\" is true"
                        .to_string(),
                ));
            };
            if max < 0.0 {
                return Err(Error::Validation(format!(
                    "expected \"spot_price_max\" to be at least 0, got {max}"
                )));
            }
            if let Some(expr) = self.termination_time.as_deref() {
                let at = timeexpr::resolve(expr, TERMINATION_TIME_PARSERS)?;
                termination = Some(SpotTermination { at });
            }
        } else {
            if self.spot_price_max.is_some() {
                return Err(only_with("spot_price_max", "spot_instance"));
            }
            if self.termination_time.is_some() {
                return Err(only_with("termination_time", "spot_instance"));
            }
        }

        Ok(termination)
    }

    fn to_create_request(&self, termination: Option<SpotTermination>) -> DeviceCreateRequest {
        DeviceCreateRequest {
            hostname: self.hostname.clone(),
            plan: self.plan.clone(),
            facility: self.facility.clone(),
            operating_system: self.operating_system.clone(),
            billing_cycle: self.billing_cycle.clone(),
            userdata: self.user_data.clone(),
            ipxe_script_url: self.ipxe_script_url.clone(),
            always_pxe: self.always_pxe,
            hardware_reservation_id: self.hardware_reservation_id.clone(),
            public_ipv4_subnet_size: self.public_ipv4_subnet_size,
            spot_instance: self.spot_instance,
            spot_price_max: self.spot_price_max,
            termination_time: termination.map(|t| t.at),
            tags: self.tags.clone(),
        }
    }
}

fn only_with(provided: &str, when: &str) -> Error {
    Error::Validation(format!(
        "\"{provided}\" should only be provided when \"{when}\" is true"
    ))
}

/// A device read-back with the derived connection fields populated.
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// The device as returned by the API.
    pub device: Device,
    /// Public management IPv4.
    pub access_public_ipv4: Option<String>,
    /// Private management IPv4.
    pub access_private_ipv4: Option<String>,
    /// Public management IPv6.
    pub access_public_ipv6: Option<String>,
    /// Prefix length of the public management IPv4.
    pub public_ipv4_subnet_size: Option<u32>,
    /// Host to use for SSH connections.
    pub ssh_host: Option<String>,
    /// Spot termination instant, rounded.
    pub termination_timestamp: Option<DateTime<Utc>>,
    /// Time left until spot termination, recomputed from now on every read.
    pub termination_time_remaining: Option<String>,
}

impl DeviceState {
    fn from_device(device: Device) -> Self {
        let addresses = device.management_addresses();
        let (termination_timestamp, termination_time_remaining) = match device.termination_time {
            Some(at) => {
                let rounded = timeexpr::round_to(at, TERMINATION_TIME_ROUND);
                (Some(rounded), Some(remaining_until(rounded)))
            }
            None => (None, None),
        };

        Self {
            ssh_host: addresses.public_ipv4.clone(),
            access_public_ipv4: addresses.public_ipv4,
            access_private_ipv4: addresses.private_ipv4,
            access_public_ipv6: addresses.public_ipv6,
            public_ipv4_subnet_size: addresses.public_ipv4_cidr,
            termination_timestamp,
            termination_time_remaining,
            device,
        }
    }
}

/// Time from now until `at`, rounded to the termination granularity.
/// Already-elapsed schedules render as "0s".
fn remaining_until(at: DateTime<Utc>) -> String {
    let step = i64::try_from(TERMINATION_TIME_ROUND.as_secs()).unwrap_or(i64::MAX);
    let secs = (at - Utc::now()).num_seconds();
    let rounded = (secs + step / 2).div_euclid(step) * step;
    match u64::try_from(rounded) {
        Ok(secs) if secs > 0 => humantime::format_duration(Duration::from_secs(secs)).to_string(),
        _ => "0s".to_string(),
    }
}

/// Orchestrates the lifecycle of managed devices. One instance may serve
/// many concurrent calls; the shared state lives in [`ProviderConfig`].
#[derive(Debug, Clone)]
pub struct DeviceOrchestrator {
    provider: Arc<ProviderConfig>,
    provision_timeout: Duration,
    poll_interval: Duration,
    min_poll_interval: Duration,
}

impl DeviceOrchestrator {
    /// Create an orchestrator with the default poll timing.
    #[must_use]
    pub fn new(provider: Arc<ProviderConfig>) -> Self {
        Self {
            provider,
            provision_timeout: PROVISION_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            min_poll_interval: MIN_POLL_INTERVAL,
        }
    }

    /// Override the poll timing, mainly for tests against fast backends.
    #[must_use]
    pub fn with_poll_timing(
        mut self,
        timeout: Duration,
        poll_interval: Duration,
        min_poll_interval: Duration,
    ) -> Self {
        self.provision_timeout = timeout;
        self.poll_interval = poll_interval;
        self.min_poll_interval = min_poll_interval;
        self
    }

    /// Create a device and wait for it to become active.
    ///
    /// The admission gate bounds how many creation calls are in flight; the
    /// permit is released as soon as the creation call returns. After the
    /// device reaches `active` a full read-back populates the derived
    /// fields.
    ///
    /// # Errors
    /// [`Error::Validation`] before any network call for bad option
    /// combinations; [`Error::ProvisioningTimeLimit`] when the backend
    /// denies further reads and the identity is disowned;
    /// [`Error::StateWait`] for other poll failures (the identity stays
    /// valid); [`Error::Cancelled`] when the cancellation signal fires.
    pub async fn create(
        &self,
        config: &DeviceConfig,
        cancel: &CancellationToken,
    ) -> Result<DeviceState, Error> {
        let termination = config.validate()?;
        let request = config.to_create_request(termination);

        let device = {
            let _permit = self.provider.create_gate.acquire(cancel).await?;
            self.provider
                .client
                .create_device(&config.project_id, &request, cancel)
                .await?
        };
        let id = device.id.clone();
        info!(
            device_id = %id,
            hostname = %config.hostname,
            facility = %config.facility,
            "device created, waiting for provisioning"
        );

        match self
            .wait_for_state(&id, STATE_ACTIVE, &[STATE_QUEUED, STATE_PROVISIONING], cancel)
            .await
        {
            Ok(_) => {}
            Err(WaitError::Cancelled) => return Err(Error::Cancelled),
            Err(WaitError::Refresh(e)) if e.is_forbidden() => {
                // The backend answers reads with 403 once it has written the
                // provisioning attempt off. The local identity is disowned.
                warn!(device_id = %id, "backend denied provisioning reads, disowning device");
                return Err(Error::ProvisioningTimeLimit { id });
            }
            Err(e) => {
                return Err(Error::StateWait {
                    id,
                    source: Box::new(e),
                });
            }
        }

        match self.read(&config.project_id, &id, cancel).await? {
            Some(state) => Ok(state),
            None => Err(Error::NotFound(format!(
                "device {id} disappeared after provisioning"
            ))),
        }
    }

    /// Read a device back through the project listing.
    ///
    /// Returns `Ok(None)` when the device is no longer in the project:
    /// something deleted it externally, which the caller treats as
    /// successfully gone.
    ///
    /// # Errors
    /// Returns an error when the list call fails.
    pub async fn read(
        &self,
        project_id: &str,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceState>, Error> {
        let devices = self.provider.client.list_devices(project_id, cancel).await?;
        let Some(device) = devices.into_iter().find(|d| d.id == device_id) else {
            debug!(device_id = %device_id, "device absent from project, treating as deleted");
            return Ok(None);
        };
        Ok(Some(DeviceState::from_device(device)))
    }

    /// Reconcile the lock state, then read the device back.
    ///
    /// The lock call is only issued when the desired state differs from the
    /// current one.
    ///
    /// # Errors
    /// Returns an error when a read or the lock update fails.
    pub async fn update(
        &self,
        device_id: &str,
        locked: Option<bool>,
        cancel: &CancellationToken,
    ) -> Result<DeviceState, Error> {
        if let Some(desired) = locked {
            let current = self.provider.client.get_device(device_id, cancel).await?;
            if current.locked != desired {
                info!(device_id = %device_id, locked = desired, "updating lock state");
                self.provider
                    .client
                    .update_device(
                        device_id,
                        &DeviceUpdateRequest {
                            locked: Some(desired),
                        },
                        cancel,
                    )
                    .await?;
            }
        }

        let device = self.provider.client.get_device(device_id, cancel).await?;
        Ok(DeviceState::from_device(device))
    }

    /// Delete a device. An already-absent device counts as deleted.
    ///
    /// # Errors
    /// Returns an error when the deletion call fails.
    pub async fn delete(&self, device_id: &str, cancel: &CancellationToken) -> Result<(), Error> {
        info!(device_id = %device_id, "deleting device");
        self.provider.client.delete_device(device_id, cancel).await
    }

    /// Power a device on and wait for it to become active.
    ///
    /// # Errors
    /// Returns [`Error::StateWait`] when the device does not come up in
    /// time, or the underlying API error.
    pub async fn power_on_and_wait(
        &self,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeviceState, Error> {
        info!(device_id = %device_id, "powering device on");
        self.provider
            .client
            .device_action(device_id, ACTION_POWER_ON, cancel)
            .await?;

        match self
            .wait_for_state(device_id, STATE_ACTIVE, &[STATE_OFF], cancel)
            .await
        {
            Ok(device) => Ok(DeviceState::from_device(device)),
            Err(WaitError::Cancelled) => Err(Error::Cancelled),
            Err(e) => Err(Error::StateWait {
                id: device_id.to_string(),
                source: Box::new(e),
            }),
        }
    }

    async fn wait_for_state(
        &self,
        device_id: &str,
        target: &str,
        pending: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Device, WaitError<Error>> {
        let client = self.provider.client.clone();
        let id = device_id.to_string();
        let token = cancel.clone();
        let refresh = move || {
            let client = client.clone();
            let id = id.clone();
            let token = token.clone();
            async move {
                let device = client.get_device(&id, &token).await?;
                let state = device.state.clone();
                Ok::<_, Error>((device, state))
            }
        };

        StateChange {
            pending: pending.iter().map(ToString::to_string).collect(),
            target: target.to_string(),
            timeout: self.provision_timeout,
            poll_interval: self.poll_interval,
            min_poll_interval: self.min_poll_interval,
            refresh,
        }
        .wait(cancel)
        .await
    }
}
