//! API request and response models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Device types
// ============================================================================

/// Device resource from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    /// Device ID.
    pub id: String,
    /// Device hostname.
    pub hostname: String,
    /// Current provisioning state.
    pub state: String,
    /// User tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Billing cycle.
    pub billing_cycle: Option<String>,
    /// Whether the device is locked against mutation.
    #[serde(default)]
    pub locked: bool,
    /// Created timestamp.
    pub created_at: Option<String>,
    /// Updated timestamp.
    pub updated_at: Option<String>,
    /// Root password, present while the backend still exposes it.
    pub root_password: Option<String>,
    /// iPXE script URL for custom boot.
    pub ipxe_script_url: Option<String>,
    /// Whether the device PXE-boots on every boot.
    #[serde(default)]
    pub always_pxe: bool,
    /// Hardware reservation backing this device.
    pub hardware_reservation: Option<Href>,
    /// Whether this is a spot market device.
    #[serde(default)]
    pub spot_instance: bool,
    /// Maximum spot price bid.
    pub spot_price_max: Option<f64>,
    /// Scheduled spot termination time.
    pub termination_time: Option<DateTime<Utc>>,
    /// Facility the device lives in.
    pub facility: Option<Facility>,
    /// Hardware plan.
    pub plan: Option<Plan>,
    /// Installed operating system.
    pub operating_system: Option<OperatingSystem>,
    /// Network assignments, in API order.
    #[serde(default)]
    pub ip_addresses: Vec<IpAddressAssignment>,
}

/// Reference to another resource by href.
#[derive(Debug, Clone, Deserialize)]
pub struct Href {
    /// Resource href.
    pub href: String,
}

impl Href {
    /// Trailing path segment, which is the referenced resource's ID.
    #[must_use]
    pub fn id(&self) -> &str {
        self.href.rsplit('/').next().unwrap_or(&self.href)
    }
}

/// An IP address assigned to a device.
#[derive(Debug, Clone, Deserialize)]
pub struct IpAddressAssignment {
    /// The address.
    pub address: String,
    /// Gateway address.
    pub gateway: Option<String>,
    /// Address family, 4 or 6.
    pub address_family: u8,
    /// Subnet prefix length.
    pub cidr: Option<u32>,
    /// Whether the address is publicly routable.
    #[serde(default)]
    pub public: bool,
    /// Whether this is a management address assigned at provisioning time.
    #[serde(default)]
    pub management: bool,
}

/// The per-family management addresses of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagementAddresses {
    /// Public management IPv4.
    pub public_ipv4: Option<String>,
    /// Private management IPv4.
    pub private_ipv4: Option<String>,
    /// Public management IPv6.
    pub public_ipv6: Option<String>,
    /// Prefix length of the public management IPv4.
    pub public_ipv4_cidr: Option<u32>,
}

impl Device {
    /// Scan the network assignments once and pick out the management
    /// address per family/visibility combination. The first match wins.
    #[must_use]
    pub fn management_addresses(&self) -> ManagementAddresses {
        let mut out = ManagementAddresses::default();
        for ip in &self.ip_addresses {
            if !ip.management {
                continue;
            }
            if ip.address_family == 4 {
                if ip.public {
                    if out.public_ipv4.is_none() {
                        out.public_ipv4 = Some(ip.address.clone());
                        out.public_ipv4_cidr = ip.cidr;
                    }
                } else if out.private_ipv4.is_none() {
                    out.private_ipv4 = Some(ip.address.clone());
                }
            } else if out.public_ipv6.is_none() {
                out.public_ipv6 = Some(ip.address.clone());
            }
        }
        out
    }
}

/// List wrapper for device responses.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicesList {
    /// Devices in the project.
    pub devices: Vec<Device>,
}

/// Request body for creating a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCreateRequest {
    /// Device hostname.
    pub hostname: String,
    /// Plan slug.
    pub plan: String,
    /// Facility code to deploy in.
    pub facility: String,
    /// Operating system slug.
    pub operating_system: String,
    /// Billing cycle.
    pub billing_cycle: String,
    /// Cloud-init user data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userdata: Option<String>,
    /// iPXE script URL for custom boot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipxe_script_url: Option<String>,
    /// PXE-boot on every boot, not only the first.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub always_pxe: bool,
    /// Hardware reservation to deploy onto.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_reservation_id: Option<String>,
    /// Requested public IPv4 subnet size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ipv4_subnet_size: Option<u32>,
    /// Bid on the spot market instead of on-demand.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub spot_instance: bool,
    /// Maximum spot price bid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot_price_max: Option<f64>,
    /// Scheduled spot termination time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_time: Option<DateTime<Utc>>,
    /// User tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Request body for updating a device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceUpdateRequest {
    /// Desired lock state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

/// Device action request (`power_on`, `power_off`, `reboot`).
#[derive(Debug, Clone, Serialize)]
pub struct DeviceActionRequest {
    /// Action type.
    #[serde(rename = "type")]
    pub action_type: String,
}

// ============================================================================
// Facility and capacity types
// ============================================================================

/// A facility where devices can be provisioned.
#[derive(Debug, Clone, Deserialize)]
pub struct Facility {
    /// Facility ID.
    pub id: Option<String>,
    /// Facility code, e.g. `ewr1`.
    pub code: String,
    /// Human-readable name.
    pub name: Option<String>,
    /// Features offered at this facility.
    #[serde(default)]
    pub features: Vec<String>,
}

/// List wrapper for facility responses.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilitiesList {
    /// All facilities.
    pub facilities: Vec<Facility>,
}

/// Plan information.
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    /// Plan ID.
    pub id: Option<String>,
    /// Plan slug.
    pub slug: String,
    /// Plan name.
    pub name: Option<String>,
}

/// Operating system information.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatingSystem {
    /// OS slug.
    pub slug: String,
    /// OS name.
    pub name: Option<String>,
    /// Distribution.
    pub distro: Option<String>,
    /// Version.
    pub version: Option<String>,
}

/// Utilization entry for one (facility, plan) pair.
#[derive(Debug, Clone, Deserialize)]
pub struct CapacityLevel {
    /// Ordinal utilization level: `unavailable`, `limited` or `normal`.
    pub level: String,
}

/// Capacity snapshot: facility code → plan slug → utilization.
pub type CapacityReport = BTreeMap<String, BTreeMap<String, CapacityLevel>>;

/// Wrapper for the capacity list response.
#[derive(Debug, Clone, Deserialize)]
pub struct CapacityReportResponse {
    /// The report.
    pub capacity: CapacityReport,
}

/// One (facility, plan, quantity) tuple of a capacity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Facility code.
    pub facility: String,
    /// Plan slug.
    pub plan: String,
    /// Requested device count.
    pub quantity: u32,
    /// Whether the backend can satisfy the tuple. Only meaningful in
    /// responses.
    #[serde(default)]
    pub available: bool,
}

/// Capacity check request and response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityInput {
    /// Tuples to check.
    pub servers: Vec<ServerSpec>,
}

// ============================================================================
// Project and volume types
// ============================================================================

/// Project resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    /// Project ID.
    pub id: String,
    /// Project name.
    pub name: String,
}

/// List wrapper for project responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectsList {
    /// All projects.
    pub projects: Vec<Project>,
}

/// Block storage volume.
#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    /// Volume ID.
    pub id: String,
    /// Volume name.
    pub name: String,
    /// Volume description.
    pub description: Option<String>,
    /// Size in gigabytes.
    pub size: Option<u64>,
    /// Current state.
    pub state: Option<String>,
    /// Whether the volume is locked.
    #[serde(default)]
    pub locked: bool,
    /// Facility the volume lives in.
    pub facility: Option<Facility>,
}

/// List wrapper for volume responses.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumesList {
    /// Volumes in the project.
    pub volumes: Vec<Volume>,
}
