//! Facility, capacity and device filtering.
//!
//! Two snapshot-based algorithms: narrowing the facility list by feature,
//! plan, utilization and quantity criteria, and narrowing a device list by
//! up to five independent equality/intersection criteria. Snapshots are
//! fetched once per invocation and never updated incrementally.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::{CapacityInput, CapacityReport, Device, Facility, ServerSpec};

/// Utilization vocabulary, ordered from worst to best.
pub const UTILIZATION_LEVELS: [&str; 3] = ["unavailable", "limited", "normal"];

/// Ordinal of a utilization level. An unknown level sorts above every known
/// one.
fn level_index(level: &str) -> usize {
    UTILIZATION_LEVELS
        .iter()
        .position(|l| *l == level)
        .unwrap_or(UTILIZATION_LEVELS.len())
}

/// Criteria for narrowing the facility list.
#[derive(Debug, Clone, Default)]
pub struct FacilityFilter {
    /// Features every surviving facility must offer.
    pub features: Vec<String>,
    /// Plan the facilities are evaluated against.
    pub plan: Option<String>,
    /// Minimum utilization level for the plan.
    pub utilization: Option<String>,
    /// Number of devices of the plan that must be deployable.
    pub quantity: Option<u32>,
}

impl FacilityFilter {
    /// Reject semantically invalid combinations before any network call.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] when utilization or quantity is set
    /// without a plan, or the utilization level is outside the vocabulary.
    pub fn validate(&self) -> Result<(), Error> {
        if self.utilization.is_some() && self.plan.is_none() {
            return Err(Error::Validation(
                "if you set utilization, you also must set plan".to_string(),
            ));
        }
        if self.quantity.is_some() && self.plan.is_none() {
            return Err(Error::Validation(
                "if you set quantity, you also must set plan".to_string(),
            ));
        }
        if let Some(level) = &self.utilization {
            if !UTILIZATION_LEVELS.contains(&level.as_str()) {
                return Err(Error::Validation(format!(
                    "\"{level}\" is not a valid utilization level, only {UTILIZATION_LEVELS:?} are allowed"
                )));
            }
        }
        Ok(())
    }

    /// Stable identifier of the criteria, usable as a filter-result cache
    /// key by the config layer.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut features = self.features.clone();
        features.sort();
        format!(
            "features={}|plan={}|utilization={}|quantity={}",
            features.join("+"),
            self.plan.as_deref().unwrap_or(""),
            self.utilization.as_deref().unwrap_or(""),
            self.quantity.map(|q| q.to_string()).unwrap_or_default(),
        )
    }
}

/// Keep the codes of facilities whose feature set covers `features`.
#[must_use]
pub fn filter_on_features(facilities: &[Facility], features: &[String]) -> Vec<String> {
    facilities
        .iter()
        .filter(|f| features.iter().all(|want| f.features.contains(want)))
        .map(|f| f.code.clone())
        .collect()
}

/// Keep the facilities that list the plan at all in the capacity report.
fn filter_on_plan(slugs: Vec<String>, report: &CapacityReport, plan: &str) -> Vec<String> {
    slugs
        .into_iter()
        .filter(|code| report.get(code).is_some_and(|plans| plans.contains_key(plan)))
        .collect()
}

/// Keep the facilities whose utilization for the plan is at or above the
/// threshold.
fn filter_on_utilization(
    slugs: Vec<String>,
    report: &CapacityReport,
    plan: &str,
    threshold: &str,
) -> Vec<String> {
    let desired = level_index(threshold);
    slugs
        .into_iter()
        .filter(|code| {
            report
                .get(code)
                .and_then(|plans| plans.get(plan))
                .is_some_and(|u| level_index(&u.level) >= desired)
        })
        .collect()
}

/// One quantity-availability question.
#[derive(Debug, Clone)]
pub struct QuantityRequest {
    /// Facility code.
    pub facility: String,
    /// Plan slug.
    pub plan: String,
    /// Requested device count.
    pub quantity: u32,
}

/// Classify each (facility, plan, quantity) tuple as available or not.
/// A single capacity-check call covers all tuples.
///
/// # Errors
/// Returns an error when the capacity-check call fails.
pub async fn check_quantity(
    client: &ApiClient,
    requests: &[QuantityRequest],
    cancel: &CancellationToken,
) -> Result<Vec<ServerSpec>, Error> {
    let input = CapacityInput {
        servers: requests
            .iter()
            .map(|r| ServerSpec {
                facility: r.facility.clone(),
                plan: r.plan.clone(),
                quantity: r.quantity,
                available: false,
            })
            .collect(),
    };
    let checked = client.capacity_check(&input, cancel).await?;
    Ok(checked.servers)
}

/// Narrow the facility list by the filter criteria.
///
/// The facility snapshot is fetched once. The capacity report is only
/// fetched when a utilization or quantity criterion is present; a plan
/// filter alone does not trigger it.
///
/// # Errors
/// Returns [`Error::Validation`] for invalid criteria combinations before
/// any network call, or the underlying API error.
pub async fn filter_facilities(
    client: &ApiClient,
    filter: &FacilityFilter,
    cancel: &CancellationToken,
) -> Result<Vec<String>, Error> {
    filter.validate()?;

    let facilities = client.list_facilities(cancel).await?;
    let mut slugs = filter_on_features(&facilities, &filter.features);
    debug!(
        total = facilities.len(),
        matching = slugs.len(),
        "applied facility feature filter"
    );

    if let Some(plan) = filter.plan.as_deref() {
        let capacity_needed = filter.utilization.is_some() || filter.quantity.is_some();
        if capacity_needed && !slugs.is_empty() {
            let report = client.capacity_list(cancel).await?;
            slugs = filter_on_plan(slugs, &report, plan);
            if let Some(threshold) = filter.utilization.as_deref() {
                slugs = filter_on_utilization(slugs, &report, plan, threshold);
            }
            if let Some(quantity) = filter.quantity {
                let requests: Vec<QuantityRequest> = slugs
                    .iter()
                    .map(|code| QuantityRequest {
                        facility: code.clone(),
                        plan: plan.to_string(),
                        quantity,
                    })
                    .collect();
                let checked = check_quantity(client, &requests, cancel).await?;
                slugs = checked
                    .into_iter()
                    .filter(|s| s.available)
                    .map(|s| s.facility)
                    .collect();
            }
        }
    }

    Ok(slugs)
}

/// Criteria for narrowing a device list. An empty criterion is no
/// constraint.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Keep devices carrying at least one of these tags.
    pub tags: Vec<String>,
    /// Keep devices with one of these hostnames.
    pub hostnames: Vec<String>,
    /// Keep devices in one of these facilities.
    pub facilities: Vec<String>,
    /// Keep devices on one of these plans, matched by slug or name.
    pub plans: Vec<String>,
    /// Keep devices running one of these operating systems.
    pub operating_systems: Vec<String>,
}

/// Apply each supplied criterion as an intersection over the device set.
/// The criteria are independent, so application order does not change the
/// result; the cheap equality filters run before the tag intersection.
#[must_use]
pub fn filter_devices(devices: Vec<Device>, filter: &DeviceFilter) -> Vec<Device> {
    let mut devices = devices;
    if !filter.hostnames.is_empty() {
        devices.retain(|d| filter.hostnames.contains(&d.hostname));
    }
    if !filter.facilities.is_empty() {
        devices.retain(|d| {
            d.facility
                .as_ref()
                .is_some_and(|f| filter.facilities.contains(&f.code))
        });
    }
    if !filter.operating_systems.is_empty() {
        devices.retain(|d| {
            d.operating_system
                .as_ref()
                .is_some_and(|os| filter.operating_systems.contains(&os.slug))
        });
    }
    if !filter.plans.is_empty() {
        devices.retain(|d| {
            d.plan.as_ref().is_some_and(|p| {
                filter.plans.contains(&p.slug)
                    || p.name.as_ref().is_some_and(|n| filter.plans.contains(n))
            })
        });
    }
    if !filter.tags.is_empty() {
        devices.retain(|d| d.tags.iter().any(|t| filter.tags.contains(t)));
    }
    devices
}

/// Per-device primitive lists handed back across the config boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSummaries {
    /// Device IDs.
    pub ids: Vec<String>,
    /// Public management IPv4 per device, empty string when absent.
    pub public_ipv4s: Vec<String>,
    /// Private management IPv4 per device, empty string when absent.
    pub private_ipv4s: Vec<String>,
    /// Public management IPv6 per device, empty string when absent.
    pub public_ipv6s: Vec<String>,
}

/// Extract the management addresses of each device into parallel lists.
#[must_use]
pub fn summarize(devices: &[Device]) -> DeviceSummaries {
    let mut out = DeviceSummaries::default();
    for device in devices {
        let addresses = device.management_addresses();
        out.ids.push(device.id.clone());
        out.public_ipv4s.push(addresses.public_ipv4.unwrap_or_default());
        out.private_ipv4s.push(addresses.private_ipv4.unwrap_or_default());
        out.public_ipv6s.push(addresses.public_ipv6.unwrap_or_default());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapacityLevel, OperatingSystem, Plan};
    use std::collections::BTreeMap;

    fn facility(code: &str, features: &[&str]) -> Facility {
        Facility {
            id: None,
            code: code.to_string(),
            name: None,
            features: features.iter().map(ToString::to_string).collect(),
        }
    }

    fn report(entries: &[(&str, &str, &str)]) -> CapacityReport {
        let mut report = CapacityReport::new();
        for (facility, plan, level) in entries {
            report
                .entry((*facility).to_string())
                .or_insert_with(BTreeMap::new)
                .insert(
                    (*plan).to_string(),
                    CapacityLevel {
                        level: (*level).to_string(),
                    },
                );
        }
        report
    }

    fn device(id: &str, hostname: &str, tags: &[&str], facility_code: &str, plan: (&str, &str), os: &str) -> Device {
        Device {
            id: id.to_string(),
            hostname: hostname.to_string(),
            state: "active".to_string(),
            tags: tags.iter().map(ToString::to_string).collect(),
            billing_cycle: None,
            locked: false,
            created_at: None,
            updated_at: None,
            root_password: None,
            ipxe_script_url: None,
            always_pxe: false,
            hardware_reservation: None,
            spot_instance: false,
            spot_price_max: None,
            termination_time: None,
            facility: Some(facility(facility_code, &[])),
            plan: Some(Plan {
                id: None,
                slug: plan.0.to_string(),
                name: Some(plan.1.to_string()),
            }),
            operating_system: Some(OperatingSystem {
                slug: os.to_string(),
                name: None,
                distro: None,
                version: None,
            }),
            ip_addresses: vec![],
        }
    }

    #[test]
    fn test_feature_filter_requires_superset() {
        let facilities = vec![facility("a", &["storage"]), facility("b", &[])];
        let features = vec!["storage".to_string()];
        assert_eq!(filter_on_features(&facilities, &features), vec!["a"]);

        // No features requested: every facility passes.
        assert_eq!(filter_on_features(&facilities, &[]).len(), 2);
    }

    #[test]
    fn test_plan_filter_intersects_surviving_slugs() {
        let report = report(&[("a", "p1", "normal"), ("b", "p2", "normal")]);
        let slugs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(filter_on_plan(slugs, &report, "p1"), vec!["a"]);
    }

    #[test]
    fn test_utilization_threshold_is_inclusive() {
        let report = report(&[("a", "p1", "limited"), ("b", "p1", "normal")]);
        let slugs = vec!["a".to_string(), "b".to_string()];
        let got = filter_on_utilization(slugs, &report, "p1", "limited");
        assert_eq!(got, vec!["a", "b"]);
    }

    #[test]
    fn test_utilization_below_threshold_is_dropped() {
        let report = report(&[("a", "p1", "unavailable"), ("b", "p1", "limited")]);
        let slugs = vec!["a".to_string(), "b".to_string()];
        let got = filter_on_utilization(slugs, &report, "p1", "limited");
        assert_eq!(got, vec!["b"]);
    }

    #[test]
    fn test_validate_rejects_orphan_criteria() {
        let filter = FacilityFilter {
            utilization: Some("limited".to_string()),
            ..FacilityFilter::default()
        };
        assert!(matches!(filter.validate(), Err(Error::Validation(_))));

        let filter = FacilityFilter {
            quantity: Some(3),
            ..FacilityFilter::default()
        };
        assert!(matches!(filter.validate(), Err(Error::Validation(_))));

        let filter = FacilityFilter {
            plan: Some("p1".to_string()),
            utilization: Some("sideways".to_string()),
            ..FacilityFilter::default()
        };
        assert!(matches!(filter.validate(), Err(Error::Validation(_))));

        let filter = FacilityFilter {
            plan: Some("p1".to_string()),
            utilization: Some("limited".to_string()),
            quantity: Some(3),
            ..FacilityFilter::default()
        };
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_cache_key_ignores_feature_order() {
        let a = FacilityFilter {
            features: vec!["storage".to_string(), "layer_2".to_string()],
            plan: Some("p1".to_string()),
            ..FacilityFilter::default()
        };
        let b = FacilityFilter {
            features: vec!["layer_2".to_string(), "storage".to_string()],
            plan: Some("p1".to_string()),
            ..FacilityFilter::default()
        };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    fn fleet() -> Vec<Device> {
        vec![
            device("d1", "web-1", &["web", "prod"], "ewr1", ("c1.small.x86", "Type 1"), "ubuntu_24_04"),
            device("d2", "web-2", &["web"], "sjc1", ("c1.small.x86", "Type 1"), "ubuntu_24_04"),
            device("d3", "db-1", &["db", "prod"], "ewr1", ("m1.xlarge.x86", "Type 2"), "debian_12"),
        ]
    }

    #[test]
    fn test_device_filter_intersects_criteria() {
        let filter = DeviceFilter {
            tags: vec!["prod".to_string()],
            facilities: vec!["ewr1".to_string()],
            ..DeviceFilter::default()
        };
        let got = filter_devices(fleet(), &filter);
        let ids: Vec<&str> = got.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d3"]);
    }

    #[test]
    fn test_device_filter_plan_matches_slug_or_name() {
        let by_slug = DeviceFilter {
            plans: vec!["m1.xlarge.x86".to_string()],
            ..DeviceFilter::default()
        };
        let by_name = DeviceFilter {
            plans: vec!["Type 2".to_string()],
            ..DeviceFilter::default()
        };
        assert_eq!(filter_devices(fleet(), &by_slug).len(), 1);
        assert_eq!(filter_devices(fleet(), &by_name).len(), 1);
    }

    #[test]
    fn test_device_filter_idempotent() {
        let filter = DeviceFilter {
            tags: vec!["web".to_string()],
            operating_systems: vec!["ubuntu_24_04".to_string()],
            ..DeviceFilter::default()
        };
        let once = filter_devices(fleet(), &filter);
        let twice = filter_devices(once.clone(), &filter);
        let once_ids: Vec<&str> = once.iter().map(|d| d.id.as_str()).collect();
        let twice_ids: Vec<&str> = twice.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(once_ids, twice_ids);
    }

    #[test]
    fn test_device_filter_order_independent() {
        let tags_only = DeviceFilter {
            tags: vec!["prod".to_string()],
            ..DeviceFilter::default()
        };
        let os_only = DeviceFilter {
            operating_systems: vec!["ubuntu_24_04".to_string()],
            ..DeviceFilter::default()
        };

        let tags_then_os = filter_devices(filter_devices(fleet(), &tags_only), &os_only);
        let os_then_tags = filter_devices(filter_devices(fleet(), &os_only), &tags_only);
        let a: Vec<&str> = tags_then_os.iter().map(|d| d.id.as_str()).collect();
        let b: Vec<&str> = os_then_tags.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(a, b);
        assert_eq!(a, vec!["d1"]);
    }

    #[test]
    fn test_device_filter_empty_criteria_keep_everything() {
        let got = filter_devices(fleet(), &DeviceFilter::default());
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn test_summarize_aligns_lists() {
        let mut devices = fleet();
        devices[0].ip_addresses = vec![crate::models::IpAddressAssignment {
            address: "147.75.1.1".to_string(),
            gateway: None,
            address_family: 4,
            cidr: Some(31),
            public: true,
            management: true,
        }];
        let got = summarize(&devices);
        assert_eq!(got.ids.len(), 3);
        assert_eq!(got.public_ipv4s[0], "147.75.1.1");
        assert_eq!(got.public_ipv4s[1], "");
    }
}
