//! USB data model shared by the catalog, the session and the monitor

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque token for a device opened by a session
///
/// Only meaningful to the session that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u32);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Negotiated bus speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceSpeed {
    #[default]
    Unknown,
    /// 1.5 Mbit/s
    Low,
    /// 12 Mbit/s
    Full,
    /// 480 Mbit/s
    High,
    /// 5 Gbit/s
    Super,
    /// 10 Gbit/s
    SuperPlus,
}

/// Identity of an attached device, read from a live device reference
///
/// Goes stale as soon as the device is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    /// Port number on the parent hub (0 when the platform cannot tell)
    pub port: u8,
    pub speed: DeviceSpeed,
    pub device_class: u8,
}

/// Endpoint transfer type (bmAttributes bits 0..1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointTransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: u8,
    pub transfer_type: EndpointTransferType,
}

impl Endpoint {
    /// Bit 7 of the address set means device-to-host
    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltSetting {
    pub class: u8,
    pub number: u8,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub number: u8,
    pub alt_settings: Vec<AltSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// bConfigurationValue
    pub value: u8,
    pub interfaces: Vec<Interface>,
}

/// Point-in-time snapshot of a device and its descriptor hierarchy
///
/// device -> configuration -> interface -> alt setting -> endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorTree {
    pub identity: DeviceIdentity,
    pub configurations: Vec<Configuration>,
}

impl fmt::Display for DescriptorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.identity;
        writeln!(
            f,
            "Bus {:03} Device {:03} Port {} Speed: {:?} Class: 0x{:02x}",
            id.bus_number, id.device_address, id.port, id.speed, id.device_class
        )?;
        writeln!(f, "  VendorID: 0x{:04x} ProductID: 0x{:04x}", id.vendor_id, id.product_id)?;
        writeln!(f, "  Configurations: {}", self.configurations.len())?;

        for config in &self.configurations {
            writeln!(
                f,
                "  Configuration {} ({} interfaces)",
                config.value,
                config.interfaces.len()
            )?;
            for interface in &config.interfaces {
                writeln!(
                    f,
                    "    Interface {} ({} alternate settings)",
                    interface.number,
                    interface.alt_settings.len()
                )?;
                for alt in &interface.alt_settings {
                    writeln!(
                        f,
                        "      Alt {} Class: 0x{:02x} Endpoints: {}",
                        alt.number,
                        alt.class,
                        alt.endpoints.len()
                    )?;
                    for ep in &alt.endpoints {
                        writeln!(
                            f,
                            "        EP 0x{:02x} {} {:?}",
                            ep.address,
                            if ep.is_in() { "IN " } else { "OUT" },
                            ep.transfer_type
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Parse a 16-bit hex id such as `0x04b4` or `04b4`
pub fn parse_hex_id(s: &str) -> Option<u16> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if hex.is_empty() || hex.len() > 4 {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

/// Set of vendor/product pairs used to select devices to open
///
/// A vendor id may map to several product ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VidPidSet {
    ids: BTreeMap<u16, BTreeSet<u16>>,
}

impl VidPidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vendor_id: u16, product_id: u16) {
        self.ids.entry(vendor_id).or_default().insert(product_id);
    }

    pub fn contains(&self, vendor_id: u16, product_id: u16) -> bool {
        self.ids
            .get(&vendor_id)
            .is_some_and(|products| products.contains(&product_id))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of vendor/product pairs
    pub fn len(&self) -> usize {
        self.ids.values().map(BTreeSet::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.ids
            .iter()
            .flat_map(|(vid, pids)| pids.iter().map(move |pid| (*vid, *pid)))
    }

    /// Parse a `VID:PID` pair, e.g. `0x04b4:0x00f1`
    pub fn parse_pair(s: &str) -> Option<(u16, u16)> {
        let (vid, pid) = s.split_once(':')?;
        Some((parse_hex_id(vid)?, parse_hex_id(pid)?))
    }
}

impl FromIterator<(u16, u16)> for VidPidSet {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        let mut set = VidPidSet::new();
        for (vid, pid) in iter {
            set.insert(vid, pid);
        }
        set
    }
}

/// Hotplug callback filter; `None` matches any value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugFilter {
    pub device_class: Option<u8>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl HotplugFilter {
    /// Filter that matches every device
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        self.device_class.is_none_or(|c| c == identity.device_class)
            && self.vendor_id.is_none_or(|v| v == identity.vendor_id)
            && self.product_id.is_none_or(|p| p == identity.product_id)
    }
}

/// Which claimed interfaces a release applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceSelector {
    All,
    Number(u8),
}

impl From<u8> for InterfaceSelector {
    fn from(number: u8) -> Self {
        InterfaceSelector::Number(number)
    }
}
