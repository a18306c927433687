//! Device enumeration
//!
//! Stateless helpers over the platform device list. Nothing here touches
//! session state.

use common::{Backend, BackendDevice, DescriptorTree, DeviceIdentity, Result, VidPidSet};
use tracing::{debug, warn};

/// Enumerate attached devices with their full descriptor hierarchy
///
/// The device list is snapshotted once; descriptors are read lazily as the
/// iterator advances. Devices whose descriptors cannot be read are skipped.
pub fn enumerate<B: Backend>(
    backend: &B,
) -> Result<impl Iterator<Item = DescriptorTree> + use<B>> {
    let devices = backend.devices()?;
    debug!("Enumerating {} USB devices", devices.len());

    Ok(devices.into_iter().filter_map(|device| describe(&device)))
}

fn describe<D: BackendDevice>(device: &D) -> Option<DescriptorTree> {
    let identity = match device.identity() {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Failed to read device descriptor: {}", e);
            return None;
        }
    };

    match device.configurations() {
        Ok(configurations) => Some(DescriptorTree {
            identity,
            configurations,
        }),
        Err(e) => {
            warn!(
                "Failed to read configuration descriptors for {:04x}:{:04x}: {}",
                identity.vendor_id, identity.product_id, e
            );
            None
        }
    }
}

/// Whether the device's vendor/product pair is in the set
pub fn matches(identity: &DeviceIdentity, set: &VidPidSet) -> bool {
    set.contains(identity.vendor_id, identity.product_id)
}

/// Identities of attached devices whose vendor/product pair is in the set
pub fn matching<B: Backend>(backend: &B, set: &VidPidSet) -> Result<Vec<DeviceIdentity>> {
    Ok(backend
        .devices()?
        .iter()
        .filter_map(|device| device.identity().ok())
        .filter(|identity| matches(identity, set))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UsbError;
    use common::test_utils::{MockBackend, MockDevice, create_mock_identity};

    #[test]
    fn test_enumerate_walks_descriptor_tree() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::new(0x04b4, 0x00f1).with_location(2, 7, 3));

        let trees: Vec<_> = enumerate(&backend).unwrap().collect();
        assert_eq!(trees.len(), 1);

        let tree = &trees[0];
        assert_eq!(tree.identity.vendor_id, 0x04b4);
        assert_eq!(tree.identity.bus_number, 2);
        assert_eq!(tree.identity.port, 3);
        assert_eq!(tree.configurations.len(), 1);
        let alt = &tree.configurations[0].interfaces[0].alt_settings[0];
        assert_eq!(alt.endpoints.len(), 2);
        assert!(alt.endpoints[0].is_in());
    }

    #[test]
    fn test_enumerate_skips_unreadable_devices() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::new(0x1111, 0x0001).with_descriptor_error(UsbError::Io));
        backend.add_device(MockDevice::new(0x2222, 0x0002));

        let trees: Vec<_> = enumerate(&backend).unwrap().collect();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].identity.vendor_id, 0x2222);
    }

    #[test]
    fn test_enumerate_empty_bus() {
        let backend = MockBackend::new();
        assert_eq!(enumerate(&backend).unwrap().count(), 0);
    }

    #[test]
    fn test_enumerate_is_a_snapshot() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::new(0x1111, 0x0001));
        let trees = enumerate(&backend).unwrap();

        backend.add_device(MockDevice::new(0x2222, 0x0002));
        assert_eq!(trees.count(), 1);
    }

    #[test]
    fn test_matches() {
        let set: VidPidSet = [(0x04b4, 0x00f1)].into_iter().collect();
        assert!(matches(&create_mock_identity(0x04b4, 0x00f1), &set));
        assert!(!matches(&create_mock_identity(0x04b4, 0x00f2), &set));
        assert!(!matches(&create_mock_identity(0x04b4, 0x00f1), &VidPidSet::new()));
    }

    #[test]
    fn test_matching_filters_by_set() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::new(0x04b4, 0x00f1));
        backend.add_device(MockDevice::new(0x04b4, 0x1004));
        backend.add_device(MockDevice::new(0x1234, 0x5678));

        let set: VidPidSet = [(0x04b4, 0x00f1), (0x1234, 0x5678)].into_iter().collect();
        let found = matching(&backend, &set).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|identity| matches(identity, &set)));
    }
}
