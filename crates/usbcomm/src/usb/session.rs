//! Device session
//!
//! A session owns every device handle it opened and tracks, per handle, the
//! interfaces it has claimed. Handles are identified by [`HandleId`] tokens
//! that are only meaningful to the session that issued them.

use crate::usb::catalog;
use crate::usb::libusb::LibusbBackend;
use common::{
    Backend, BackendDevice, BackendHandle, BulkError, DescriptorTree, DeviceIdentity, Error,
    HandleId, InterfaceSelector, Result, UsbError, VidPidSet,
};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Session behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Give interfaces back to the kernel driver we detached when releasing
    pub reattach_kernel_driver: bool,
}

/// An open platform handle plus what the session knows about it
struct OpenDevice<H> {
    id: HandleId,
    identity: DeviceIdentity,
    handle: H,
    /// Interfaces whose kernel driver was detached by `claim_interface`
    detached: BTreeSet<u8>,
}

impl<H: BackendHandle> OpenDevice<H> {
    fn release(&mut self, interface: u8, reattach: bool) {
        if let Err(e) = self.handle.release_interface(interface) {
            warn!(
                "Failed to release interface {} on {}: {}",
                interface, self.id, e
            );
        } else {
            debug!("Released interface {} on {}", interface, self.id);
        }

        if self.detached.remove(&interface) && reattach {
            match self.handle.attach_kernel_driver(interface) {
                Ok(()) => debug!(
                    "Reattached kernel driver to interface {} on {}",
                    interface, self.id
                ),
                Err(e) => debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                ),
            }
        }
    }
}

/// Registry of open device handles and their claimed interfaces
///
/// Every operation takes `&mut self`; wrap the session in a `Mutex` to share
/// it between threads. Dropping the session releases every claimed
/// interface and closes every handle.
pub struct DeviceSession<B: Backend = LibusbBackend> {
    /// Open handles in the order they were opened
    handles: Vec<OpenDevice<B::Handle>>,
    /// Claimed interfaces per handle; never holds an empty set
    claims: HashMap<HandleId, BTreeSet<u8>>,
    next_handle_id: u32,
    options: SessionOptions,
    backend: B,
}

impl DeviceSession<LibusbBackend> {
    /// Create a session with its own libusb context
    pub fn new(options: SessionOptions) -> Result<Self> {
        Ok(Self::with_backend(LibusbBackend::new()?, options))
    }
}

impl<B: Backend> DeviceSession<B> {
    pub fn with_backend(backend: B, options: SessionOptions) -> Self {
        Self {
            handles: Vec::new(),
            claims: HashMap::new(),
            next_handle_id: 1,
            options,
            backend,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Enumerate attached devices through this session's context
    pub fn enumerate(&self) -> Result<impl Iterator<Item = DescriptorTree> + use<B>> {
        catalog::enumerate(&self.backend)
    }

    /// Open every attached device whose vendor/product pair is in `set`
    ///
    /// Closes everything opened before. Devices that fail to open are
    /// skipped. Returns the number of open handles, which is zero when
    /// nothing matched.
    pub fn open(&mut self, set: &VidPidSet) -> Result<usize> {
        if set.is_empty() {
            return Err(Error::EmptyFilter);
        }

        self.close_all();

        for device in self.backend.devices()? {
            let identity = match device.identity() {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Failed to read device descriptor: {}", e);
                    continue;
                }
            };

            if !catalog::matches(&identity, set) {
                continue;
            }

            match device.open() {
                Ok(handle) => {
                    let id = HandleId(self.next_handle_id);
                    self.next_handle_id += 1;

                    info!(
                        "Opened device {:04x}:{:04x} (bus={}, addr={}, port={}) as {}",
                        identity.vendor_id,
                        identity.product_id,
                        identity.bus_number,
                        identity.device_address,
                        identity.port,
                        id
                    );
                    self.handles.push(OpenDevice {
                        id,
                        identity,
                        handle,
                        detached: BTreeSet::new(),
                    });
                }
                Err(UsbError::AccessDenied) => {
                    warn!(
                        "Permission denied opening {:04x}:{:04x}; check udev rules or run with sufficient privileges",
                        identity.vendor_id, identity.product_id
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to open device {:04x}:{:04x}: {}",
                        identity.vendor_id, identity.product_id, e
                    );
                }
            }
        }

        debug!("{} device(s) open", self.handles.len());
        Ok(self.handles.len())
    }

    /// Release all interfaces on `handle` and close it
    ///
    /// Unknown handles are ignored.
    pub fn close(&mut self, handle: HandleId) {
        self.release_interface(handle, InterfaceSelector::All);

        if let Some(index) = self.position(handle) {
            // Dropping the platform handle closes the device
            drop(self.handles.remove(index));
            debug!("Closed {}", handle);
        }
    }

    pub fn close_all(&mut self) {
        let ids: Vec<_> = self.handles.iter().map(|d| d.id).collect();
        for id in ids {
            self.close(id);
        }
        self.claims.clear();
    }

    pub fn set_configuration(&mut self, handle: HandleId, value: u8) -> Result<()> {
        let device = self.device_mut(handle)?;
        device.handle.set_active_configuration(value)?;
        debug!("Set configuration {} on {}", value, handle);
        Ok(())
    }

    /// Claim `interface`, detaching a bound kernel driver first
    ///
    /// Claiming an interface twice records it once.
    pub fn claim_interface(&mut self, handle: HandleId, interface: u8) -> Result<()> {
        let reattach = self.options.reattach_kernel_driver;
        let device = self.device_mut(handle)?;

        let mut detached = false;
        match device.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on {}",
                    interface, handle
                );
                if let Err(e) = device.handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                    return Err(e.into());
                }
                detached = true;
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }

        if let Err(e) = device.handle.claim_interface(interface) {
            warn!("Failed to claim interface {} on {}: {}", interface, handle, e);
            if detached && reattach {
                match device.handle.attach_kernel_driver(interface) {
                    Ok(()) => debug!(
                        "Reattached kernel driver to interface {} on {}",
                        interface, handle
                    ),
                    Err(e) => debug!(
                        "Could not reattach kernel driver to interface {}: {}",
                        interface, e
                    ),
                }
            }
            return Err(e.into());
        }

        if detached {
            device.detached.insert(interface);
        }
        self.claims.entry(handle).or_default().insert(interface);
        debug!("Claimed interface {} on {}", interface, handle);
        Ok(())
    }

    /// Release one claimed interface, or all of them
    ///
    /// Unknown handles and unclaimed interfaces are ignored; platform
    /// failures are logged.
    pub fn release_interface(&mut self, handle: HandleId, which: impl Into<InterfaceSelector>) {
        let reattach = self.options.reattach_kernel_driver;
        let Some(index) = self.position(handle) else {
            return;
        };
        let Some(claimed) = self.claims.get_mut(&handle) else {
            return;
        };
        let device = &mut self.handles[index];

        match which.into() {
            InterfaceSelector::All => {
                for interface in std::mem::take(claimed) {
                    device.release(interface, reattach);
                }
            }
            InterfaceSelector::Number(interface) => {
                if claimed.remove(&interface) {
                    device.release(interface, reattach);
                }
            }
        }

        if claimed.is_empty() {
            self.claims.remove(&handle);
        }
    }

    /// Select an alternate setting on a claimed interface
    pub fn set_interface_alt_setting(
        &mut self,
        handle: HandleId,
        interface: u8,
        setting: u8,
    ) -> Result<()> {
        if self.position(handle).is_none() {
            return Err(Error::InvalidHandle(handle));
        }
        if !self.is_claimed(handle, interface) {
            return Err(Error::InterfaceNotClaimed { handle, interface });
        }

        let device = self.device_mut(handle)?;
        device.handle.set_alternate_setting(interface, setting)?;
        debug!(
            "Set interface {} alternate setting {} on {}",
            interface, setting, handle
        );
        Ok(())
    }

    /// Reset the device behind `handle`
    ///
    /// If the device no longer exists afterwards the handle is closed and
    /// removed; the error is still returned and the caller has to
    /// re-discover the device.
    pub fn reset(&mut self, handle: HandleId) -> Result<()> {
        let device = self.device_mut(handle)?;

        match device.handle.reset() {
            Ok(()) => {
                debug!("Reset {}", handle);
                Ok(())
            }
            Err(e) if e.is_gone() => {
                warn!("Device behind {} is gone after reset: {}", handle, e);
                self.close(handle);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking bulk transfer on `endpoint`
    ///
    /// Bit 7 of `endpoint` selects direction: IN fills `buf`, OUT sends it.
    /// A zero `timeout` waits forever. A timeout is not an error: the bytes
    /// moved before it are returned. A stalled endpoint is cleared before
    /// the stall is reported.
    pub fn bulk_transfer(
        &mut self,
        handle: HandleId,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let device = self.device_mut(handle)?;

        match device.handle.bulk_transfer(endpoint, buf, timeout) {
            Ok(transferred) => Ok(transferred),
            Err(BulkError {
                error: UsbError::Timeout,
                transferred,
            }) => {
                debug!(
                    "Bulk transfer on {} endpoint 0x{:02x} timed out after {} bytes",
                    handle, endpoint, transferred
                );
                Ok(transferred)
            }
            Err(BulkError {
                error: UsbError::Stall,
                ..
            }) => {
                warn!("Endpoint 0x{:02x} on {} stalled, clearing halt", endpoint, handle);
                if let Err(e) = device.handle.clear_halt(endpoint) {
                    warn!("Failed to clear halt on endpoint 0x{:02x}: {}", endpoint, e);
                }
                Err(UsbError::Stall.into())
            }
            Err(BulkError { error, .. }) => Err(error.into()),
        }
    }

    /// Handle at `index` in open order
    pub fn handle_at(&self, index: usize) -> Option<HandleId> {
        self.handles.get(index).map(|d| d.id)
    }

    /// First open handle for vendor/product, optionally on a given port
    pub fn handle_for(&self, vendor_id: u16, product_id: u16, port: Option<u8>) -> Option<HandleId> {
        self.handles
            .iter()
            .find(|d| {
                d.identity.vendor_id == vendor_id
                    && d.identity.product_id == product_id
                    && port.is_none_or(|p| p == d.identity.port)
            })
            .map(|d| d.id)
    }

    pub fn open_handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_open(&self, handle: HandleId) -> bool {
        self.position(handle).is_some()
    }

    /// Identity cached when the handle was opened
    pub fn identity(&self, handle: HandleId) -> Option<&DeviceIdentity> {
        self.handles
            .iter()
            .find(|d| d.id == handle)
            .map(|d| &d.identity)
    }

    pub fn claimed_interfaces(&self, handle: HandleId) -> Option<&BTreeSet<u8>> {
        self.claims.get(&handle)
    }

    /// Open handles in open order
    pub fn handles(&self) -> impl Iterator<Item = HandleId> + '_ {
        self.handles.iter().map(|d| d.id)
    }

    fn is_claimed(&self, handle: HandleId, interface: u8) -> bool {
        self.claims
            .get(&handle)
            .is_some_and(|claimed| claimed.contains(&interface))
    }

    fn position(&self, handle: HandleId) -> Option<usize> {
        self.handles.iter().position(|d| d.id == handle)
    }

    fn device_mut(&mut self, handle: HandleId) -> Result<&mut OpenDevice<B::Handle>> {
        self.handles
            .iter_mut()
            .find(|d| d.id == handle)
            .ok_or(Error::InvalidHandle(handle))
    }
}

impl<B: Backend> Drop for DeviceSession<B> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            debug!("Closing {} device(s) on session drop", self.handles.len());
            self.close_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBackend, MockCall, MockDevice};

    fn session_with(devices: Vec<MockDevice>) -> (MockBackend, DeviceSession<MockBackend>) {
        let backend = MockBackend::new();
        for device in devices {
            backend.add_device(device);
        }
        let session = DeviceSession::with_backend(backend.clone(), SessionOptions::default());
        (backend, session)
    }

    fn set(pairs: &[(u16, u16)]) -> VidPidSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_open_skips_devices_that_fail() {
        let (_backend, mut session) = session_with(vec![
            MockDevice::new(0x04b4, 0x00f1).with_open_error(UsbError::AccessDenied),
            MockDevice::new(0x04b4, 0x00f1).with_location(1, 2, 2),
            MockDevice::new(0x04b4, 0x00f1).with_descriptor_error(UsbError::Io),
        ]);

        assert_eq!(session.open(&set(&[(0x04b4, 0x00f1)])).unwrap(), 1);
        let handle = session.handle_at(0).unwrap();
        assert_eq!(session.identity(handle).unwrap().port, 2);
    }

    #[test]
    fn test_open_closes_previous_handles() {
        let (backend, mut session) = session_with(vec![
            MockDevice::new(0x04b4, 0x00f1),
            MockDevice::new(0x1234, 0x5678),
        ]);

        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let first = session.handle_at(0).unwrap();
        session.claim_interface(first, 0).unwrap();

        assert_eq!(session.open(&set(&[(0x1234, 0x5678)])).unwrap(), 1);
        assert!(!session.is_open(first));
        assert!(session.claimed_interfaces(first).is_none());
        assert_eq!(backend.open_handles(0), 0);
        assert_eq!(backend.open_handles(1), 1);
    }

    #[test]
    fn test_handle_ids_are_not_reused() {
        let (_backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        let filter = set(&[(0x04b4, 0x00f1)]);

        session.open(&filter).unwrap();
        let first = session.handle_at(0).unwrap();
        session.open(&filter).unwrap();
        let second = session.handle_at(0).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_claim_detaches_kernel_driver() {
        let (backend, mut session) =
            session_with(vec![MockDevice::new(0x04b4, 0x00f1).with_kernel_driver(0)]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        session.claim_interface(handle, 0).unwrap();
        assert!(backend.kernel_drivers(0).is_empty());
        assert!(backend.calls().contains(&MockCall::DetachKernelDriver {
            device: 0,
            interface: 0
        }));

        // No reattach unless asked for
        session.release_interface(handle, 0u8);
        assert!(backend.kernel_drivers(0).is_empty());
    }

    #[test]
    fn test_claim_fails_when_detach_fails() {
        let (backend, mut session) =
            session_with(vec![MockDevice::new(0x04b4, 0x00f1).with_kernel_driver(0)]);
        backend.update_device(0, |d| d.detach_error = Some(UsbError::AccessDenied));
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        let err = session.claim_interface(handle, 0).unwrap_err();
        assert!(matches!(err, Error::Usb(UsbError::AccessDenied)));
        assert!(session.claimed_interfaces(handle).is_none());
        assert!(
            !backend
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::ClaimInterface { .. }))
        );
    }

    #[test]
    fn test_release_reattaches_when_configured() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::new(0x04b4, 0x00f1).with_kernel_driver(0));
        let mut session = DeviceSession::with_backend(
            backend.clone(),
            SessionOptions {
                reattach_kernel_driver: true,
            },
        );
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        session.claim_interface(handle, 0).unwrap();
        session.claim_interface(handle, 1).unwrap();
        session.release_interface(handle, InterfaceSelector::All);

        // Only the interface we took the driver from gets it back
        assert_eq!(backend.kernel_drivers(0).into_iter().collect::<Vec<_>>(), vec![0]);
        assert!(!backend.calls().contains(&MockCall::AttachKernelDriver {
            device: 0,
            interface: 1
        }));
    }

    #[test]
    fn test_claim_failure_reattaches_when_configured() {
        let backend = MockBackend::new();
        backend.add_device(MockDevice::new(0x04b4, 0x00f1).with_kernel_driver(0));
        backend.update_device(0, |d| d.claim_error = Some(UsbError::Busy));
        let mut session = DeviceSession::with_backend(
            backend.clone(),
            SessionOptions {
                reattach_kernel_driver: true,
            },
        );
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        assert!(session.claim_interface(handle, 0).is_err());
        assert!(backend.kernel_drivers(0).contains(&0));
    }

    #[test]
    fn test_release_single_interface() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        session.claim_interface(handle, 0).unwrap();
        session.claim_interface(handle, 1).unwrap();
        backend.clear_calls();

        session.release_interface(handle, 1u8);
        assert_eq!(
            session.claimed_interfaces(handle).unwrap().iter().copied().collect::<Vec<_>>(),
            vec![0]
        );
        // Unclaimed interface: nothing to do
        session.release_interface(handle, 5u8);
        assert_eq!(
            backend.calls(),
            vec![MockCall::ReleaseInterface {
                device: 0,
                interface: 1
            }]
        );

        session.release_interface(handle, 0u8);
        assert!(session.claimed_interfaces(handle).is_none());
    }

    #[test]
    fn test_alt_setting_requires_claim() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();
        backend.clear_calls();

        let err = session.set_interface_alt_setting(handle, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::InterfaceNotClaimed { interface: 0, .. }
        ));
        assert!(backend.calls().is_empty());

        session.claim_interface(handle, 0).unwrap();
        session.set_interface_alt_setting(handle, 0, 1).unwrap();
        assert!(backend.calls().contains(&MockCall::SetAlternateSetting {
            device: 0,
            interface: 0,
            setting: 1
        }));
    }

    #[test]
    fn test_set_configuration() {
        let (_backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        session.set_configuration(handle, 1).unwrap();
        assert!(matches!(
            session.set_configuration(handle, 9),
            Err(Error::Usb(UsbError::NotFound))
        ));
        assert!(matches!(
            session.set_configuration(HandleId(999), 1),
            Err(Error::InvalidHandle(HandleId(999)))
        ));
    }

    #[test]
    fn test_reset_keeps_handle_on_other_errors() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        backend.update_device(0, |d| d.reset_error = Some(UsbError::Io));
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        assert!(matches!(session.reset(handle), Err(Error::Usb(UsbError::Io))));
        assert!(session.is_open(handle));
    }

    #[test]
    fn test_reset_invalidates_on_no_device() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();
        session.claim_interface(handle, 0).unwrap();

        backend.unplug(0);
        assert!(matches!(
            session.reset(handle),
            Err(Error::Usb(UsbError::NoDevice))
        ));
        assert!(!session.is_open(handle));
        assert!(session.claimed_interfaces(handle).is_none());
        assert_eq!(backend.open_handles(0), 0);
    }

    #[test]
    fn test_bulk_stall_clears_halt() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        backend.push_bulk_result(
            0,
            Err(BulkError {
                error: UsbError::Stall,
                transferred: 0,
            }),
        );
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        let mut buf = [0u8; 64];
        let err = session
            .bulk_transfer(handle, 0x81, &mut buf, Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(err.code(), UsbError::Stall.code());
        assert!(backend.calls().contains(&MockCall::ClearHalt {
            device: 0,
            endpoint: 0x81
        }));
    }

    #[test]
    fn test_bulk_other_error_is_returned() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        backend.push_bulk_result(
            0,
            Err(BulkError {
                error: UsbError::Overflow,
                transferred: 64,
            }),
        );
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        let mut buf = [0u8; 64];
        let err = session
            .bulk_transfer(handle, 0x81, &mut buf, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.code(), -8);
        assert!(
            !backend
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::ClearHalt { .. }))
        );
    }

    #[test]
    fn test_bulk_out_sends_buffer() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();

        let mut data = *b"hello";
        assert_eq!(
            session
                .bulk_transfer(handle, 0x01, &mut data, Duration::from_secs(1))
                .unwrap(),
            5
        );
        assert_eq!(&data, b"hello");
        assert!(backend.calls().contains(&MockCall::BulkTransfer {
            device: 0,
            endpoint: 0x01,
            len: 5
        }));
    }

    #[test]
    fn test_handle_for_port() {
        let (_backend, mut session) = session_with(vec![
            MockDevice::new(0x04b4, 0x00f1).with_location(1, 5, 3),
            MockDevice::new(0x04b4, 0x00f1).with_location(1, 6, 4),
        ]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();

        let first = session.handle_at(0).unwrap();
        let second = session.handle_at(1).unwrap();
        assert_eq!(session.handle_for(0x04b4, 0x00f1, None), Some(first));
        assert_eq!(session.handle_for(0x04b4, 0x00f1, Some(4)), Some(second));
        assert_eq!(session.handle_for(0x04b4, 0x00f1, Some(9)), None);
        assert_eq!(session.handle_for(0x1234, 0x00f1, None), None);
        assert_eq!(session.handle_at(2), None);
    }

    #[test]
    fn test_drop_releases_and_closes() {
        let (backend, mut session) = session_with(vec![MockDevice::new(0x04b4, 0x00f1)]);
        session.open(&set(&[(0x04b4, 0x00f1)])).unwrap();
        let handle = session.handle_at(0).unwrap();
        session.claim_interface(handle, 0).unwrap();
        backend.clear_calls();

        drop(session);
        assert_eq!(
            backend.calls(),
            vec![
                MockCall::ReleaseInterface {
                    device: 0,
                    interface: 0
                },
                MockCall::Close { device: 0 },
            ]
        );
        assert_eq!(backend.open_handles(0), 0);
    }
}
