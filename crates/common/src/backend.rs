//! Platform backend traits
//!
//! The session and the hotplug monitor talk to the host USB stack only
//! through these traits. `usbcomm` implements them on top of libusb;
//! [`crate::test_utils::MockBackend`] implements them in memory.

use crate::channel::HotplugNotifier;
use crate::error::UsbError;
use crate::usb_types::{Configuration, DeviceIdentity, HotplugFilter};
use std::time::Duration;

/// A platform session (one libusb context)
///
/// Clones share the same underlying session; the event pump runs on a clone.
pub trait Backend: Clone + Send + Sync + 'static {
    type Device: BackendDevice<Handle = Self::Handle>;
    type Handle: BackendHandle;
    /// Dropping the registration removes the hotplug callback
    type Registration;

    /// Snapshot of the currently attached devices
    fn devices(&self) -> Result<Vec<Self::Device>, UsbError>;

    fn has_hotplug(&self) -> bool;

    /// Install an arrival+departure callback that forwards to `notifier`
    fn register_hotplug(
        &self,
        filter: &HotplugFilter,
        notifier: HotplugNotifier,
    ) -> Result<Self::Registration, UsbError>;

    /// Process pending events, waiting at most `timeout`
    ///
    /// Hotplug callbacks fire on the calling thread.
    fn handle_events(&self, timeout: Duration) -> Result<(), UsbError>;
}

/// A device in the platform's device list
pub trait BackendDevice {
    type Handle: BackendHandle;

    fn identity(&self) -> Result<DeviceIdentity, UsbError>;

    /// Full configuration/interface/alt setting/endpoint hierarchy
    fn configurations(&self) -> Result<Vec<Configuration>, UsbError>;

    fn open(&self) -> Result<Self::Handle, UsbError>;
}

/// Bulk transfer failure together with the bytes moved before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkError {
    pub error: UsbError,
    pub transferred: usize,
}

/// An opened device; dropping it closes the device
pub trait BackendHandle: Send {
    fn set_active_configuration(&mut self, value: u8) -> Result<(), UsbError>;

    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError>;

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError>;

    fn attach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), UsbError>;

    fn reset(&mut self) -> Result<(), UsbError>;

    /// Blocking bulk transfer; direction comes from bit 7 of `endpoint`
    ///
    /// A zero `timeout` waits forever.
    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, BulkError>;

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), UsbError>;
}
