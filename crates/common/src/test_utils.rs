//! Test utilities for usbcomm
//!
//! Provides an in-memory [`Backend`] and helper functions for exercising
//! sessions and hotplug monitors without hardware.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBackend, MockDevice};
//! use common::Backend;
//!
//! let backend = MockBackend::new();
//! backend.add_device(MockDevice::new(0x04b4, 0x00f1));
//! assert_eq!(backend.devices().unwrap().len(), 1);
//! ```

use crate::backend::{Backend, BackendDevice, BackendHandle, BulkError};
use crate::channel::{HotplugEvent, HotplugNotifier};
use crate::error::UsbError;
use crate::usb_types::{
    AltSetting, Configuration, DeviceIdentity, DeviceSpeed, Endpoint, EndpointTransferType,
    HotplugFilter, Interface,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceIdentity for testing
///
/// # Example
/// ```
/// use common::test_utils::create_mock_identity;
///
/// let identity = create_mock_identity(0x1234, 0x5678);
/// assert_eq!(identity.vendor_id, 0x1234);
/// ```
pub fn create_mock_identity(vendor_id: u16, product_id: u16) -> DeviceIdentity {
    DeviceIdentity {
        vendor_id,
        product_id,
        bus_number: 1,
        device_address: 1,
        port: 1,
        speed: DeviceSpeed::High,
        device_class: 0x00,
    }
}

/// Create a vendor-specific configuration with one bulk IN and one bulk OUT
/// endpoint on interface 0
pub fn create_mock_configuration(value: u8) -> Configuration {
    Configuration {
        value,
        interfaces: vec![Interface {
            number: 0,
            alt_settings: vec![AltSetting {
                class: 0xff,
                number: 0,
                endpoints: vec![
                    Endpoint {
                        address: 0x81,
                        transfer_type: EndpointTransferType::Bulk,
                    },
                    Endpoint {
                        address: 0x01,
                        transfer_type: EndpointTransferType::Bulk,
                    },
                ],
            }],
        }],
    }
}

/// Create mock bulk transfer data of specified size
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// Timeout wrapper for async tests
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv()).await.unwrap();
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Platform call recorded by the mock backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Open { device: usize },
    Close { device: usize },
    SetConfiguration { device: usize, value: u8 },
    DetachKernelDriver { device: usize, interface: u8 },
    AttachKernelDriver { device: usize, interface: u8 },
    ClaimInterface { device: usize, interface: u8 },
    ReleaseInterface { device: usize, interface: u8 },
    SetAlternateSetting { device: usize, interface: u8, setting: u8 },
    Reset { device: usize },
    BulkTransfer { device: usize, endpoint: u8, len: usize },
    ClearHalt { device: usize, endpoint: u8 },
}

/// Scripted device for [`MockBackend`]
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub identity: DeviceIdentity,
    pub configurations: Vec<Configuration>,
    /// Returned by open() instead of a handle
    pub open_error: Option<UsbError>,
    /// Returned when reading descriptors
    pub descriptor_error: Option<UsbError>,
    /// Interfaces with a kernel driver bound
    pub kernel_drivers: BTreeSet<u8>,
    pub detach_error: Option<UsbError>,
    pub claim_error: Option<UsbError>,
    pub reset_error: Option<UsbError>,
    /// Consumed one per bulk transfer; full-length success when empty
    pub bulk_results: VecDeque<Result<usize, BulkError>>,
}

impl MockDevice {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            identity: create_mock_identity(vendor_id, product_id),
            configurations: vec![create_mock_configuration(1)],
            open_error: None,
            descriptor_error: None,
            kernel_drivers: BTreeSet::new(),
            detach_error: None,
            claim_error: None,
            reset_error: None,
            bulk_results: VecDeque::new(),
        }
    }

    pub fn with_location(mut self, bus_number: u8, device_address: u8, port: u8) -> Self {
        self.identity.bus_number = bus_number;
        self.identity.device_address = device_address;
        self.identity.port = port;
        self
    }

    pub fn with_class(mut self, device_class: u8) -> Self {
        self.identity.device_class = device_class;
        self
    }

    pub fn with_open_error(mut self, error: UsbError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn with_descriptor_error(mut self, error: UsbError) -> Self {
        self.descriptor_error = Some(error);
        self
    }

    pub fn with_kernel_driver(mut self, interface: u8) -> Self {
        self.kernel_drivers.insert(interface);
        self
    }
}

#[derive(Debug)]
struct MockSlot {
    device: MockDevice,
    attached: bool,
    open_handles: usize,
}

#[derive(Default)]
struct MockState {
    slots: Vec<MockSlot>,
    calls: Vec<MockCall>,
    hotplug_unsupported: bool,
    callbacks: BTreeMap<u64, (HotplugFilter, HotplugNotifier)>,
    next_callback: u64,
    pending: VecDeque<(DeviceIdentity, HotplugEvent)>,
    handle_events_calls: usize,
}

struct Shared {
    state: Mutex<MockState>,
    events_ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory platform session
///
/// Clones share state, like clones of a libusb context.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState::default()),
                events_ready: Condvar::new(),
            }),
        }
    }

    /// Backend whose platform lacks hotplug support
    pub fn without_hotplug() -> Self {
        let backend = Self::new();
        backend.shared.lock().hotplug_unsupported = true;
        backend
    }

    /// Attach a device silently (present before any hotplug registration)
    pub fn add_device(&self, device: MockDevice) -> usize {
        let mut state = self.shared.lock();
        state.slots.push(MockSlot {
            device,
            attached: true,
            open_handles: 0,
        });
        state.slots.len() - 1
    }

    /// Attach a device and queue an arrival event
    pub fn plug(&self, device: MockDevice) -> usize {
        let identity = device.identity.clone();
        let index = self.add_device(device);
        self.queue_event(identity, HotplugEvent::Arrived);
        index
    }

    /// Detach a device and queue a departure event
    pub fn unplug(&self, index: usize) {
        let identity = {
            let mut state = self.shared.lock();
            let Some(slot) = state.slots.get_mut(index) else {
                return;
            };
            slot.attached = false;
            slot.device.identity.clone()
        };
        self.queue_event(identity, HotplugEvent::Left);
    }

    fn queue_event(&self, identity: DeviceIdentity, event: HotplugEvent) {
        self.shared.lock().pending.push_back((identity, event));
        self.shared.events_ready.notify_all();
    }

    /// Modify a scripted device in place
    pub fn update_device(&self, index: usize, f: impl FnOnce(&mut MockDevice)) {
        if let Some(slot) = self.shared.lock().slots.get_mut(index) {
            f(&mut slot.device);
        }
    }

    pub fn push_bulk_result(&self, index: usize, result: Result<usize, BulkError>) {
        self.update_device(index, |d| d.bulk_results.push_back(result));
    }

    /// Interfaces that currently have a kernel driver bound
    pub fn kernel_drivers(&self, index: usize) -> BTreeSet<u8> {
        self.shared
            .lock()
            .slots
            .get(index)
            .map(|s| s.device.kernel_drivers.clone())
            .unwrap_or_default()
    }

    /// Number of handles to the device that have not been closed
    pub fn open_handles(&self, index: usize) -> usize {
        self.shared
            .lock()
            .slots
            .get(index)
            .map_or(0, |s| s.open_handles)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.shared.lock().calls.clear();
    }

    pub fn registered_callbacks(&self) -> usize {
        self.shared.lock().callbacks.len()
    }

    pub fn handle_events_calls(&self) -> usize {
        self.shared.lock().handle_events_calls
    }

    fn record(&self, call: MockCall) {
        self.shared.lock().calls.push(call);
    }
}

/// Registration token; dropping it removes the callback
pub struct MockRegistration {
    id: u64,
    shared: Arc<Shared>,
}

impl Drop for MockRegistration {
    fn drop(&mut self) {
        self.shared.lock().callbacks.remove(&self.id);
    }
}

impl Backend for MockBackend {
    type Device = MockDeviceRef;
    type Handle = MockHandle;
    type Registration = MockRegistration;

    fn devices(&self) -> Result<Vec<MockDeviceRef>, UsbError> {
        let state = self.shared.lock();
        Ok(state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.attached)
            .map(|(index, _)| MockDeviceRef {
                index,
                backend: self.clone(),
            })
            .collect())
    }

    fn has_hotplug(&self) -> bool {
        !self.shared.lock().hotplug_unsupported
    }

    fn register_hotplug(
        &self,
        filter: &HotplugFilter,
        notifier: HotplugNotifier,
    ) -> Result<MockRegistration, UsbError> {
        let mut state = self.shared.lock();
        if state.hotplug_unsupported {
            return Err(UsbError::NotSupported);
        }
        let id = state.next_callback;
        state.next_callback += 1;
        state.callbacks.insert(id, (*filter, notifier));
        Ok(MockRegistration {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    fn handle_events(&self, timeout: Duration) -> Result<(), UsbError> {
        let mut state = self.shared.lock();
        state.handle_events_calls += 1;

        if state.pending.is_empty() {
            state = self
                .shared
                .events_ready
                .wait_timeout(state, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        while let Some((identity, event)) = state.pending.pop_front() {
            for (filter, notifier) in state.callbacks.values() {
                if filter.matches(&identity) {
                    notifier.notify(event);
                }
            }
        }
        Ok(())
    }
}

/// Entry in a [`MockBackend`] device list
#[derive(Clone)]
pub struct MockDeviceRef {
    index: usize,
    backend: MockBackend,
}

impl BackendDevice for MockDeviceRef {
    type Handle = MockHandle;

    fn identity(&self) -> Result<DeviceIdentity, UsbError> {
        let state = self.backend.shared.lock();
        let slot = state.slots.get(self.index).ok_or(UsbError::NoDevice)?;
        match &slot.device.descriptor_error {
            Some(e) => Err(e.clone()),
            None => Ok(slot.device.identity.clone()),
        }
    }

    fn configurations(&self) -> Result<Vec<Configuration>, UsbError> {
        let state = self.backend.shared.lock();
        let slot = state.slots.get(self.index).ok_or(UsbError::NoDevice)?;
        match &slot.device.descriptor_error {
            Some(e) => Err(e.clone()),
            None => Ok(slot.device.configurations.clone()),
        }
    }

    fn open(&self) -> Result<MockHandle, UsbError> {
        self.backend.record(MockCall::Open { device: self.index });
        let mut state = self.backend.shared.lock();
        let slot = state.slots.get_mut(self.index).ok_or(UsbError::NoDevice)?;
        if !slot.attached {
            return Err(UsbError::NoDevice);
        }
        if let Some(e) = &slot.device.open_error {
            return Err(e.clone());
        }
        slot.open_handles += 1;
        Ok(MockHandle {
            index: self.index,
            backend: self.backend.clone(),
        })
    }
}

/// Opened mock device; dropping it records a close
pub struct MockHandle {
    index: usize,
    backend: MockBackend,
}

impl MockHandle {
    fn with_device<T>(
        &self,
        f: impl FnOnce(&mut MockDevice) -> Result<T, UsbError>,
    ) -> Result<T, UsbError> {
        let mut state = self.backend.shared.lock();
        let slot = state.slots.get_mut(self.index).ok_or(UsbError::NoDevice)?;
        if !slot.attached {
            return Err(UsbError::NoDevice);
        }
        f(&mut slot.device)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.backend.record(MockCall::Close { device: self.index });
        if let Some(slot) = self.backend.shared.lock().slots.get_mut(self.index) {
            slot.open_handles = slot.open_handles.saturating_sub(1);
        }
    }
}

impl BackendHandle for MockHandle {
    fn set_active_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        self.backend.record(MockCall::SetConfiguration {
            device: self.index,
            value,
        });
        self.with_device(|d| {
            if d.configurations.iter().any(|c| c.value == value) {
                Ok(())
            } else {
                Err(UsbError::NotFound)
            }
        })
    }

    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError> {
        self.with_device(|d| Ok(d.kernel_drivers.contains(&interface)))
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        self.backend.record(MockCall::DetachKernelDriver {
            device: self.index,
            interface,
        });
        self.with_device(|d| match &d.detach_error {
            Some(e) => Err(e.clone()),
            None => {
                d.kernel_drivers.remove(&interface);
                Ok(())
            }
        })
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        self.backend.record(MockCall::AttachKernelDriver {
            device: self.index,
            interface,
        });
        self.with_device(|d| {
            d.kernel_drivers.insert(interface);
            Ok(())
        })
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.backend.record(MockCall::ClaimInterface {
            device: self.index,
            interface,
        });
        self.with_device(|d| match &d.claim_error {
            Some(e) => Err(e.clone()),
            None if d.kernel_drivers.contains(&interface) => Err(UsbError::Busy),
            None => Ok(()),
        })
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.backend.record(MockCall::ReleaseInterface {
            device: self.index,
            interface,
        });
        self.with_device(|_| Ok(()))
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), UsbError> {
        self.backend.record(MockCall::SetAlternateSetting {
            device: self.index,
            interface,
            setting,
        });
        self.with_device(|_| Ok(()))
    }

    fn reset(&mut self) -> Result<(), UsbError> {
        self.backend.record(MockCall::Reset { device: self.index });
        self.with_device(|d| match &d.reset_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        })
    }

    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, BulkError> {
        self.backend.record(MockCall::BulkTransfer {
            device: self.index,
            endpoint,
            len: buf.len(),
        });
        let scripted = self
            .with_device(|d| Ok(d.bulk_results.pop_front()))
            .map_err(|error| BulkError {
                error,
                transferred: 0,
            })?;

        let result = scripted.unwrap_or(Ok(buf.len()));
        let moved = match &result {
            Ok(n) => *n,
            Err(e) => e.transferred,
        }
        .min(buf.len());

        if endpoint & 0x80 != 0 {
            buf[..moved].copy_from_slice(&create_mock_bulk_data(moved));
        }
        result
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), UsbError> {
        self.backend.record(MockCall::ClearHalt {
            device: self.index,
            endpoint,
        });
        self.with_device(|_| Ok(()))
    }
}
