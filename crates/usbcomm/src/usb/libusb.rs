//! libusb backend
//!
//! Implements the platform traits on top of rusb. Each [`LibusbBackend`] owns
//! one libusb context; clones share it.

use common::{
    AltSetting, Backend, BackendDevice, BackendHandle, BulkError, Configuration, DeviceIdentity,
    DeviceSpeed, Endpoint, EndpointTransferType, Error, HotplugEvent, HotplugFilter,
    HotplugNotifier, Interface, UsbError,
};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::os::raw::{c_int, c_uint};
use std::time::Duration;
use tracing::debug;

/// Platform session backed by a libusb context
#[derive(Clone)]
pub struct LibusbBackend {
    context: Context,
}

impl LibusbBackend {
    /// Create a new libusb context
    pub fn new() -> common::Result<Self> {
        let mut context =
            Context::new().map_err(|e| Error::Initialization(map_rusb_error(e)))?;
        context.set_log_level(rusb::LogLevel::Warning);

        debug!("Created libusb context");
        Ok(Self { context })
    }
}

impl Backend for LibusbBackend {
    type Device = LibusbDevice;
    type Handle = LibusbHandle;
    type Registration = Registration<Context>;

    fn devices(&self) -> Result<Vec<LibusbDevice>, UsbError> {
        let list = self.context.devices().map_err(map_rusb_error)?;
        Ok(list.iter().map(|device| LibusbDevice { device }).collect())
    }

    fn has_hotplug(&self) -> bool {
        rusb::has_hotplug()
    }

    fn register_hotplug(
        &self,
        filter: &HotplugFilter,
        notifier: HotplugNotifier,
    ) -> Result<Registration<Context>, UsbError> {
        let mut builder = HotplugBuilder::new();
        builder.enumerate(false);
        if let Some(class) = filter.device_class {
            builder.class(class);
        }
        if let Some(vendor_id) = filter.vendor_id {
            builder.vendor_id(vendor_id);
        }
        if let Some(product_id) = filter.product_id {
            builder.product_id(product_id);
        }

        builder
            .register(&self.context, Box::new(ForwardingCallback { notifier }))
            .map_err(map_rusb_error)
    }

    fn handle_events(&self, timeout: Duration) -> Result<(), UsbError> {
        self.context
            .handle_events(Some(timeout))
            .map_err(map_rusb_error)
    }
}

/// Hot-plug callback handler
///
/// Runs on the event pump thread and only forwards the event.
struct ForwardingCallback {
    notifier: HotplugNotifier,
}

impl Hotplug<Context> for ForwardingCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.notifier.notify(HotplugEvent::Arrived);
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.notifier.notify(HotplugEvent::Left);
    }
}

/// Entry in a libusb device list
pub struct LibusbDevice {
    device: Device<Context>,
}

impl BackendDevice for LibusbDevice {
    type Handle = LibusbHandle;

    fn identity(&self) -> Result<DeviceIdentity, UsbError> {
        let descriptor = self.device.device_descriptor().map_err(map_rusb_error)?;

        Ok(DeviceIdentity {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: self.device.bus_number(),
            device_address: self.device.address(),
            port: self.device.port_number(),
            speed: map_device_speed(self.device.speed()),
            device_class: descriptor.class_code(),
        })
    }

    fn configurations(&self) -> Result<Vec<Configuration>, UsbError> {
        let descriptor = self.device.device_descriptor().map_err(map_rusb_error)?;
        let mut configurations = Vec::with_capacity(descriptor.num_configurations() as usize);

        for index in 0..descriptor.num_configurations() {
            let config = self
                .device
                .config_descriptor(index)
                .map_err(map_rusb_error)?;

            let interfaces = config
                .interfaces()
                .map(|interface| Interface {
                    number: interface.number(),
                    alt_settings: interface
                        .descriptors()
                        .map(|alt| AltSetting {
                            class: alt.class_code(),
                            number: alt.setting_number(),
                            endpoints: alt
                                .endpoint_descriptors()
                                .map(|ep| Endpoint {
                                    address: ep.address(),
                                    transfer_type: map_transfer_type(ep.transfer_type()),
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect();

            configurations.push(Configuration {
                value: config.number(),
                interfaces,
            });
        }

        Ok(configurations)
    }

    fn open(&self) -> Result<LibusbHandle, UsbError> {
        let handle = self.device.open().map_err(map_rusb_error)?;
        Ok(LibusbHandle { handle })
    }
}

/// Opened libusb device; dropping it calls libusb_close
pub struct LibusbHandle {
    handle: DeviceHandle<Context>,
}

impl BackendHandle for LibusbHandle {
    fn set_active_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        self.handle
            .set_active_configuration(value)
            .map_err(map_rusb_error)
    }

    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError> {
        self.handle
            .kernel_driver_active(interface)
            .map_err(map_rusb_error)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .detach_kernel_driver(interface)
            .map_err(map_rusb_error)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .attach_kernel_driver(interface)
            .map_err(map_rusb_error)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), UsbError> {
        self.handle
            .set_alternate_setting(interface, setting)
            .map_err(map_rusb_error)
    }

    fn reset(&mut self) -> Result<(), UsbError> {
        self.handle.reset().map_err(map_rusb_error)
    }

    /// rusb's read_bulk/write_bulk drop the byte count when the transfer
    /// times out, so this goes through libusb_bulk_transfer directly.
    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, BulkError> {
        let length = c_int::try_from(buf.len()).map_err(|_| BulkError {
            error: UsbError::InvalidParam,
            transferred: 0,
        })?;
        let timeout_ms = timeout_millis(timeout);
        let mut transferred: c_int = 0;

        // SAFETY: the handle stays open for the lifetime of `self`, the
        // transfer is synchronous, and `length` is the size of `buf`.
        let rc = unsafe {
            rusb::ffi::libusb_bulk_transfer(
                self.handle.as_raw(),
                endpoint,
                buf.as_mut_ptr(),
                length,
                &mut transferred,
                timeout_ms,
            )
        };

        let transferred = usize::try_from(transferred).unwrap_or(0);
        if rc == 0 {
            Ok(transferred)
        } else {
            Err(BulkError {
                error: map_libusb_code(rc),
                transferred,
            })
        }
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), UsbError> {
        self.handle.clear_halt(endpoint).map_err(map_rusb_error)
    }
}

/// libusb treats 0 as "no timeout"; a non-zero sub-millisecond timeout is
/// rounded up so it does not turn into an infinite wait.
fn timeout_millis(timeout: Duration) -> c_uint {
    if timeout.is_zero() {
        return 0;
    }
    c_uint::try_from(timeout.as_millis())
        .unwrap_or(c_uint::MAX)
        .max(1)
}

/// Map rusb::Error to UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::AccessDenied,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Pipe => UsbError::Stall,
        rusb::Error::Interrupted => UsbError::Interrupted,
        rusb::Error::NoMem => UsbError::NoMem,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other(err.to_string()),
    }
}

/// Map a raw libusb return code to UsbError
pub fn map_libusb_code(code: c_int) -> UsbError {
    use rusb::ffi::constants::*;

    match code {
        LIBUSB_ERROR_IO => UsbError::Io,
        LIBUSB_ERROR_INVALID_PARAM => UsbError::InvalidParam,
        LIBUSB_ERROR_ACCESS => UsbError::AccessDenied,
        LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
        LIBUSB_ERROR_BUSY => UsbError::Busy,
        LIBUSB_ERROR_TIMEOUT => UsbError::Timeout,
        LIBUSB_ERROR_OVERFLOW => UsbError::Overflow,
        LIBUSB_ERROR_PIPE => UsbError::Stall,
        LIBUSB_ERROR_INTERRUPTED => UsbError::Interrupted,
        LIBUSB_ERROR_NO_MEM => UsbError::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => UsbError::NotSupported,
        other => UsbError::Other(format!("libusb error {}", other)),
    }
}

/// Map rusb device speed to DeviceSpeed
fn map_device_speed(speed: rusb::Speed) -> DeviceSpeed {
    match speed {
        rusb::Speed::Low => DeviceSpeed::Low,
        rusb::Speed::Full => DeviceSpeed::Full,
        rusb::Speed::High => DeviceSpeed::High,
        rusb::Speed::Super => DeviceSpeed::Super,
        rusb::Speed::SuperPlus => DeviceSpeed::SuperPlus,
        _ => DeviceSpeed::Unknown,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> EndpointTransferType {
    match transfer_type {
        rusb::TransferType::Control => EndpointTransferType::Control,
        rusb::TransferType::Isochronous => EndpointTransferType::Isochronous,
        rusb::TransferType::Bulk => EndpointTransferType::Bulk,
        rusb::TransferType::Interrupt => EndpointTransferType::Interrupt,
    }
}
