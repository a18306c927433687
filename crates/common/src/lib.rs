//! Common building blocks for usbcomm
//!
//! This crate provides the pieces shared between the session core and its
//! consumers: the USB data model, error types, the platform backend traits,
//! the hotplug notification channel, logging setup and test utilities.

pub mod backend;
pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb_types;

pub use backend::{Backend, BackendDevice, BackendHandle, BulkError};
pub use channel::{HotplugEvent, HotplugEvents, HotplugNotifier, hotplug_channel};
pub use error::{Error, INVALID_HANDLE_CODE, Result, UsbError};
pub use logging::setup_logging;
pub use usb_types::{
    AltSetting, Configuration, DescriptorTree, DeviceIdentity, DeviceSpeed, Endpoint,
    EndpointTransferType, HandleId, HotplugFilter, Interface, InterfaceSelector, VidPidSet,
    parse_hex_id,
};
