//! usbcomm
//!
//! Session management for USB peripherals on top of libusb: enumerate
//! attached devices, open the ones an application cares about, claim
//! interfaces, run bulk transfers and watch for hotplug events.

pub mod config;
pub mod usb;

pub use usb::{DeviceSession, EventPump, HotplugMonitor, LibusbBackend, SessionOptions};
