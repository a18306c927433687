//! USB subsystem
//!
//! - `catalog`: device enumeration and VID/PID matching
//! - `session`: open handles and claimed interfaces
//! - `pump`: background thread driving libusb event processing
//! - `hotplug`: arrival/departure callback registration
//! - `libusb`: the rusb-backed platform implementation
//!
//! Everything except `libusb` is generic over [`common::Backend`].

pub mod catalog;
pub mod hotplug;
pub mod libusb;
pub mod pump;
pub mod session;

pub use hotplug::HotplugMonitor;
pub use libusb::{LibusbBackend, map_rusb_error};
pub use pump::{DEFAULT_POLL_INTERVAL, EventPump};
pub use session::{DeviceSession, SessionOptions};
