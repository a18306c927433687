//! Hotplug monitoring
//!
//! [`HotplugMonitor`] installs one arrival+departure callback and runs an
//! [`EventPump`] so the callback fires in the background. Events are
//! republished on a channel; the observer decides what to do with them on
//! its own thread.

use crate::usb::libusb::LibusbBackend;
use crate::usb::pump::EventPump;
use common::{
    Backend, Error, HotplugEvents, HotplugFilter, HotplugNotifier, Result, hotplug_channel,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HotplugMonitor<B: Backend = LibusbBackend> {
    /// Dropped before the pump so the callback is gone before the thread stops
    registration: Option<B::Registration>,
    filter: Option<HotplugFilter>,
    pump: EventPump<B>,
    notifier: HotplugNotifier,
    backend: B,
}

impl HotplugMonitor<LibusbBackend> {
    /// Create a monitor with its own libusb context
    ///
    /// Returns the monitor and the receiving end of its event channel.
    pub fn new(poll_interval: Duration) -> Result<(Self, HotplugEvents)> {
        Ok(Self::with_backend(LibusbBackend::new()?, poll_interval))
    }
}

impl<B: Backend> HotplugMonitor<B> {
    pub fn with_backend(backend: B, poll_interval: Duration) -> (Self, HotplugEvents) {
        let (notifier, events) = hotplug_channel();
        let monitor = Self {
            registration: None,
            filter: None,
            pump: EventPump::new(backend.clone(), poll_interval),
            notifier,
            backend,
        };
        (monitor, events)
    }

    /// Install the hotplug callback and start the event pump
    ///
    /// Any previous registration is removed first. Fails with
    /// [`Error::Unsupported`] without starting a thread when the platform
    /// has no hotplug support.
    pub fn register(&mut self, filter: HotplugFilter) -> Result<()> {
        if !self.backend.has_hotplug() {
            warn!("USB hotplug not supported on this platform");
            return Err(Error::Unsupported);
        }

        self.deregister();

        let registration = self
            .backend
            .register_hotplug(&filter, self.notifier.clone())?;
        self.registration = Some(registration);
        self.filter = Some(filter);

        if let Err(e) = self.pump.start() {
            warn!("Failed to start USB event pump: {}", e);
            self.registration = None;
            self.filter = None;
            return Err(e);
        }

        info!(
            "Hot-plug callback registered (class={:?}, vid={:?}, pid={:?})",
            filter.device_class, filter.vendor_id, filter.product_id
        );
        Ok(())
    }

    /// Remove the callback and stop the pump
    ///
    /// Returns once the pump thread has exited; no events are sent after
    /// that. Safe to call when not registered.
    pub fn deregister(&mut self) {
        let was_registered = self.registration.take().is_some();
        self.filter = None;
        self.pump.stop();

        if was_registered {
            debug!("Hot-plug callback deregistered");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Filter of the active registration
    pub fn filter(&self) -> Option<&HotplugFilter> {
        self.filter.as_ref()
    }

    pub fn is_pumping(&self) -> bool {
        self.pump.is_running()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> Drop for HotplugMonitor<B> {
    fn drop(&mut self) {
        self.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::HotplugEvent;
    use common::test_utils::{MockBackend, MockDevice};

    const INTERVAL: Duration = Duration::from_millis(10);

    #[test]
    fn test_register_starts_pump() {
        let backend = MockBackend::new();
        let (mut monitor, _events) = HotplugMonitor::with_backend(backend.clone(), INTERVAL);

        monitor.register(HotplugFilter::any()).unwrap();
        assert!(monitor.is_registered());
        assert!(monitor.is_pumping());
        assert_eq!(monitor.filter(), Some(&HotplugFilter::any()));
        assert_eq!(backend.registered_callbacks(), 1);

        monitor.deregister();
        assert!(!monitor.is_registered());
        assert!(!monitor.is_pumping());
        assert!(monitor.filter().is_none());
        assert_eq!(backend.registered_callbacks(), 0);
    }

    #[test]
    fn test_register_twice_replaces_registration() {
        let backend = MockBackend::new();
        let (mut monitor, _events) = HotplugMonitor::with_backend(backend.clone(), INTERVAL);

        monitor.register(HotplugFilter::any()).unwrap();
        let filter = HotplugFilter {
            vendor_id: Some(0x04b4),
            ..Default::default()
        };
        monitor.register(filter).unwrap();

        assert_eq!(backend.registered_callbacks(), 1);
        assert_eq!(monitor.filter(), Some(&filter));
        assert!(monitor.is_pumping());
    }

    #[test]
    fn test_unsupported_platform() {
        let backend = MockBackend::without_hotplug();
        let (mut monitor, _events) = HotplugMonitor::with_backend(backend.clone(), INTERVAL);

        assert!(matches!(
            monitor.register(HotplugFilter::any()),
            Err(Error::Unsupported)
        ));
        assert!(!monitor.is_registered());
        assert!(!monitor.is_pumping());
        assert_eq!(backend.handle_events_calls(), 0);
    }

    #[test]
    fn test_drop_deregisters() {
        let backend = MockBackend::new();
        let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), INTERVAL);
        monitor.register(HotplugFilter::any()).unwrap();

        drop(monitor);
        assert_eq!(backend.registered_callbacks(), 0);

        backend.plug(MockDevice::new(0x04b4, 0x00f1));
        std::thread::sleep(INTERVAL * 3);
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_events_follow_filter() {
        let backend = MockBackend::new();
        let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), INTERVAL);
        monitor
            .register(HotplugFilter {
                device_class: Some(0xff),
                ..Default::default()
            })
            .unwrap();

        backend.plug(MockDevice::new(0x1111, 0x0001).with_class(0x03));
        let index = backend.plug(MockDevice::new(0x2222, 0x0002).with_class(0xff));
        backend.unplug(index);

        assert_eq!(events.recv_blocking().unwrap(), HotplugEvent::Arrived);
        assert_eq!(events.recv_blocking().unwrap(), HotplugEvent::Left);
        monitor.deregister();
        assert!(events.is_empty());
    }
}
