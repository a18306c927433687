//! Hotplug monitor integration tests
//!
//! # Test Scenarios
//! - Arrival/departure notifications through the event pump
//! - Deregistration semantics
//! - Platforms without hotplug support
//! - Re-opening a session from the observer side
//!
//! Run with: `cargo test -p usbcomm --test hotplug_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockBackend, MockDevice, with_timeout};
use common::{Error, HotplugEvent, HotplugFilter, VidPidSet};
use std::time::Duration;
use usbcomm::{DeviceSession, HotplugMonitor, SessionOptions};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_plug_produces_one_arrival() {
    let backend = MockBackend::new();
    let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor.register(HotplugFilter::any()).unwrap();

    backend.plug(MockDevice::new(0x04b4, 0x00f1));

    let event = with_timeout(POLL_INTERVAL * 2, events.recv())
        .await
        .expect("no event within the poll window")
        .unwrap();
    assert_eq!(event, HotplugEvent::Arrived);

    tokio::time::sleep(POLL_INTERVAL * 2).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_unplug_produces_departure() {
    let backend = MockBackend::new();
    let index = backend.add_device(MockDevice::new(0x04b4, 0x00f1));
    let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor.register(HotplugFilter::any()).unwrap();

    backend.unplug(index);

    let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, HotplugEvent::Left);
    assert!(!event.attached());
}

#[tokio::test]
async fn test_vendor_filter() {
    let backend = MockBackend::new();
    let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor
        .register(HotplugFilter {
            vendor_id: Some(0x04b4),
            product_id: Some(0x00f1),
            device_class: None,
        })
        .unwrap();

    backend.plug(MockDevice::new(0x04b4, 0x1004));
    backend.plug(MockDevice::new(0x04b4, 0x00f1));

    let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, HotplugEvent::Arrived);

    tokio::time::sleep(POLL_INTERVAL * 2).await;
    assert!(events.is_empty());
}

// ============================================================================
// Deregistration
// ============================================================================

#[test]
fn test_deregister_twice_is_safe() {
    let backend = MockBackend::new();
    let (mut monitor, _events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor.register(HotplugFilter::any()).unwrap();

    monitor.deregister();
    monitor.deregister();
    assert!(!monitor.is_registered());
    assert!(!monitor.is_pumping());
    assert_eq!(backend.registered_callbacks(), 0);
}

#[test]
fn test_deregister_without_register() {
    let backend = MockBackend::new();
    let (mut monitor, _events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor.deregister();
    assert_eq!(backend.handle_events_calls(), 0);
}

#[test]
fn test_no_events_after_deregister() {
    let backend = MockBackend::new();
    let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor.register(HotplugFilter::any()).unwrap();
    monitor.deregister();

    let calls = backend.handle_events_calls();
    backend.plug(MockDevice::new(0x04b4, 0x00f1));
    std::thread::sleep(POLL_INTERVAL * 3);

    assert!(events.try_recv().is_none());
    assert_eq!(backend.handle_events_calls(), calls);
}

#[tokio::test]
async fn test_register_again_after_deregister() {
    let backend = MockBackend::new();
    let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor.register(HotplugFilter::any()).unwrap();
    monitor.deregister();
    monitor.register(HotplugFilter::any()).unwrap();

    backend.plug(MockDevice::new(0x04b4, 0x00f1));
    let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, HotplugEvent::Arrived);
}

// ============================================================================
// Capability
// ============================================================================

#[test]
fn test_register_without_hotplug_support() {
    let backend = MockBackend::without_hotplug();
    let (mut monitor, _events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);

    let err = monitor.register(HotplugFilter::any()).unwrap_err();
    assert!(matches!(err, Error::Unsupported));
    assert!(!monitor.is_pumping());
    assert_eq!(backend.registered_callbacks(), 0);

    std::thread::sleep(POLL_INTERVAL * 2);
    assert_eq!(backend.handle_events_calls(), 0);
}

// ============================================================================
// Observer re-opens the session
// ============================================================================

#[test]
fn test_observer_reopens_on_arrival() {
    let backend = MockBackend::new();
    let (mut monitor, events) = HotplugMonitor::with_backend(backend.clone(), POLL_INTERVAL);
    monitor.register(HotplugFilter::any()).unwrap();

    let set: VidPidSet = [(0x04b4, 0x00f1)].into_iter().collect();
    let mut session = DeviceSession::with_backend(backend.clone(), SessionOptions::default());
    assert_eq!(session.open(&set).unwrap(), 0);

    backend.plug(MockDevice::new(0x04b4, 0x00f1));
    assert_eq!(events.recv_blocking().unwrap(), HotplugEvent::Arrived);
    assert_eq!(session.open(&set).unwrap(), 1);

    drop(session);
    monitor.deregister();
}
