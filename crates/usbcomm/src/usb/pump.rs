//! USB event pump
//!
//! Dedicated thread that drives libusb pending-event processing so that
//! hotplug callbacks fire without the caller polling. The loop waits at most
//! one poll interval per iteration, which bounds how long `stop` takes.

use common::{Backend, UsbError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long one iteration waits for events
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const THREAD_NAME: &str = "usb-event-pump";

/// Background event processing thread
pub struct EventPump<B: Backend> {
    backend: B,
    poll_interval: Duration,
    stopped: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<B: Backend> EventPump<B> {
    pub fn new(backend: B, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
            stopped: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Spawn the pump thread unless it is already running
    pub fn start(&mut self) -> common::Result<()> {
        if self.is_running() && !self.stopped.load(Ordering::Acquire) {
            debug!("Event pump already running");
            return Ok(());
        }

        // A previous thread may still be winding down
        self.join();
        self.stopped.store(false, Ordering::Release);

        let backend = self.backend.clone();
        let stopped = Arc::clone(&self.stopped);
        let poll_interval = self.poll_interval;

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(backend, stopped, poll_interval))?;

        self.thread = Some(thread);
        Ok(())
    }

    /// Ask the thread to exit after its current iteration
    pub fn set_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.set_stopped();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Event pump thread panicked");
            }
        }
    }
}

impl<B: Backend> Drop for EventPump<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<B: Backend>(backend: B, stopped: Arc<AtomicBool>, poll_interval: Duration) {
    info!("USB event pump started");

    while !stopped.load(Ordering::Acquire) {
        match backend.handle_events(poll_interval) {
            Ok(()) => {}
            Err(UsbError::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(poll_interval);
            }
        }
    }

    info!("USB event pump stopped");
}
