//! Hotplug notification channel between the event pump thread and observers
//!
//! Callbacks run on the pump thread and must not block, so the notifier side
//! never waits: the channel is unbounded and a closed channel is only logged.

use async_channel::{Receiver, Sender, TryRecvError, unbounded};
use tracing::debug;

/// Device arrival/departure notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Arrived,
    Left,
}

impl HotplugEvent {
    pub fn attached(&self) -> bool {
        matches!(self, HotplugEvent::Arrived)
    }
}

/// Sending half, handed to the platform callback
#[derive(Debug, Clone)]
pub struct HotplugNotifier {
    tx: Sender<HotplugEvent>,
}

impl HotplugNotifier {
    /// Forward an event without blocking
    pub fn notify(&self, event: HotplugEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("Dropping hotplug event {:?}: {}", event, e);
        }
    }
}

/// Receiving half, drained by the observer on its own schedule
#[derive(Debug, Clone)]
pub struct HotplugEvents {
    rx: Receiver<HotplugEvent>,
}

impl HotplugEvents {
    /// Wait for the next event
    pub async fn recv(&self) -> crate::Result<HotplugEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait for the next event from a non-async thread
    pub fn recv_blocking(&self) -> crate::Result<HotplugEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take an event if one is queued
    pub fn try_recv(&self) -> Option<HotplugEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Take everything queued right now
    pub fn drain(&self) -> Vec<HotplugEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create the hotplug channel
///
/// Returns (HotplugNotifier for the callback, HotplugEvents for the observer)
pub fn hotplug_channel() -> (HotplugNotifier, HotplugEvents) {
    let (tx, rx) = unbounded();
    (HotplugNotifier { tx }, HotplugEvents { rx })
}
