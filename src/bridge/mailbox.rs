//! Single-slot hand-off from the Zigbee thread to the Matter thread.
//!
//! A posted message stays in the slot until the Matter side has fully
//! handled it and calls [`Mailbox::finish`]; a second poster blocks until
//! then.

use super::device_table::DeviceId;
use crate::error::{BridgeError, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BridgeMessage {
    AddDevice(DeviceId),
    RemoveDevice(DeviceId),
    FactoryReset,
}

#[derive(Debug, Default)]
struct Slot {
    message: Option<BridgeMessage>,
    /// The receiver has the message and is working on it.
    taken: bool,
}

#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `message` in the slot, waiting up to `timeout` for it to free up.
    pub fn post(&self, message: BridgeMessage, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.message.is_some() {
            if self.changed.wait_until(&mut slot, deadline).timed_out() && slot.message.is_some() {
                return Err(BridgeError::Timeout(timeout.as_millis() as u64));
            }
        }
        slot.message = Some(message);
        slot.taken = false;
        self.changed.notify_all();
        Ok(())
    }

    /// Wait up to `timeout` for a message. The slot stays occupied until
    /// [`Mailbox::finish`].
    pub fn receive(&self, timeout: Duration) -> Option<BridgeMessage> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(message) = slot.message
                && !slot.taken
            {
                slot.taken = true;
                return Some(message);
            }
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                let Some(message) = slot.message.filter(|_| !slot.taken) else {
                    return None;
                };
                slot.taken = true;
                return Some(message);
            }
        }
    }

    /// Release the slot after the received message has been handled.
    pub fn finish(&self) {
        let mut slot = self.slot.lock();
        slot.message = None;
        slot.taken = false;
        self.changed.notify_all();
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().message.is_none()
    }
}
