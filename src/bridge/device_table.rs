//! Owned arena of device records addressed by generation-checked handles.

use super::catalog::{DeviceRecord, DeviceState};
use crate::error::{BridgeError, Result};
use crate::zigbee::{IeeeAddr, ShortAddr};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::time::Instant;

/// Handle to a device slot. Stale once the slot has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    index: u16,
    generation: u32,
}

impl DeviceId {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}.{}", self.index, self.generation)
    }
}

struct DeviceSlot {
    record: Mutex<DeviceRecord>,
    /// Signalled whenever a waiter-visible field of the record changes.
    changed: Condvar,
}

/// Fixed-capacity table of device records, one lock per record.
///
/// Callers must never hold two record locks at once.
pub struct DeviceTable {
    slots: Vec<DeviceSlot>,
    claim: Mutex<()>,
}

impl DeviceTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        let slots = (0..capacity)
            .map(|_| DeviceSlot {
                record: Mutex::new(DeviceRecord::default()),
                changed: Condvar::new(),
            })
            .collect();
        Self {
            slots,
            claim: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, id: DeviceId) -> Result<&DeviceSlot> {
        self.slots
            .get(id.index())
            .ok_or_else(|| BridgeError::UnknownDevice(id.to_string()))
    }

    /// Lock the record behind `id`, failing if the handle is stale.
    pub fn lock(&self, id: DeviceId) -> Result<MutexGuard<'_, DeviceRecord>> {
        let guard = self.slot(id)?.record.lock();
        if guard.generation != id.generation || !guard.is_live() {
            return Err(BridgeError::UnknownDevice(id.to_string()));
        }
        Ok(guard)
    }

    pub fn notify(&self, id: DeviceId) {
        if let Ok(slot) = self.slot(id) {
            slot.changed.notify_all();
        }
    }

    /// Block until `ready` holds for the record or `deadline` passes.
    ///
    /// Returns `Ok(false)` on timeout and `UnknownDevice` if the record is
    /// released while waiting.
    pub fn wait_until<F>(&self, id: DeviceId, deadline: Instant, mut ready: F) -> Result<bool>
    where
        F: FnMut(&DeviceRecord) -> bool,
    {
        let slot = self.slot(id)?;
        let mut guard = slot.record.lock();
        loop {
            if guard.generation != id.generation || !guard.is_live() {
                return Err(BridgeError::UnknownDevice(id.to_string()));
            }
            if ready(&guard) {
                return Ok(true);
            }
            if slot.changed.wait_until(&mut guard, deadline).timed_out() {
                return Ok(ready(&guard)
                    && guard.generation == id.generation
                    && guard.is_live());
            }
        }
    }

    /// Take a free slot for a newly announced device.
    pub fn claim(&self, short_addr: ShortAddr, ieee_addr: IeeeAddr) -> Result<DeviceId> {
        let _claim = self.claim.lock();
        for (index, slot) in self.slots.iter().enumerate() {
            let mut record = slot.record.lock();
            if record.is_live() {
                continue;
            }
            record.short_addr = short_addr;
            record.ieee_addr = ieee_addr;
            record.advance(DeviceState::IeeeAddrDiscovery);
            return Ok(DeviceId {
                index: index as u16,
                generation: record.generation,
            });
        }
        Err(BridgeError::CapacityExceeded("device table"))
    }

    /// Zero the record and invalidate every outstanding handle to it.
    pub fn release(&self, id: DeviceId) -> Result<DeviceRecord> {
        let slot = self.slot(id)?;
        let released = {
            let mut record = self.lock(id)?;
            let snapshot = record.clone();
            record.release();
            snapshot
        };
        slot.changed.notify_all();
        Ok(released)
    }

    fn find(&self, mut pred: impl FnMut(&DeviceRecord) -> bool) -> Option<DeviceId> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let record = slot.record.lock();
            (record.is_live() && pred(&record)).then(|| DeviceId {
                index: index as u16,
                generation: record.generation,
            })
        })
    }

    pub fn find_by_short(&self, short_addr: ShortAddr) -> Option<DeviceId> {
        self.find(|r| r.short_addr == short_addr)
    }

    pub fn find_by_ieee(&self, ieee_addr: IeeeAddr) -> Option<DeviceId> {
        if ieee_addr.is_unset() {
            return None;
        }
        self.find(|r| r.ieee_addr == ieee_addr)
    }

    pub fn live_devices(&self) -> Vec<DeviceId> {
        let mut ids = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let record = slot.record.lock();
            if record.is_live() {
                ids.push(DeviceId {
                    index: index as u16,
                    generation: record.generation,
                });
            }
        }
        ids
    }

    pub fn snapshot(&self, id: DeviceId) -> Result<DeviceRecord> {
        Ok(self.lock(id)?.clone())
    }
}
