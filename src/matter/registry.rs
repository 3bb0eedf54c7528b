//! In-process dynamic endpoint table.
//!
//! Stands in for the Matter data model when running the demo binary or
//! tests: it enforces the same constraints (fixed slot count, unique
//! endpoint ids) and records the most recent change notifications so they
//! can be observed.

use super::ids::{AttrId, ClusterId, EndptId};
use super::{EndpointRegistration, LocalStack};
use crate::error::{BridgeError, Result};
use heapless::HistoryBuffer;
use log::{debug, info};
use parking_lot::Mutex;

/// Change notifications kept between drains; older ones are overwritten.
pub const MAX_RECORDED_CHANGES: usize = 256;

/// A change notification as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeChange {
    pub endpoint_id: EndptId,
    pub cluster_id: ClusterId,
    pub attr_id: AttrId,
}

pub struct InMemoryRegistry {
    endpoints: Mutex<Vec<Option<EndpointRegistration>>>,
    /// Ids owned by static endpoints (root node, aggregator).
    reserved: Vec<EndptId>,
    changes: Mutex<HistoryBuffer<AttributeChange, MAX_RECORDED_CHANGES>>,
}

impl InMemoryRegistry {
    pub fn new(capacity: usize, reserved: &[EndptId]) -> Self {
        Self {
            endpoints: Mutex::new(vec![None; capacity]),
            reserved: reserved.to_vec(),
            changes: Mutex::new(HistoryBuffer::new()),
        }
    }

    pub fn endpoint(&self, index: usize) -> Option<EndpointRegistration> {
        self.endpoints.lock().get(index).cloned().flatten()
    }

    pub fn find(&self, endpoint_id: EndptId) -> Option<EndpointRegistration> {
        self.endpoints
            .lock()
            .iter()
            .flatten()
            .find(|r| r.endpoint_id == endpoint_id)
            .cloned()
    }

    pub fn registered(&self) -> Vec<EndpointRegistration> {
        self.endpoints.lock().iter().flatten().cloned().collect()
    }

    /// Drain the notifications recorded so far, oldest first.
    pub fn take_changes(&self) -> Vec<AttributeChange> {
        let mut changes = self.changes.lock();
        let drained = changes.oldest_ordered().copied().collect();
        changes.clear();
        drained
    }
}

impl LocalStack for InMemoryRegistry {
    fn set_dynamic_endpoint(&self, registration: &EndpointRegistration) -> Result<()> {
        let mut endpoints = self.endpoints.lock();
        if self.reserved.contains(&registration.endpoint_id)
            || endpoints
                .iter()
                .flatten()
                .any(|r| r.endpoint_id == registration.endpoint_id)
        {
            return Err(BridgeError::EndpointExists(registration.endpoint_id));
        }
        let slot = endpoints.get_mut(registration.index).ok_or_else(|| {
            BridgeError::RegistrationFailed(format!("no dynamic slot {}", registration.index))
        })?;
        if slot.is_some() {
            return Err(BridgeError::RegistrationFailed(format!(
                "dynamic slot {} in use",
                registration.index
            )));
        }
        info!(
            "[Matter] Endpoint {} ({}) added in slot {} with {} clusters",
            registration.endpoint_id,
            registration.name,
            registration.index,
            registration.clusters.len()
        );
        *slot = Some(registration.clone());
        Ok(())
    }

    fn clear_dynamic_endpoint(&self, index: usize) -> Option<EndptId> {
        let cleared = self.endpoints.lock().get_mut(index)?.take()?;
        info!(
            "[Matter] Endpoint {} removed from slot {}",
            cleared.endpoint_id, index
        );
        Some(cleared.endpoint_id)
    }

    fn report_attribute_change(&self, endpoint_id: EndptId, cluster_id: ClusterId, attr_id: AttrId) {
        debug!(
            "[Matter] Changed: endpoint {} cluster 0x{:04x} attribute 0x{:04x}",
            endpoint_id, cluster_id, attr_id
        );
        self.changes.lock().write(AttributeChange {
            endpoint_id,
            cluster_id,
            attr_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(index: usize, endpoint_id: EndptId) -> EndpointRegistration {
        EndpointRegistration {
            index,
            endpoint_id,
            parent_endpoint_id: 1,
            device_type: 0x0013,
            clusters: vec![0x001D, 0x0039],
            data_versions: vec![(0x001D, 1), (0x0039, 2)],
            name: format!("ep{}", endpoint_id),
        }
    }

    #[test]
    fn test_register_and_clear() {
        let registry = InMemoryRegistry::new(2, &[0, 1]);
        registry.set_dynamic_endpoint(&registration(0, 2)).unwrap();
        assert_eq!(registry.find(2).unwrap().index, 0);
        assert_eq!(registry.clear_dynamic_endpoint(0), Some(2));
        assert_eq!(registry.clear_dynamic_endpoint(0), None);
        assert!(registry.registered().is_empty());
    }

    #[test]
    fn test_duplicate_and_reserved_ids() {
        let registry = InMemoryRegistry::new(2, &[0, 1]);
        registry.set_dynamic_endpoint(&registration(0, 2)).unwrap();
        assert_eq!(
            registry.set_dynamic_endpoint(&registration(1, 2)),
            Err(BridgeError::EndpointExists(2))
        );
        assert_eq!(
            registry.set_dynamic_endpoint(&registration(1, 1)),
            Err(BridgeError::EndpointExists(1))
        );
        assert!(matches!(
            registry.set_dynamic_endpoint(&registration(5, 9)),
            Err(BridgeError::RegistrationFailed(_))
        ));
    }

    #[test]
    fn test_changes_are_recorded() {
        let registry = InMemoryRegistry::new(1, &[]);
        registry.report_attribute_change(2, 0x0006, 0);
        registry.report_attribute_change(2, 0x0039, 0x11);
        let changes = registry.take_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].attr_id, 0x11);
        assert!(registry.take_changes().is_empty());
    }

    #[test]
    fn test_undrained_changes_stay_bounded() {
        let registry = InMemoryRegistry::new(1, &[]);
        let total = MAX_RECORDED_CHANGES as u32 + 10;
        for attr_id in 0..total {
            registry.report_attribute_change(2, 0x0006, attr_id);
        }
        let changes = registry.take_changes();
        assert_eq!(changes.len(), MAX_RECORDED_CHANGES);
        assert_eq!(changes[0].attr_id, 10);
        assert_eq!(changes.last().unwrap().attr_id, total - 1);
    }
}
