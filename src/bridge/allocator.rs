//! Dynamic endpoint allocation on the Matter side.
//!
//! Each mapped device owns one slot of the fixed dynamic endpoint table and
//! a Matter endpoint id. Ids are handed out from a cursor that only moves
//! forward, wrapping back to the first dynamic id at the end of the range,
//! so a freed id is not reused right away.

use super::catalog::DeviceRecord;
use super::device_table::DeviceId;
use super::translator::Translator;
use crate::config::EndpointConfig;
use crate::error::{BridgeError, Result};
use crate::matter::ids::{self, AttrId, ClusterId, EndptId};
use crate::matter::{EndpointRegistration, LocalStack};
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSlot {
    pub index: usize,
    pub endpoint_id: Option<EndptId>,
    pub device: Option<DeviceId>,
    pub reachable: bool,
    pub has_on_off: bool,
    pub name: String,
    pub data_versions: Vec<(ClusterId, u32)>,
}

impl EndpointSlot {
    fn bump_data_version(&mut self, cluster_id: ClusterId) {
        if let Some((_, version)) = self
            .data_versions
            .iter_mut()
            .find(|(id, _)| *id == cluster_id)
        {
            *version = version.wrapping_add(1);
        }
    }

    pub fn data_version(&self, cluster_id: ClusterId) -> Option<u32> {
        self.data_versions
            .iter()
            .find(|(id, _)| *id == cluster_id)
            .map(|(_, v)| *v)
    }
}

/// Matter clusters for a device: the two every bridged endpoint carries,
/// then each bridged server cluster of the device, without duplicates.
pub fn cluster_list(record: &DeviceRecord, translator: &Translator) -> Vec<ClusterId> {
    let mut clusters = vec![
        ids::cluster::DESCRIPTOR,
        ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
    ];
    for endpoint in &record.endpoints {
        for cluster in endpoint.clusters.iter().filter(|c| c.is_server) {
            if let Some(local) = translator.local_cluster_for(cluster.cluster_id)
                && !clusters.contains(&local)
            {
                clusters.push(local);
            }
        }
    }
    clusters
}

pub struct EndpointAllocator {
    slots: Vec<EndpointSlot>,
    first_endpoint_id: EndptId,
    last_endpoint_id: EndptId,
    parent_endpoint_id: EndptId,
    next_endpoint_id: EndptId,
    local: Arc<dyn LocalStack>,
}

impl EndpointAllocator {
    pub fn new(config: &EndpointConfig, local: Arc<dyn LocalStack>) -> Self {
        let first = config.first_dynamic_endpoint_id;
        let last = config.last_endpoint_id.max(first);
        Self {
            slots: (0..config.dynamic_endpoint_count)
                .map(|index| EndpointSlot {
                    index,
                    ..EndpointSlot::default()
                })
                .collect(),
            first_endpoint_id: first,
            last_endpoint_id: last,
            parent_endpoint_id: config.parent_endpoint_id,
            next_endpoint_id: first,
            local,
        }
    }

    fn advance_cursor(&mut self) {
        self.next_endpoint_id = if self.next_endpoint_id >= self.last_endpoint_id {
            self.first_endpoint_id
        } else {
            self.next_endpoint_id + 1
        };
    }

    /// Register `device` in a free slot and mark it reachable.
    pub fn allocate(
        &mut self,
        device: DeviceId,
        clusters: &[ClusterId],
        name: &str,
        has_on_off: bool,
    ) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(|s| s.device.is_none())
            .ok_or_else(|| {
                error!("[Matter] No free dynamic endpoint for {} ({})", device, name);
                BridgeError::RegistrationFailed("dynamic endpoint table full".to_string())
            })?;

        let data_versions: Vec<(ClusterId, u32)> = clusters
            .iter()
            .map(|cluster| (*cluster, rand::random::<u32>()))
            .collect();

        let candidates = (self.last_endpoint_id - self.first_endpoint_id) as usize + 1;
        for _ in 0..candidates {
            let endpoint_id = self.next_endpoint_id;
            self.advance_cursor();
            let registration = EndpointRegistration {
                index,
                endpoint_id,
                parent_endpoint_id: self.parent_endpoint_id,
                device_type: ids::DEVICE_TYPE_BRIDGED_NODE,
                clusters: clusters.to_vec(),
                data_versions: data_versions.clone(),
                name: name.to_string(),
            };
            match self.local.set_dynamic_endpoint(&registration) {
                Ok(()) => {
                    self.slots[index] = EndpointSlot {
                        index,
                        endpoint_id: Some(endpoint_id),
                        device: Some(device),
                        reachable: false,
                        has_on_off,
                        name: name.to_string(),
                        data_versions,
                    };
                    info!(
                        "[Matter] {} mapped to endpoint {} (slot {})",
                        name, endpoint_id, index
                    );
                    self.mark_reachable(index);
                    return Ok(index);
                }
                Err(BridgeError::EndpointExists(id)) => {
                    warn!("[Matter] Endpoint id {} taken, trying the next one", id);
                }
                Err(e) => {
                    error!("[Matter] Registering {} failed: {}", name, e);
                    return Err(BridgeError::RegistrationFailed(e.to_string()));
                }
            }
        }
        error!("[Matter] No endpoint id left for {}", name);
        Err(BridgeError::RegistrationFailed(
            "endpoint id range exhausted".to_string(),
        ))
    }

    /// Unregister the device's endpoint and return its slot to the pool.
    pub fn free(&mut self, device: DeviceId) -> Option<usize> {
        let index = self.slot_for_device(device)?;
        self.clear(index);
        Some(index)
    }

    pub fn free_all(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].device.is_some() {
                self.clear(index);
            }
        }
    }

    fn clear(&mut self, index: usize) {
        if let Some(endpoint_id) = self.local.clear_dynamic_endpoint(index) {
            info!("[Matter] Endpoint {} released (slot {})", endpoint_id, index);
        }
        self.slots[index] = EndpointSlot {
            index,
            ..EndpointSlot::default()
        };
    }

    /// Returns whether the flag changed.
    pub fn mark_reachable(&mut self, index: usize) -> bool {
        self.set_reachable(index, true)
    }

    /// Returns whether the flag changed.
    pub fn mark_unreachable(&mut self, index: usize) -> bool {
        self.set_reachable(index, false)
    }

    fn set_reachable(&mut self, index: usize, reachable: bool) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        if slot.device.is_none() || slot.reachable == reachable {
            return false;
        }
        slot.reachable = reachable;
        let has_on_off = slot.has_on_off;
        self.attribute_changed(
            index,
            ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
            ids::basic_info::REACHABLE,
        );
        if has_on_off {
            self.attribute_changed(index, ids::cluster::ON_OFF, ids::on_off::ON_OFF);
        }
        true
    }

    /// Bump the cluster's data version and notify subscribers.
    pub fn attribute_changed(&mut self, index: usize, cluster_id: ClusterId, attr_id: AttrId) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        let Some(endpoint_id) = slot.endpoint_id else {
            return;
        };
        slot.bump_data_version(cluster_id);
        self.local
            .report_attribute_change(endpoint_id, cluster_id, attr_id);
    }

    pub fn rename(&mut self, index: usize, name: &str) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        if slot.device.is_none() || slot.name == name {
            return;
        }
        slot.name = name.to_string();
        self.attribute_changed(
            index,
            ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
            ids::basic_info::NODE_LABEL,
        );
    }

    pub fn slot(&self, index: usize) -> Option<&EndpointSlot> {
        self.slots.get(index)
    }

    pub fn slot_for_device(&self, device: DeviceId) -> Option<usize> {
        self.slots.iter().position(|s| s.device == Some(device))
    }

    pub fn device_for_endpoint(&self, endpoint_id: EndptId) -> Option<DeviceId> {
        self.slots
            .iter()
            .find(|s| s.endpoint_id == Some(endpoint_id))
            .and_then(|s| s.device)
    }

    pub fn is_reachable(&self, device: DeviceId) -> bool {
        self.slot_for_device(device)
            .is_some_and(|index| self.slots[index].reachable)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.device.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::catalog::DeviceRecord;
    use crate::bridge::device_table::DeviceTable;
    use crate::matter::InMemoryRegistry;
    use crate::zigbee::{IeeeAddr, zcl};

    fn setup(count: usize, first: EndptId, last: EndptId) -> (Arc<InMemoryRegistry>, EndpointAllocator) {
        let registry = Arc::new(InMemoryRegistry::new(count, &[0, 1]));
        let config = EndpointConfig {
            dynamic_endpoint_count: count,
            first_dynamic_endpoint_id: first,
            last_endpoint_id: last,
            parent_endpoint_id: 1,
        };
        let allocator = EndpointAllocator::new(&config, registry.clone());
        (registry, allocator)
    }

    fn devices(n: usize) -> Vec<DeviceId> {
        let table = DeviceTable::new(n);
        (0..n)
            .map(|i| table.claim(i as u16 + 1, IeeeAddr::UNSET).unwrap())
            .collect()
    }

    const CLUSTERS: [ClusterId; 3] = [
        ids::cluster::DESCRIPTOR,
        ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
        ids::cluster::ON_OFF,
    ];

    #[test]
    fn test_cluster_list_order_and_dedup() {
        let mut record = DeviceRecord::default();
        record.add_endpoint(1).unwrap();
        record.add_endpoint(2).unwrap();
        record.add_cluster(0, zcl::cluster::BASIC, true).unwrap();
        record.add_cluster(0, zcl::cluster::ON_OFF, true).unwrap();
        record.add_cluster(0, 0xFC00, true).unwrap();
        record.add_cluster(1, zcl::cluster::ON_OFF, true).unwrap();
        record.add_cluster(1, zcl::cluster::LEVEL_CONTROL, false).unwrap();

        assert_eq!(
            cluster_list(&record, &Translator::default()),
            vec![
                ids::cluster::DESCRIPTOR,
                ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
                ids::cluster::ON_OFF,
            ]
        );
    }

    #[test]
    fn test_allocate_registers_and_marks_reachable() {
        let (registry, mut allocator) = setup(2, 2, 100);
        let devs = devices(1);
        let index = allocator.allocate(devs[0], &CLUSTERS, "lamp", true).unwrap();

        let registered = registry.endpoint(index).unwrap();
        assert_eq!(registered.endpoint_id, 2);
        assert_eq!(registered.parent_endpoint_id, 1);
        assert_eq!(registered.clusters, CLUSTERS.to_vec());
        assert_eq!(registered.data_versions.len(), CLUSTERS.len());
        assert!(allocator.is_reachable(devs[0]));
        assert_eq!(allocator.device_for_endpoint(2), Some(devs[0]));

        let changes = registry.take_changes();
        assert!(changes.iter().any(|c| c.attr_id == ids::basic_info::REACHABLE));
        assert!(changes.iter().any(|c| c.cluster_id == ids::cluster::ON_OFF));
    }

    #[test]
    fn test_endpoint_ids_increase_and_wrap() {
        let (_registry, mut allocator) = setup(3, 2, 3);
        let devs = devices(3);
        let a = allocator.allocate(devs[0], &CLUSTERS, "a", false).unwrap();
        allocator.allocate(devs[1], &CLUSTERS, "b", false).unwrap();
        assert_eq!(allocator.slot(a).unwrap().endpoint_id, Some(2));

        // 2 and 3 are taken; freeing 2 lets the cursor wrap back onto it
        allocator.free(devs[0]);
        let c = allocator.allocate(devs[2], &CLUSTERS, "c", false).unwrap();
        assert_eq!(c, a);
        assert_eq!(allocator.slot(c).unwrap().endpoint_id, Some(2));
    }

    #[test]
    fn test_id_collision_is_retried() {
        let (registry, mut allocator) = setup(2, 1, 10);
        let devs = devices(1);
        // id 1 is reserved for the aggregator
        let index = allocator.allocate(devs[0], &CLUSTERS, "x", false).unwrap();
        assert_eq!(registry.endpoint(index).unwrap().endpoint_id, 2);
    }

    #[test]
    fn test_exhausted_id_range() {
        let (_registry, mut allocator) = setup(3, 2, 3);
        let devs = devices(3);
        allocator.allocate(devs[0], &CLUSTERS, "a", false).unwrap();
        allocator.allocate(devs[1], &CLUSTERS, "b", false).unwrap();
        assert!(matches!(
            allocator.allocate(devs[2], &CLUSTERS, "c", false),
            Err(BridgeError::RegistrationFailed(_))
        ));
        assert_eq!(allocator.in_use(), 2);
    }

    #[test]
    fn test_table_full() {
        let (_registry, mut allocator) = setup(1, 2, 100);
        let devs = devices(2);
        allocator.allocate(devs[0], &CLUSTERS, "a", false).unwrap();
        assert!(matches!(
            allocator.allocate(devs[1], &CLUSTERS, "b", false),
            Err(BridgeError::RegistrationFailed(_))
        ));
    }

    #[test]
    fn test_free_releases_slot_for_reuse() {
        let (registry, mut allocator) = setup(1, 2, 100);
        let devs = devices(2);
        let first = allocator.allocate(devs[0], &CLUSTERS, "a", false).unwrap();
        assert_eq!(allocator.free(devs[0]), Some(first));
        assert!(registry.registered().is_empty());
        assert_eq!(allocator.free(devs[0]), None);

        let second = allocator.allocate(devs[1], &CLUSTERS, "b", false).unwrap();
        assert_eq!(second, first);
        assert_eq!(allocator.slot(second).unwrap().endpoint_id, Some(3));
    }

    #[test]
    fn test_reachability_toggles_notify_once() {
        let (registry, mut allocator) = setup(1, 2, 100);
        let devs = devices(1);
        let index = allocator.allocate(devs[0], &CLUSTERS, "a", false).unwrap();
        let bdbi = ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION;
        let before = allocator.slot(index).unwrap().data_version(bdbi).unwrap();
        registry.take_changes();

        assert!(allocator.mark_unreachable(index));
        assert!(!allocator.mark_unreachable(index));
        assert!(!allocator.is_reachable(devs[0]));
        assert!(allocator.mark_reachable(index));

        let changes = registry.take_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.attr_id == ids::basic_info::REACHABLE));
        assert_eq!(
            allocator.slot(index).unwrap().data_version(bdbi),
            Some(before.wrapping_add(2))
        );
    }

    #[test]
    fn test_rename_notifies_node_label() {
        let (registry, mut allocator) = setup(1, 2, 100);
        let devs = devices(1);
        let index = allocator.allocate(devs[0], &CLUSTERS, "a", false).unwrap();
        registry.take_changes();
        allocator.rename(index, "b");
        allocator.rename(index, "b");
        let changes = registry.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].attr_id, ids::basic_info::NODE_LABEL);
        assert_eq!(allocator.slot(index).unwrap().name, "b");
    }

    #[test]
    fn test_free_all() {
        let (registry, mut allocator) = setup(2, 2, 100);
        let devs = devices(2);
        allocator.allocate(devs[0], &CLUSTERS, "a", false).unwrap();
        allocator.allocate(devs[1], &CLUSTERS, "b", false).unwrap();
        allocator.free_all();
        assert_eq!(allocator.in_use(), 0);
        assert!(registry.registered().is_empty());
    }
}
