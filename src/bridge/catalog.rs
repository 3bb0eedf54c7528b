//! Per-device attribute catalog.
//!
//! A [`DeviceRecord`] mirrors what discovery has learned about one Zigbee
//! node: its endpoints, their clusters and the attributes of each cluster,
//! together with cached values and the single outstanding write or command
//! per attribute/cluster. Collections are bounded by the `MAX_*` constants
//! and lookups are linear scans.

use super::discovery::InFlight;
use super::translator::LocalCommand;
use crate::error::{BridgeError, Result};
use crate::zigbee::{IeeeAddr, ShortAddr, SimpleDescriptor, zcl};
use log::info;

pub const MAX_EP_PER_DEV: usize = 8;
pub const MAX_CLUSTERS_PER_EP: usize = 32;
pub const MAX_ATTRS_PER_CLUSTER: usize = 64;
pub const MAX_ATTR_VALUE_LEN: usize = 32;
pub const MAX_COMMAND_PAYLOAD_LEN: usize = 32;

pub type AttrValue = heapless::Vec<u8, MAX_ATTR_VALUE_LEN>;
pub type CommandPayload = heapless::Vec<u8, MAX_COMMAND_PAYLOAD_LEN>;

/// Copy `bytes` into a value buffer, failing if it does not fit.
pub fn attr_value(bytes: &[u8]) -> Result<AttrValue> {
    AttrValue::from_slice(bytes).map_err(|_| BridgeError::CapacityExceeded("attribute value"))
}

/// Discovery progress of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum DeviceState {
    #[default]
    NoDevice,
    IeeeAddrDiscovery,
    ShortAddrDiscovery,
    AuthorizationDiscovery,
    AnnounceCompleted,
    ReadAttrsCompleted,
    ConfigureBinding,
    ConfigureReporting,
    Completed,
    CompletedNoToggle,
}

impl DeviceState {
    /// Whether `next` is a legal successor. Any state may fall back to
    /// `NoDevice` when the device is removed.
    pub fn can_advance_to(self, next: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, next),
            (_, NoDevice)
                | (NoDevice, IeeeAddrDiscovery)
                | (IeeeAddrDiscovery, ShortAddrDiscovery)
                | (ShortAddrDiscovery, AuthorizationDiscovery)
                | (ShortAddrDiscovery, AnnounceCompleted)
                | (AuthorizationDiscovery, AnnounceCompleted)
                | (AnnounceCompleted, ReadAttrsCompleted)
                | (ReadAttrsCompleted, ConfigureBinding)
                | (ConfigureBinding, ConfigureReporting)
                | (ConfigureReporting, Completed)
                | (ConfigureReporting, CompletedNoToggle)
        )
    }

    pub fn is_completed(self) -> bool {
        matches!(self, DeviceState::Completed | DeviceState::CompletedNoToggle)
    }

    /// The device has a Matter endpoint (or is being given one).
    pub fn is_handed_off(self) -> bool {
        matches!(
            self,
            DeviceState::ReadAttrsCompleted
                | DeviceState::ConfigureBinding
                | DeviceState::ConfigureReporting
                | DeviceState::Completed
                | DeviceState::CompletedNoToggle
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    #[default]
    NoClusterInfo,
    Requested,
    Known,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterDiscoveryState {
    #[default]
    NoDiscAttrsInfo,
    RequestedDiscAttrsInfo,
    KnownDiscAttrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrState {
    #[default]
    NoAttrInfo,
    DiscoveredAttr,
    ScheduledValueRead,
    RequestedValueRead,
    GotValue,
}

impl AttrState {
    pub fn is_read_pending(self) -> bool {
        matches!(
            self,
            AttrState::ScheduledValueRead | AttrState::RequestedValueRead
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub data_type: u8,
    pub value: AttrValue,
    pub sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command_id: u8,
    pub payload: CommandPayload,
    pub sent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeRecord {
    pub attr_id: u16,
    pub data_type: u8,
    pub value: AttrValue,
    pub state: AttrState,
    pub zb_status: u8,
    pub pending_write: Option<PendingWrite>,
    pub reporting_configured: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterRecord {
    pub cluster_id: u16,
    /// Server (input) side of the cluster; client clusters are never bridged.
    pub is_server: bool,
    pub disc_state: ClusterDiscoveryState,
    /// First attribute id of the next discovery page.
    pub disc_start: u16,
    pub attributes: Vec<AttributeRecord>,
    pub pending_command: Option<CommandRequest>,
    pub last_command_status: Option<u8>,
    pub bound: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRecord {
    pub endpoint_id: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub state: EndpointState,
    pub clusters: Vec<ClusterRecord>,
    pub num_in: usize,
    pub num_out: usize,
}

/// One bit per well-known ZCL cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u64);

impl Capabilities {
    fn bit(cluster_id: u16) -> Option<u32> {
        match cluster_id {
            0x0000..=0x0027 => Some(cluster_id as u32),
            zcl::cluster::DOOR_LOCK => Some(40),
            zcl::cluster::WINDOW_COVERING => Some(41),
            zcl::cluster::THERMOSTAT => Some(42),
            zcl::cluster::FAN_CONTROL => Some(43),
            zcl::cluster::COLOR_CONTROL => Some(44),
            zcl::cluster::ILLUMINANCE_MEASUREMENT => Some(45),
            zcl::cluster::TEMPERATURE_MEASUREMENT => Some(46),
            zcl::cluster::PRESSURE_MEASUREMENT => Some(47),
            zcl::cluster::FLOW_MEASUREMENT => Some(48),
            zcl::cluster::RELATIVE_HUMIDITY => Some(49),
            zcl::cluster::OCCUPANCY_SENSING => Some(50),
            zcl::cluster::IAS_ZONE => Some(51),
            _ => None,
        }
    }

    pub fn set(&mut self, cluster_id: u16) {
        if let Some(bit) = Self::bit(cluster_id) {
            self.0 |= 1 << bit;
        }
    }

    pub fn has_cluster(&self, cluster_id: u16) -> bool {
        Self::bit(cluster_id).is_some_and(|bit| self.0 & (1 << bit) != 0)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }
}

/// Trust-center authorization reported for a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Authorization {
    pub auth_type: u8,
    pub status: u8,
    pub known: bool,
}

impl Authorization {
    pub fn is_authorized(&self) -> bool {
        self.known && self.status == 0
    }
}

/// Position of a cluster inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRef {
    pub ep: usize,
    pub cluster: usize,
}

/// Position of an attribute inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrRef {
    pub ep: usize,
    pub cluster: usize,
    pub attr: usize,
}

impl AttrRef {
    pub fn cluster_ref(&self) -> ClusterRef {
        ClusterRef {
            ep: self.ep,
            cluster: self.cluster,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    /// Bumped every time the slot is released.
    pub generation: u32,
    pub short_addr: ShortAddr,
    pub ieee_addr: IeeeAddr,
    pub state: DeviceState,
    pub state_history: Vec<DeviceState>,
    pub endpoints: Vec<EndpointRecord>,
    pub capabilities: Capabilities,
    pub authorization: Authorization,
    /// AddDevice has been posted for this record.
    pub announced_to_bridge: bool,
    /// Every discovered attribute has been queued for its initial read.
    pub reads_scheduled: bool,
    pub mapping_failed: bool,
    pub mapped_slot: Option<usize>,
    pub name: String,
    /// Command decoded by the Matter side, waiting for `handle_send_command`.
    pub staged_command: Option<LocalCommand>,
    pub in_flight: Option<InFlight>,
}

impl DeviceRecord {
    pub fn is_live(&self) -> bool {
        self.state != DeviceState::NoDevice
    }

    /// Move to `next` if the edge is legal. Returns whether the state changed.
    pub fn advance(&mut self, next: DeviceState) -> bool {
        if self.state == next || !self.state.can_advance_to(next) {
            return false;
        }
        info!(
            "[Bridge] Device 0x{:04x}: {} -> {}",
            self.short_addr, self.state, next
        );
        self.state = next;
        self.state_history.push(next);
        true
    }

    /// Zero the record, keeping only the bumped generation.
    pub fn release(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = DeviceRecord {
            generation,
            ..DeviceRecord::default()
        };
    }

    pub fn find_endpoint(&self, endpoint_id: u8) -> Option<usize> {
        self.endpoints
            .iter()
            .position(|ep| ep.endpoint_id == endpoint_id)
    }

    pub fn add_endpoint(&mut self, endpoint_id: u8) -> Result<usize> {
        if let Some(idx) = self.find_endpoint(endpoint_id) {
            return Ok(idx);
        }
        if self.endpoints.len() >= MAX_EP_PER_DEV {
            return Err(BridgeError::CapacityExceeded("endpoints per device"));
        }
        self.endpoints.push(EndpointRecord {
            endpoint_id,
            ..EndpointRecord::default()
        });
        Ok(self.endpoints.len() - 1)
    }

    pub fn find_cluster_on(&self, ep: usize, cluster_id: u16) -> Option<ClusterRef> {
        let endpoint = self.endpoints.get(ep)?;
        let server = endpoint
            .clusters
            .iter()
            .position(|c| c.cluster_id == cluster_id && c.is_server);
        server
            .or_else(|| {
                endpoint
                    .clusters
                    .iter()
                    .position(|c| c.cluster_id == cluster_id)
            })
            .map(|cluster| ClusterRef { ep, cluster })
    }

    /// First endpoint carrying `cluster_id`, preferring server clusters.
    pub fn find_cluster(&self, cluster_id: u16) -> Option<ClusterRef> {
        let server = self.endpoints.iter().enumerate().find_map(|(ep, e)| {
            e.clusters
                .iter()
                .position(|c| c.cluster_id == cluster_id && c.is_server)
                .map(|cluster| ClusterRef { ep, cluster })
        });
        server.or_else(|| (0..self.endpoints.len()).find_map(|ep| self.find_cluster_on(ep, cluster_id)))
    }

    pub fn add_cluster(&mut self, ep: usize, cluster_id: u16, is_server: bool) -> Result<ClusterRef> {
        let endpoint = self
            .endpoints
            .get_mut(ep)
            .ok_or(BridgeError::CapacityExceeded("endpoint index"))?;
        if let Some(cluster) = endpoint
            .clusters
            .iter()
            .position(|c| c.cluster_id == cluster_id && c.is_server == is_server)
        {
            return Ok(ClusterRef { ep, cluster });
        }
        if endpoint.clusters.len() >= MAX_CLUSTERS_PER_EP {
            return Err(BridgeError::CapacityExceeded("clusters per endpoint"));
        }
        endpoint.clusters.push(ClusterRecord {
            cluster_id,
            is_server,
            ..ClusterRecord::default()
        });
        if is_server {
            self.capabilities.set(cluster_id);
        }
        Ok(ClusterRef {
            ep,
            cluster: endpoint.clusters.len() - 1,
        })
    }

    pub fn find_attribute(&self, cluster_id: u16, attr_id: u16) -> Option<AttrRef> {
        let at = self.find_cluster(cluster_id)?;
        self.find_attribute_in(at, attr_id)
    }

    pub fn find_attribute_in(&self, at: ClusterRef, attr_id: u16) -> Option<AttrRef> {
        self.cluster(at)?
            .attributes
            .iter()
            .position(|a| a.attr_id == attr_id)
            .map(|attr| AttrRef {
                ep: at.ep,
                cluster: at.cluster,
                attr,
            })
    }

    /// Return the attribute, appending it when absent.
    pub fn upsert_attribute(&mut self, cluster_id: u16, attr_id: u16, data_type: u8) -> Result<AttrRef> {
        let at = self
            .find_cluster(cluster_id)
            .ok_or(BridgeError::UnknownCluster(cluster_id as u32))?;
        self.upsert_attribute_in(at, attr_id, data_type)
    }

    pub fn upsert_attribute_in(&mut self, at: ClusterRef, attr_id: u16, data_type: u8) -> Result<AttrRef> {
        if let Some(found) = self.find_attribute_in(at, attr_id) {
            if let Some(attr) = self.attribute_mut(found)
                && data_type != zcl::data_type::NULL
            {
                attr.data_type = data_type;
            }
            return Ok(found);
        }
        let cluster = self
            .cluster_mut(at)
            .ok_or(BridgeError::UnknownCluster(0))?;
        if cluster.attributes.len() >= MAX_ATTRS_PER_CLUSTER {
            return Err(BridgeError::CapacityExceeded("attributes per cluster"));
        }
        cluster.attributes.push(AttributeRecord {
            attr_id,
            data_type,
            ..AttributeRecord::default()
        });
        Ok(AttrRef {
            ep: at.ep,
            cluster: at.cluster,
            attr: cluster.attributes.len() - 1,
        })
    }

    pub fn cluster(&self, at: ClusterRef) -> Option<&ClusterRecord> {
        self.endpoints.get(at.ep)?.clusters.get(at.cluster)
    }

    pub fn cluster_mut(&mut self, at: ClusterRef) -> Option<&mut ClusterRecord> {
        self.endpoints.get_mut(at.ep)?.clusters.get_mut(at.cluster)
    }

    pub fn attribute(&self, at: AttrRef) -> Option<&AttributeRecord> {
        self.cluster(at.cluster_ref())?.attributes.get(at.attr)
    }

    pub fn attribute_mut(&mut self, at: AttrRef) -> Option<&mut AttributeRecord> {
        self.cluster_mut(at.cluster_ref())?.attributes.get_mut(at.attr)
    }

    /// Populate an endpoint from its simple descriptor and mark it known.
    pub fn apply_simple_descriptor(&mut self, ep: usize, descriptor: &SimpleDescriptor) -> Result<()> {
        for cluster_id in &descriptor.in_clusters {
            self.add_cluster(ep, *cluster_id, true)?;
        }
        for cluster_id in &descriptor.out_clusters {
            self.add_cluster(ep, *cluster_id, false)?;
        }
        if let Some(endpoint) = self.endpoints.get_mut(ep) {
            endpoint.profile_id = descriptor.profile_id;
            endpoint.device_id = descriptor.device_id;
            endpoint.num_in = descriptor.in_clusters.len();
            endpoint.num_out = descriptor.out_clusters.len();
            endpoint.state = EndpointState::Known;
        }
        Ok(())
    }

    pub fn has_server_cluster(&self, cluster_id: u16) -> bool {
        self.capabilities.has_cluster(cluster_id)
            || self
                .find_cluster(cluster_id)
                .and_then(|at| self.cluster(at))
                .is_some_and(|c| c.is_server)
    }

    /// Cached single byte value, e.g. Level Control CurrentLevel.
    pub fn u8_value(&self, cluster_id: u16, attr_id: u16) -> Option<u8> {
        let attr = self.attribute(self.find_attribute(cluster_id, attr_id)?)?;
        attr.value.first().copied()
    }

    /// Cached ZCL character string (length prefixed).
    pub fn string_value(&self, cluster_id: u16, attr_id: u16) -> Option<String> {
        let attr = self.attribute(self.find_attribute(cluster_id, attr_id)?)?;
        let (len, rest) = attr.value.split_first()?;
        let bytes = rest.get(..*len as usize).unwrap_or(rest);
        Some(String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
    }

    /// `<manufacturer>-<model>@<short address>`.
    pub fn display_name(&self) -> String {
        let manufacturer = self
            .string_value(zcl::cluster::BASIC, zcl::basic_attr::MANUFACTURER_NAME)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let model = self
            .string_value(zcl::cluster::BASIC, zcl::basic_attr::MODEL_IDENTIFIER)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "device".to_string());
        format!("{}-{}@{:04x}", manufacturer, model, self.short_addr)
    }
}
