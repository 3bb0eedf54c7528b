//! Discovery state machine.
//!
//! A device moves through ZDO discovery (IEEE address, active endpoints,
//! simple descriptors), ZCL attribute discovery and an initial read of every
//! discovered attribute before it is handed to the Matter side. Once mapped
//! it is bound and configured for reporting.
//!
//! At most one discovery step per device is in flight. [`plan`] picks the
//! next one, the Zigbee thread sends it, and the matching response clears it.
//! Steps that go unanswered are retried and eventually abandoned by
//! [`Bridge::expire_stale`].

use super::Bridge;
use super::catalog::{
    AttrRef, AttrState, ClusterDiscoveryState, ClusterRef, DeviceRecord, DeviceState,
    EndpointState, attr_value,
};
use super::device_table::DeviceId;
use super::mailbox::BridgeMessage;
use super::scheduler::Request;
use super::translator::Translator;
use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::matter::ids::{AttrId, ClusterId};
use crate::zigbee::{IeeeAddr, RemoteResponse, ReportingConfig, ShortAddr, zcl};
use log::{debug, info, warn};
use std::time::Instant;

/// A discovery or configuration request the device still owes an answer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    IeeeAddr,
    ActiveEndpoints,
    SimpleDescriptor { ep: usize },
    AttributeDiscovery { cluster: ClusterRef, start: u16 },
    Read { attr: AttrRef },
    Bind { cluster: ClusterRef },
    Reporting { attr: AttrRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    pub step: Step,
    pub sent_at: Instant,
    /// Number of re-sends so far.
    pub attempts: u8,
}

impl InFlight {
    pub fn new(step: Step, sent_at: Instant) -> Self {
        Self {
            step,
            sent_at,
            attempts: 0,
        }
    }
}

/// What the Zigbee thread should do next for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Send(Step),
    /// Post the device to the Matter side.
    Handoff,
    Idle,
}

/// Clusters bound to the coordinator once a device is mapped.
const BOUND_CLUSTERS: [u16; 2] = [zcl::cluster::ON_OFF, zcl::cluster::LEVEL_CONTROL];

/// Attributes configured for reporting, with the type used when the device
/// never reported one.
const REPORTED_ATTRIBUTES: [(u16, u16, u8); 2] = [
    (zcl::cluster::ON_OFF, zcl::on_off::ATTR_ON_OFF, zcl::data_type::BOOL),
    (
        zcl::cluster::LEVEL_CONTROL,
        zcl::level_control::ATTR_CURRENT_LEVEL,
        zcl::data_type::U8,
    ),
];

impl Step {
    pub(crate) fn request(&self, record: &DeviceRecord, config: &DiscoveryConfig) -> Option<Request> {
        let endpoint_of = |ep: usize| record.endpoints.get(ep).map(|e| e.endpoint_id);
        let request = match *self {
            Step::IeeeAddr => Request::IeeeAddr,
            Step::ActiveEndpoints => Request::ActiveEndpoints,
            Step::SimpleDescriptor { ep } => Request::SimpleDescriptor {
                endpoint: endpoint_of(ep)?,
            },
            Step::AttributeDiscovery { cluster, start } => Request::AttributeDiscovery {
                endpoint: endpoint_of(cluster.ep)?,
                cluster_id: record.cluster(cluster)?.cluster_id,
                start_attr: start,
            },
            Step::Read { attr } => Request::Read {
                endpoint: endpoint_of(attr.ep)?,
                cluster_id: record.cluster(attr.cluster_ref())?.cluster_id,
                attr_id: record.attribute(attr)?.attr_id,
            },
            Step::Bind { cluster } => Request::Bind {
                endpoint: endpoint_of(cluster.ep)?,
                cluster_id: record.cluster(cluster)?.cluster_id,
            },
            Step::Reporting { attr } => {
                let record_attr = record.attribute(attr)?;
                let slot = record.mapped_slot.unwrap_or(0) as u16;
                Request::Reporting {
                    endpoint: endpoint_of(attr.ep)?,
                    cluster_id: record.cluster(attr.cluster_ref())?.cluster_id,
                    config: ReportingConfig {
                        attr_id: record_attr.attr_id,
                        data_type: record_attr.data_type,
                        min_interval_s: config.reporting_min_interval_s,
                        max_interval_s: config
                            .reporting_max_interval_base_s
                            .saturating_mul(slot.saturating_add(1)),
                    },
                }
            }
        };
        Some(request)
    }
}

/// Pick the next step for a device with nothing in flight, advancing the
/// state whenever the current one has no work left.
pub fn plan(record: &mut DeviceRecord) -> Plan {
    loop {
        match record.state {
            DeviceState::NoDevice => return Plan::Idle,
            DeviceState::IeeeAddrDiscovery => return Plan::Send(Step::IeeeAddr),
            DeviceState::ShortAddrDiscovery => return Plan::Send(Step::ActiveEndpoints),
            DeviceState::AuthorizationDiscovery => {
                if !record.authorization.is_authorized() {
                    return Plan::Idle;
                }
                record.advance(DeviceState::AnnounceCompleted);
            }
            DeviceState::AnnounceCompleted => return plan_announced(record),
            DeviceState::ReadAttrsCompleted => {
                record.advance(DeviceState::ConfigureBinding);
            }
            DeviceState::ConfigureBinding => {
                if let Some(step) = next_read(record) {
                    return Plan::Send(step);
                }
                if let Some(cluster) = next_binding(record) {
                    return Plan::Send(Step::Bind { cluster });
                }
                record.advance(DeviceState::ConfigureReporting);
            }
            DeviceState::ConfigureReporting => {
                if let Some(step) = next_read(record) {
                    return Plan::Send(step);
                }
                if let Some(attr) = next_reporting(record) {
                    return Plan::Send(Step::Reporting { attr });
                }
                let done = if record.has_server_cluster(zcl::cluster::ON_OFF) {
                    DeviceState::Completed
                } else {
                    DeviceState::CompletedNoToggle
                };
                record.advance(done);
            }
            DeviceState::Completed | DeviceState::CompletedNoToggle => {
                return next_read(record).map_or(Plan::Idle, Plan::Send);
            }
        }
    }
}

fn plan_announced(record: &mut DeviceRecord) -> Plan {
    if let Some(ep) = record
        .endpoints
        .iter()
        .position(|e| e.state == EndpointState::NoClusterInfo)
    {
        record.endpoints[ep].state = EndpointState::Requested;
        return Plan::Send(Step::SimpleDescriptor { ep });
    }

    let undiscovered = record.endpoints.iter().enumerate().find_map(|(ep, e)| {
        e.clusters
            .iter()
            .position(|c| c.is_server && c.disc_state == ClusterDiscoveryState::NoDiscAttrsInfo)
            .map(|cluster| ClusterRef { ep, cluster })
    });
    if let Some(at) = undiscovered
        && let Some(cluster) = record.cluster_mut(at)
    {
        cluster.disc_state = ClusterDiscoveryState::RequestedDiscAttrsInfo;
        return Plan::Send(Step::AttributeDiscovery {
            cluster: at,
            start: cluster.disc_start,
        });
    }

    if !record.reads_scheduled {
        record.reads_scheduled = true;
        for endpoint in record.endpoints.iter_mut() {
            for cluster in endpoint.clusters.iter_mut() {
                for attr in cluster.attributes.iter_mut() {
                    if attr.state == AttrState::DiscoveredAttr {
                        attr.state = AttrState::ScheduledValueRead;
                    }
                }
            }
        }
    }
    if let Some(step) = next_read(record) {
        return Plan::Send(step);
    }

    if record.announced_to_bridge || record.mapping_failed {
        Plan::Idle
    } else {
        Plan::Handoff
    }
}

fn next_read(record: &mut DeviceRecord) -> Option<Step> {
    for (ep, endpoint) in record.endpoints.iter_mut().enumerate() {
        for (cluster, c) in endpoint.clusters.iter_mut().enumerate() {
            if let Some(attr) = c
                .attributes
                .iter()
                .position(|a| a.state == AttrState::ScheduledValueRead)
            {
                c.attributes[attr].state = AttrState::RequestedValueRead;
                return Some(Step::Read {
                    attr: AttrRef { ep, cluster, attr },
                });
            }
        }
    }
    None
}

fn next_binding(record: &DeviceRecord) -> Option<ClusterRef> {
    BOUND_CLUSTERS.iter().find_map(|cluster_id| {
        let at = record.find_cluster(*cluster_id)?;
        let cluster = record.cluster(at)?;
        (cluster.is_server && !cluster.bound).then_some(at)
    })
}

fn next_reporting(record: &mut DeviceRecord) -> Option<AttrRef> {
    for (cluster_id, attr_id, data_type) in REPORTED_ATTRIBUTES {
        let Some(at) = record.find_cluster(cluster_id) else {
            continue;
        };
        if !record.cluster(at).is_some_and(|c| c.is_server) {
            continue;
        }
        let attr = match record.find_attribute_in(at, attr_id) {
            Some(attr) => attr,
            None => match record.upsert_attribute_in(at, attr_id, data_type) {
                Ok(attr) => attr,
                Err(e) => {
                    warn!(
                        "[Bridge] Cannot configure reporting of 0x{:04x}/0x{:04x}: {}",
                        cluster_id, attr_id, e
                    );
                    continue;
                }
            },
        };
        if record
            .attribute(attr)
            .is_some_and(|a| !a.reporting_configured)
        {
            return Some(attr);
        }
    }
    None
}

/// Give up on a step after its last retry.
///
/// Returns `true` when the device is unusable and must be released.
pub fn abandon(record: &mut DeviceRecord, step: Step) -> bool {
    match step {
        Step::IeeeAddr | Step::ActiveEndpoints => return true,
        Step::SimpleDescriptor { ep } => {
            if let Some(endpoint) = record.endpoints.get_mut(ep) {
                endpoint.state = EndpointState::Known;
            }
        }
        Step::AttributeDiscovery { cluster, .. } => {
            if let Some(cluster) = record.cluster_mut(cluster) {
                cluster.disc_state = ClusterDiscoveryState::KnownDiscAttrs;
            }
        }
        Step::Read { attr } => {
            if let Some(attr) = record.attribute_mut(attr) {
                attr.state = AttrState::DiscoveredAttr;
                attr.zb_status = zcl::status::TIMEOUT;
            }
        }
        Step::Bind { cluster } => {
            if let Some(cluster) = record.cluster_mut(cluster) {
                cluster.bound = true;
            }
        }
        Step::Reporting { attr } => {
            if let Some(attr) = record.attribute_mut(attr) {
                attr.reporting_configured = true;
            }
        }
    }
    false
}

/// Side effects of a response that must run once the record lock is gone.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Applied {
    /// The response matched something the bridge was waiting for.
    pub matched: bool,
    /// The device answered successfully.
    pub responded: bool,
    /// Remote (cluster, attribute) whose cached value changed.
    pub changed: Option<(u16, u16)>,
    pub renamed: Option<String>,
    pub mapped_slot: Option<usize>,
}

fn step_is(record: &DeviceRecord, pred: impl Fn(&Step) -> bool) -> bool {
    record.in_flight.as_ref().is_some_and(|f| pred(&f.step))
}

/// Fold a response into the record. Never blocks.
pub fn apply_response(
    record: &mut DeviceRecord,
    response: &RemoteResponse,
    config: &DiscoveryConfig,
) -> Applied {
    let mut applied = Applied {
        mapped_slot: record.mapped_slot,
        ..Applied::default()
    };
    match response {
        RemoteResponse::IeeeAddr {
            status, ieee_addr, ..
        } => {
            if !step_is(record, |s| *s == Step::IeeeAddr) {
                return applied;
            }
            applied.matched = true;
            if *status != zcl::status::SUCCESS {
                warn!("[Zigbee] IEEE address request to 0x{:04x} failed: 0x{:02x}", record.short_addr, status);
                return applied;
            }
            applied.responded = true;
            if record.ieee_addr.is_unset() {
                record.ieee_addr = *ieee_addr;
            } else if record.ieee_addr != *ieee_addr {
                warn!(
                    "[Zigbee] Device 0x{:04x} reported {} but is known as {}; keeping the original",
                    record.short_addr, ieee_addr, record.ieee_addr
                );
            }
            record.in_flight = None;
            record.advance(DeviceState::ShortAddrDiscovery);
        }

        RemoteResponse::ActiveEndpoints {
            status, endpoints, ..
        } => {
            if !step_is(record, |s| *s == Step::ActiveEndpoints) {
                return applied;
            }
            applied.matched = true;
            if *status != zcl::status::SUCCESS {
                warn!("[Zigbee] Active endpoint request to 0x{:04x} failed: 0x{:02x}", record.short_addr, status);
                return applied;
            }
            applied.responded = true;
            for endpoint in endpoints {
                if let Err(e) = record.add_endpoint(*endpoint) {
                    warn!("[Zigbee] Device 0x{:04x}: endpoint {} dropped: {}", record.short_addr, endpoint, e);
                    break;
                }
            }
            record.in_flight = None;
            if config.require_authorization && !record.authorization.is_authorized() {
                record.advance(DeviceState::AuthorizationDiscovery);
            } else {
                record.advance(DeviceState::AnnounceCompleted);
            }
        }

        RemoteResponse::SimpleDescriptor {
            status, descriptor, ..
        } => {
            let Some(InFlight {
                step: Step::SimpleDescriptor { ep },
                ..
            }) = record.in_flight
            else {
                return applied;
            };
            if record.endpoints.get(ep).map(|e| e.endpoint_id) != Some(descriptor.endpoint) {
                return applied;
            }
            applied.matched = true;
            if *status != zcl::status::SUCCESS {
                warn!(
                    "[Zigbee] Simple descriptor of 0x{:04x}/{} failed: 0x{:02x}",
                    record.short_addr, descriptor.endpoint, status
                );
                return applied;
            }
            applied.responded = true;
            if let Err(e) = record.apply_simple_descriptor(ep, descriptor) {
                warn!("[Zigbee] Device 0x{:04x}/{}: {}", record.short_addr, descriptor.endpoint, e);
                record.endpoints[ep].state = EndpointState::Known;
            }
            record.in_flight = None;
        }

        RemoteResponse::AttributeDiscovery {
            endpoint,
            cluster_id,
            complete,
            attributes,
            ..
        } => {
            let Some(InFlight {
                step: Step::AttributeDiscovery { cluster: at, .. },
                ..
            }) = record.in_flight
            else {
                return applied;
            };
            if record.endpoints.get(at.ep).map(|e| e.endpoint_id) != Some(*endpoint)
                || record.cluster(at).map(|c| c.cluster_id) != Some(*cluster_id)
            {
                return applied;
            }
            applied.matched = true;
            applied.responded = true;
            let mut complete = *complete || attributes.is_empty();
            let mut last = None;
            for (attr_id, data_type) in attributes {
                match record.upsert_attribute_in(at, *attr_id, *data_type) {
                    Ok(found) => {
                        if let Some(attr) = record.attribute_mut(found)
                            && attr.state == AttrState::NoAttrInfo
                        {
                            attr.state = AttrState::DiscoveredAttr;
                        }
                        last = Some(*attr_id);
                    }
                    Err(e) => {
                        warn!(
                            "[Zigbee] Device 0x{:04x} cluster 0x{:04x}: {}",
                            record.short_addr, cluster_id, e
                        );
                        complete = true;
                        break;
                    }
                }
            }
            if let Some(cluster) = record.cluster_mut(at) {
                match last.and_then(|id| id.checked_add(1)) {
                    Some(next) if !complete => {
                        cluster.disc_start = next;
                        cluster.disc_state = ClusterDiscoveryState::NoDiscAttrsInfo;
                    }
                    _ => cluster.disc_state = ClusterDiscoveryState::KnownDiscAttrs,
                }
            }
            record.in_flight = None;
        }

        RemoteResponse::ReadAttribute {
            endpoint,
            cluster_id,
            attr_id,
            status,
            data_type,
            value,
            ..
        } => {
            let Some(InFlight {
                step: Step::Read { attr: at },
                ..
            }) = record.in_flight
            else {
                return applied;
            };
            if !targets(record, at, *endpoint, *cluster_id, *attr_id) {
                return applied;
            }
            applied.matched = true;
            record.in_flight = None;
            if *status != zcl::status::SUCCESS {
                if let Some(attr) = record.attribute_mut(at) {
                    attr.zb_status = *status;
                    attr.state = AttrState::DiscoveredAttr;
                }
                debug!(
                    "[Zigbee] Read of 0x{:04x}/0x{:04x} on 0x{:04x} failed: 0x{:02x}",
                    cluster_id, attr_id, record.short_addr, status
                );
                applied.responded = true;
                return applied;
            }
            applied.responded = true;
            store_value(record, at, *data_type, value, &mut applied);
        }

        RemoteResponse::WriteAttribute {
            endpoint,
            cluster_id,
            attr_id,
            status,
            ..
        } => {
            let Some(at) = locate(record, *endpoint, *cluster_id, *attr_id) else {
                return applied;
            };
            let Some(write) = record
                .attribute_mut(at)
                .and_then(|a| a.pending_write.take_if(|w| w.sent))
            else {
                return applied;
            };
            applied.matched = true;
            applied.responded = true;
            if let Some(attr) = record.attribute_mut(at) {
                attr.zb_status = *status;
            }
            if *status == zcl::status::SUCCESS {
                store_value(record, at, write.data_type, &write.value, &mut applied);
            }
        }

        RemoteResponse::Command {
            endpoint,
            cluster_id,
            command_id,
            status,
            ..
        } => {
            let Some(ep) = record.find_endpoint(*endpoint) else {
                return applied;
            };
            let Some(at) = record.find_cluster_on(ep, *cluster_id) else {
                return applied;
            };
            let Some(cluster) = record.cluster_mut(at) else {
                return applied;
            };
            if cluster
                .pending_command
                .take_if(|c| c.sent && c.command_id == *command_id)
                .is_some()
            {
                cluster.last_command_status = Some(*status);
                applied.matched = true;
                applied.responded = true;
            }
        }

        RemoteResponse::Bind {
            endpoint,
            cluster_id,
            status,
            ..
        } => {
            let Some(InFlight {
                step: Step::Bind { cluster: at },
                ..
            }) = record.in_flight
            else {
                return applied;
            };
            // a late answer to an earlier bind must not complete this one
            if record.endpoints.get(at.ep).map(|e| e.endpoint_id) != Some(*endpoint)
                || record.cluster(at).map(|c| c.cluster_id) != Some(*cluster_id)
            {
                return applied;
            }
            applied.matched = true;
            applied.responded = true;
            if *status != zcl::status::SUCCESS {
                warn!("[Zigbee] Bind on 0x{:04x} failed: 0x{:02x}", record.short_addr, status);
            }
            if let Some(cluster) = record.cluster_mut(at) {
                cluster.bound = true;
            }
            record.in_flight = None;
        }

        RemoteResponse::ConfigureReporting {
            endpoint,
            cluster_id,
            status,
            ..
        } => {
            let Some(InFlight {
                step: Step::Reporting { attr: at },
                ..
            }) = record.in_flight
            else {
                return applied;
            };
            if record.endpoints.get(at.ep).map(|e| e.endpoint_id) != Some(*endpoint)
                || record.cluster(at.cluster_ref()).map(|c| c.cluster_id) != Some(*cluster_id)
            {
                return applied;
            }
            applied.matched = true;
            applied.responded = true;
            if *status != zcl::status::SUCCESS {
                warn!(
                    "[Zigbee] Reporting setup of cluster 0x{:04x} on 0x{:04x} failed: 0x{:02x}",
                    cluster_id, record.short_addr, status
                );
            }
            if let Some(attr) = record.attribute_mut(at) {
                attr.reporting_configured = true;
            }
            record.in_flight = None;
        }

        RemoteResponse::AttributeReport {
            endpoint,
            cluster_id,
            attr_id,
            data_type,
            value,
            ..
        } => {
            let Some(ep) = record.find_endpoint(*endpoint) else {
                return applied;
            };
            let Some(cluster) = record.find_cluster_on(ep, *cluster_id) else {
                return applied;
            };
            let at = match record.upsert_attribute_in(cluster, *attr_id, *data_type) {
                Ok(at) => at,
                Err(e) => {
                    warn!("[Zigbee] Report from 0x{:04x} dropped: {}", record.short_addr, e);
                    return applied;
                }
            };
            applied.matched = true;
            applied.responded = true;
            store_value(record, at, *data_type, value, &mut applied);
        }
    }
    applied
}

fn targets(record: &DeviceRecord, at: AttrRef, endpoint: u8, cluster_id: u16, attr_id: u16) -> bool {
    record.endpoints.get(at.ep).map(|e| e.endpoint_id) == Some(endpoint)
        && record.cluster(at.cluster_ref()).map(|c| c.cluster_id) == Some(cluster_id)
        && record.attribute(at).map(|a| a.attr_id) == Some(attr_id)
}

fn locate(record: &DeviceRecord, endpoint: u8, cluster_id: u16, attr_id: u16) -> Option<AttrRef> {
    let ep = record.find_endpoint(endpoint)?;
    let cluster = record.find_cluster_on(ep, cluster_id)?;
    record.find_attribute_in(cluster, attr_id)
}

fn store_value(
    record: &mut DeviceRecord,
    at: AttrRef,
    data_type: u8,
    received: &[u8],
    applied: &mut Applied,
) {
    // untyped values are kept as received
    let bytes = match data_type {
        zcl::data_type::NULL => received,
        known => &received[..zcl::value_size(known, received)],
    };
    let Some(cluster_id) = record.cluster(at.cluster_ref()).map(|c| c.cluster_id) else {
        return;
    };
    let Some(attr) = record.attribute_mut(at) else {
        return;
    };
    let value = match attr_value(bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "[Zigbee] Value of 0x{:04x}/0x{:04x} not cached: {}",
                cluster_id, attr.attr_id, e
            );
            attr.zb_status = zcl::status::INVALID_VALUE;
            if attr.state == AttrState::RequestedValueRead {
                attr.state = AttrState::DiscoveredAttr;
            }
            return;
        }
    };
    let attr_id = attr.attr_id;
    let changed = attr.value != value;
    attr.value = value;
    if data_type != zcl::data_type::NULL {
        attr.data_type = data_type;
    }
    attr.zb_status = zcl::status::SUCCESS;
    if attr.state != AttrState::ScheduledValueRead {
        attr.state = AttrState::GotValue;
    }

    if changed && record.mapped_slot.is_some() {
        applied.changed = Some((cluster_id, attr_id));
        if cluster_id == zcl::cluster::BASIC
            && matches!(
                attr_id,
                zcl::basic_attr::MANUFACTURER_NAME | zcl::basic_attr::MODEL_IDENTIFIER
            )
        {
            let name = record.display_name();
            if name != record.name {
                record.name = name.clone();
                applied.renamed = Some(name);
            }
        }
    }
}

/// Matter (cluster, attribute) for a remote one, if it is bridged.
pub(crate) fn local_attribute(
    translator: &Translator,
    cluster_id: u16,
    attr_id: u16,
) -> Option<(ClusterId, AttrId)> {
    let cluster = translator.local_cluster_for(cluster_id)?;
    let attr = translator.local_attribute_for(cluster_id, attr_id)?;
    Some((cluster, attr))
}

impl Bridge {
    /// A device joined or rejoined the network.
    pub fn on_device_announced(&self, short_addr: ShortAddr, ieee_addr: IeeeAddr) -> Result<DeviceId> {
        if let Some(id) = self.devices.find_by_ieee(ieee_addr) {
            if let Some(other) = self.devices.find_by_short(short_addr)
                && other != id
            {
                warn!(
                    "[Zigbee] Short address 0x{:04x} taken over by {}; dropping {}",
                    short_addr, ieee_addr, other
                );
                self.remove_device(other);
            }
            let mut record = self.devices.lock(id)?;
            if record.short_addr != short_addr {
                warn!(
                    "[Zigbee] Strange: {} re-announced with short address 0x{:04x} (was 0x{:04x})",
                    ieee_addr, short_addr, record.short_addr
                );
                record.short_addr = short_addr;
            } else {
                debug!("[Zigbee] Duplicate announce from {}", ieee_addr);
            }
            return Ok(id);
        }
        if let Some(stale) = self.devices.find_by_short(short_addr) {
            warn!("[Zigbee] Short address 0x{:04x} reused; dropping the old device", short_addr);
            self.remove_device(stale);
        }

        let id = self.devices.claim(short_addr, ieee_addr)?;
        info!("[Zigbee] Device 0x{:04x} announced as {}", short_addr, id);
        self.scheduler.enqueue(id);
        Ok(id)
    }

    /// A device left the network.
    pub fn on_leave_indication(&self, ieee_addr: IeeeAddr) {
        match self.devices.find_by_ieee(ieee_addr) {
            Some(id) => {
                info!("[Zigbee] Device {} left", ieee_addr);
                self.remove_device(id);
            }
            None => debug!("[Zigbee] Leave from unknown device {}", ieee_addr),
        }
    }

    /// Trust center verdict on a joining device.
    pub fn on_device_authorized(&self, ieee_addr: IeeeAddr, auth_type: u8, status: u8) {
        let Some(id) = self.devices.find_by_ieee(ieee_addr) else {
            debug!("[Zigbee] Authorization for unknown device {}", ieee_addr);
            return;
        };
        if let Ok(mut record) = self.devices.lock(id) {
            record.authorization.auth_type = auth_type;
            record.authorization.status = status;
            record.authorization.known = true;
            if status != zcl::status::SUCCESS {
                warn!("[Zigbee] Device {} not authorized: 0x{:02x}", ieee_addr, status);
            }
        }
        self.devices.notify(id);
        self.scheduler.enqueue(id);
    }

    /// Completion or unsolicited frame from the Zigbee stack.
    pub fn on_remote_response(&self, response: RemoteResponse) {
        let short_addr = response.short_addr();
        let Some(id) = self.devices.find_by_short(short_addr) else {
            debug!("[Zigbee] Ignoring response from unknown device 0x{:04x}", short_addr);
            return;
        };
        let applied = match self.devices.lock(id) {
            Ok(mut record) => apply_response(&mut record, &response, &self.config.discovery),
            Err(_) => return,
        };
        if !applied.matched {
            debug!("[Zigbee] Unexpected response from 0x{:04x}: {:?}", short_addr, response);
            return;
        }
        self.devices.notify(id);
        self.scheduler.enqueue(id);

        let Some(slot) = applied.mapped_slot else {
            return;
        };
        if applied.responded {
            self.mark_reachable(id);
        }
        if let Some((cluster_id, attr_id)) = applied.changed
            && let Some((cluster, attr)) = local_attribute(&self.translator, cluster_id, attr_id)
        {
            self.allocator.lock().attribute_changed(slot, cluster, attr);
        }
        if let Some(name) = applied.renamed {
            self.allocator.lock().rename(slot, &name);
        }
    }

    /// Re-send or abandon steps that went unanswered for longer than the
    /// request timeout.
    pub fn expire_stale(&self, now: Instant) {
        let timeout = self.config.discovery.request_timeout();
        let max_retries = self.config.discovery.max_retries;
        for id in self.devices.live_devices() {
            let mut resend = None;
            let mut release = false;
            {
                let Ok(mut record) = self.devices.lock(id) else {
                    continue;
                };
                let Some(in_flight) = record.in_flight else {
                    continue;
                };
                if now.saturating_duration_since(in_flight.sent_at) < timeout {
                    continue;
                }
                if in_flight.attempts < max_retries {
                    debug!(
                        "[Zigbee] Retrying {:?} on 0x{:04x} ({}/{})",
                        in_flight.step,
                        record.short_addr,
                        in_flight.attempts + 1,
                        max_retries
                    );
                    record.in_flight = Some(InFlight {
                        step: in_flight.step,
                        sent_at: now,
                        attempts: in_flight.attempts + 1,
                    });
                    resend = in_flight
                        .step
                        .request(&record, &self.config.discovery)
                        .map(|r| (r, record.short_addr, record.ieee_addr));
                } else {
                    warn!(
                        "[Zigbee] Giving up on {:?} for 0x{:04x} after {} retries",
                        in_flight.step, record.short_addr, max_retries
                    );
                    record.in_flight = None;
                    release = abandon(&mut record, in_flight.step);
                }
            }

            if let Some((request, short_addr, ieee_addr)) = resend {
                request.send(
                    self.remote.as_ref(),
                    short_addr,
                    ieee_addr,
                    self.config.bridge.local_endpoint,
                );
            } else if release {
                self.remove_device(id);
            } else {
                self.devices.notify(id);
                self.scheduler.enqueue(id);
            }
        }
    }

    /// Forget a device and, if the Matter side knows it, unmap it.
    pub(crate) fn remove_device(&self, id: DeviceId) {
        match self.devices.release(id) {
            Ok(released) => {
                if released.announced_to_bridge || released.mapped_slot.is_some() {
                    let timeout = self.config.bridge.handoff_timeout();
                    if let Err(e) = self.mailbox.post(BridgeMessage::RemoveDevice(id), timeout) {
                        warn!("[Bridge] Could not post removal of {}: {}", id, e);
                    }
                }
            }
            Err(e) => debug!("[Bridge] Removal of {} skipped: {}", id, e),
        }
    }
}
