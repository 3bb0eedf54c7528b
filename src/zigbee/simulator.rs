//! Simulated Zigbee network.
//!
//! Answers every request the bridge sends the way a well behaved device
//! would, without a radio. Used by the demo binary and the tests.
//!
//! Responses are queued and only reach the bridge through
//! [`SimulatedNetwork::pump`], which runs on the Zigbee thread, matching the
//! rule that a [`RemoteStack`] never calls back into the bridge. In shuffled
//! mode each pump delivers its batch in a seeded random order and may repeat
//! responses.

use super::{IeeeAddr, RemoteResponse, RemoteStack, ReportingConfig, ShortAddr, SimpleDescriptor, zcl};
use crate::bridge::Bridge;
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Attributes returned per discovery page.
const DISCOVERY_PAGE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedAttribute {
    pub attr_id: u16,
    pub data_type: u8,
    pub value: Vec<u8>,
    pub read_only: bool,
}

impl SimulatedAttribute {
    pub fn new(attr_id: u16, data_type: u8, value: &[u8]) -> Self {
        Self {
            attr_id,
            data_type,
            value: value.to_vec(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCluster {
    pub cluster_id: u16,
    pub attributes: Vec<SimulatedAttribute>,
}

impl SimulatedCluster {
    pub fn new(cluster_id: u16) -> Self {
        Self {
            cluster_id,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: SimulatedAttribute) -> Self {
        self.attributes.push(attribute);
        self.attributes.sort_by_key(|a| a.attr_id);
        self
    }

    fn attribute_mut(&mut self, attr_id: u16) -> Option<&mut SimulatedAttribute> {
        self.attributes.iter_mut().find(|a| a.attr_id == attr_id)
    }

    fn set(&mut self, attr_id: u16, value: &[u8]) {
        if let Some(attr) = self.attribute_mut(attr_id) {
            attr.value = value.to_vec();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedEndpoint {
    pub endpoint: u8,
    pub device_id: u16,
    pub clusters: Vec<SimulatedCluster>,
    pub out_clusters: Vec<u16>,
}

impl SimulatedEndpoint {
    pub fn new(endpoint: u8, device_id: u16) -> Self {
        Self {
            endpoint,
            device_id,
            clusters: Vec::new(),
            out_clusters: Vec::new(),
        }
    }

    pub fn with_cluster(mut self, cluster: SimulatedCluster) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn with_client_cluster(mut self, cluster_id: u16) -> Self {
        self.out_clusters.push(cluster_id);
        self
    }

    fn cluster_mut(&mut self, cluster_id: u16) -> Option<&mut SimulatedCluster> {
        self.clusters.iter_mut().find(|c| c.cluster_id == cluster_id)
    }

    fn descriptor(&self) -> SimpleDescriptor {
        SimpleDescriptor {
            endpoint: self.endpoint,
            profile_id: zcl::PROFILE_HOME_AUTOMATION,
            device_id: self.device_id,
            in_clusters: self.clusters.iter().map(|c| c.cluster_id).collect(),
            out_clusters: self.out_clusters.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNode {
    pub short_addr: ShortAddr,
    pub ieee_addr: IeeeAddr,
    pub endpoints: Vec<SimulatedEndpoint>,
    /// Drops every request without answering.
    pub silent: bool,
    pub bindings: Vec<(u8, u16)>,
    pub reporting: Vec<(u8, u16, ReportingConfig)>,
}

impl SimulatedNode {
    pub fn new(short_addr: ShortAddr, ieee_addr: IeeeAddr) -> Self {
        Self {
            short_addr,
            ieee_addr,
            endpoints: Vec::new(),
            silent: false,
            bindings: Vec::new(),
            reporting: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: SimulatedEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    fn basic_cluster(model: &str) -> SimulatedCluster {
        SimulatedCluster::new(zcl::cluster::BASIC)
            .with_attribute(
                SimulatedAttribute::new(zcl::basic_attr::ZCL_VERSION, zcl::data_type::U8, &[8])
                    .read_only(),
            )
            .with_attribute(
                SimulatedAttribute::new(
                    zcl::basic_attr::MANUFACTURER_NAME,
                    zcl::data_type::CHAR_STRING,
                    &char_string("Simulated"),
                )
                .read_only(),
            )
            .with_attribute(
                SimulatedAttribute::new(
                    zcl::basic_attr::MODEL_IDENTIFIER,
                    zcl::data_type::CHAR_STRING,
                    &char_string(model),
                )
                .read_only(),
            )
            .with_attribute(
                SimulatedAttribute::new(zcl::basic_attr::POWER_SOURCE, zcl::data_type::ENUM8, &[1])
                    .read_only(),
            )
    }

    fn on_off_cluster(on: bool) -> SimulatedCluster {
        SimulatedCluster::new(zcl::cluster::ON_OFF)
            .with_attribute(
                SimulatedAttribute::new(zcl::on_off::ATTR_ON_OFF, zcl::data_type::BOOL, &[on as u8])
                    .read_only(),
            )
            .with_attribute(SimulatedAttribute::new(0x4001, zcl::data_type::U16, &[0, 0]))
            .with_attribute(SimulatedAttribute::new(0x4002, zcl::data_type::U16, &[0, 0]))
    }

    fn identify_cluster() -> SimulatedCluster {
        SimulatedCluster::new(zcl::cluster::IDENTIFY).with_attribute(SimulatedAttribute::new(
            zcl::identify::ATTR_IDENTIFY_TIME,
            zcl::data_type::U16,
            &[0, 0],
        ))
    }

    /// HA On/Off Light (0x0100) on endpoint 1.
    pub fn on_off_light(short_addr: ShortAddr, ieee_addr: IeeeAddr, on: bool) -> Self {
        Self::new(short_addr, ieee_addr).with_endpoint(
            SimulatedEndpoint::new(1, 0x0100)
                .with_cluster(Self::basic_cluster("OnOffLight"))
                .with_cluster(Self::identify_cluster())
                .with_cluster(Self::on_off_cluster(on)),
        )
    }

    /// HA Dimmable Light (0x0101) on endpoint 1, off at `level`.
    pub fn dimmable_light(short_addr: ShortAddr, ieee_addr: IeeeAddr, level: u8) -> Self {
        Self::new(short_addr, ieee_addr).with_endpoint(
            SimulatedEndpoint::new(1, 0x0101)
                .with_cluster(Self::basic_cluster("DimmableLight"))
                .with_cluster(Self::identify_cluster())
                .with_cluster(Self::on_off_cluster(false))
                .with_cluster(
                    SimulatedCluster::new(zcl::cluster::LEVEL_CONTROL)
                        .with_attribute(
                            SimulatedAttribute::new(
                                zcl::level_control::ATTR_CURRENT_LEVEL,
                                zcl::data_type::U8,
                                &[level],
                            )
                            .read_only(),
                        )
                        .with_attribute(SimulatedAttribute::new(0x0011, zcl::data_type::U8, &[0xFF])),
                ),
        )
    }

    /// HA Temperature Sensor (0x0302) on endpoint 1, reading `centi_celsius`.
    pub fn temperature_sensor(short_addr: ShortAddr, ieee_addr: IeeeAddr, centi_celsius: i16) -> Self {
        Self::new(short_addr, ieee_addr).with_endpoint(
            SimulatedEndpoint::new(1, 0x0302)
                .with_cluster(Self::basic_cluster("TempSensor"))
                .with_cluster(Self::identify_cluster())
                .with_cluster(
                    SimulatedCluster::new(zcl::cluster::TEMPERATURE_MEASUREMENT)
                        .with_attribute(
                            SimulatedAttribute::new(
                                0x0000,
                                zcl::data_type::S16,
                                &centi_celsius.to_le_bytes(),
                            )
                            .read_only(),
                        )
                        .with_attribute(
                            SimulatedAttribute::new(0x0001, zcl::data_type::S16, &(-4000i16).to_le_bytes())
                                .read_only(),
                        )
                        .with_attribute(
                            SimulatedAttribute::new(0x0002, zcl::data_type::S16, &12500i16.to_le_bytes())
                                .read_only(),
                        ),
                ),
        )
    }

    fn endpoint(&self, endpoint: u8) -> Option<&SimulatedEndpoint> {
        self.endpoints.iter().find(|e| e.endpoint == endpoint)
    }

    fn endpoint_mut(&mut self, endpoint: u8) -> Option<&mut SimulatedEndpoint> {
        self.endpoints.iter_mut().find(|e| e.endpoint == endpoint)
    }

    fn cluster_mut(&mut self, endpoint: u8, cluster_id: u16) -> Option<&mut SimulatedCluster> {
        self.endpoint_mut(endpoint)?.cluster_mut(cluster_id)
    }

    /// Apply a command's effect. Returns the ZCL status of the default
    /// response.
    fn execute(&mut self, endpoint: u8, cluster_id: u16, command_id: u8, payload: &[u8]) -> u8 {
        let Some(cluster) = self.cluster_mut(endpoint, cluster_id) else {
            return zcl::status::UNSUP_CLUSTER_COMMAND;
        };
        match (cluster_id, command_id) {
            (zcl::cluster::ON_OFF, zcl::on_off::CMD_OFF) => cluster.set(zcl::on_off::ATTR_ON_OFF, &[0]),
            (zcl::cluster::ON_OFF, zcl::on_off::CMD_ON) => cluster.set(zcl::on_off::ATTR_ON_OFF, &[1]),
            (zcl::cluster::ON_OFF, zcl::on_off::CMD_TOGGLE) => {
                let on = cluster
                    .attribute_mut(zcl::on_off::ATTR_ON_OFF)
                    .and_then(|a| a.value.first().copied())
                    .unwrap_or(0);
                cluster.set(zcl::on_off::ATTR_ON_OFF, &[(on == 0) as u8]);
            }
            (zcl::cluster::LEVEL_CONTROL, zcl::level_control::CMD_MOVE_TO_LEVEL) => {
                let Some(level) = payload.first().copied() else {
                    return zcl::status::INVALID_VALUE;
                };
                cluster.set(zcl::level_control::ATTR_CURRENT_LEVEL, &[level]);
            }
            (zcl::cluster::LEVEL_CONTROL, zcl::level_control::CMD_MOVE_TO_LEVEL_WITH_ON_OFF) => {
                let Some(level) = payload.first().copied() else {
                    return zcl::status::INVALID_VALUE;
                };
                cluster.set(zcl::level_control::ATTR_CURRENT_LEVEL, &[level]);
                if let Some(on_off) = self.cluster_mut(endpoint, zcl::cluster::ON_OFF) {
                    on_off.set(zcl::on_off::ATTR_ON_OFF, &[(level > 0) as u8]);
                }
            }
            (zcl::cluster::IDENTIFY, zcl::identify::CMD_IDENTIFY) => {
                let Some(time) = payload.get(..2) else {
                    return zcl::status::INVALID_VALUE;
                };
                cluster.set(zcl::identify::ATTR_IDENTIFY_TIME, time);
            }
            (zcl::cluster::GROUPS, _) => {}
            _ => return zcl::status::UNSUP_CLUSTER_COMMAND,
        }
        zcl::status::SUCCESS
    }
}

/// Encode `s` as a ZCL character string.
pub fn char_string(s: &str) -> Vec<u8> {
    let bytes = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    out
}

/// A request as it reached the network, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimRequest {
    IeeeAddr {
        short_addr: ShortAddr,
    },
    ActiveEndpoints {
        short_addr: ShortAddr,
    },
    SimpleDescriptor {
        short_addr: ShortAddr,
        endpoint: u8,
    },
    AttributeDiscovery {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        start_attr: u16,
    },
    Read {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
    },
    Write {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        value: Vec<u8>,
    },
    Command {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        command_id: u8,
        payload: Vec<u8>,
    },
    Bind {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
    },
    ConfigureReporting {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
    },
}

impl SimRequest {
    pub fn short_addr(&self) -> ShortAddr {
        match self {
            SimRequest::IeeeAddr { short_addr }
            | SimRequest::ActiveEndpoints { short_addr }
            | SimRequest::SimpleDescriptor { short_addr, .. }
            | SimRequest::AttributeDiscovery { short_addr, .. }
            | SimRequest::Read { short_addr, .. }
            | SimRequest::Write { short_addr, .. }
            | SimRequest::Command { short_addr, .. }
            | SimRequest::Bind { short_addr, .. }
            | SimRequest::ConfigureReporting { short_addr, .. } => *short_addr,
        }
    }
}

/// Something the network has to tell the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Announce {
        short_addr: ShortAddr,
        ieee_addr: IeeeAddr,
    },
    Leave(IeeeAddr),
    Response(RemoteResponse),
}

struct Shuffle {
    rng: StdRng,
    duplicate_probability: f64,
}

#[derive(Default)]
struct NetworkState {
    nodes: Vec<SimulatedNode>,
    outbox: VecDeque<NetworkEvent>,
    requests: Vec<SimRequest>,
}

impl NetworkState {
    fn node_mut(&mut self, short_addr: ShortAddr) -> Option<&mut SimulatedNode> {
        self.nodes.iter_mut().find(|n| n.short_addr == short_addr)
    }

    /// Log the request and, if a responsive node owns `short_addr`, queue
    /// the response `answer` produces.
    fn handle(
        &mut self,
        request: SimRequest,
        answer: impl FnOnce(&mut SimulatedNode) -> Option<RemoteResponse>,
    ) {
        let short_addr = request.short_addr();
        self.requests.push(request);
        let Some(node) = self.node_mut(short_addr) else {
            debug!("[Sim] No node at 0x{:04x}", short_addr);
            return;
        };
        if node.silent {
            return;
        }
        if let Some(response) = answer(node) {
            self.outbox.push_back(NetworkEvent::Response(response));
        }
    }
}

#[derive(Default)]
pub struct SimulatedNetwork {
    state: Mutex<NetworkState>,
    shuffle: Option<Mutex<Shuffle>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver each batch in a random order seeded by `seed`, repeating one
    /// response in ten.
    pub fn shuffled(seed: u64) -> Self {
        Self {
            state: Mutex::new(NetworkState::default()),
            shuffle: Some(Mutex::new(Shuffle {
                rng: StdRng::seed_from_u64(seed),
                duplicate_probability: 0.1,
            })),
        }
    }

    /// Add a node and queue its device announcement.
    pub fn join(&self, node: SimulatedNode) {
        info!("[Sim] Node 0x{:04x} ({}) joining", node.short_addr, node.ieee_addr);
        let mut state = self.state.lock();
        state.outbox.push_back(NetworkEvent::Announce {
            short_addr: node.short_addr,
            ieee_addr: node.ieee_addr,
        });
        // a rejoin replaces the node, and a reassigned short address
        // replaces whichever node silently dropped off with it
        state
            .nodes
            .retain(|n| n.ieee_addr != node.ieee_addr && n.short_addr != node.short_addr);
        state.nodes.push(node);
    }

    /// Remove a node and queue its leave indication.
    pub fn leave(&self, ieee_addr: IeeeAddr) {
        info!("[Sim] Node {} leaving", ieee_addr);
        let mut state = self.state.lock();
        state.nodes.retain(|n| n.ieee_addr != ieee_addr);
        state.outbox.push_back(NetworkEvent::Leave(ieee_addr));
    }

    pub fn set_silent(&self, short_addr: ShortAddr, silent: bool) {
        if let Some(node) = self.state.lock().node_mut(short_addr) {
            node.silent = silent;
        }
    }

    /// Change an attribute on the device side without telling anyone.
    pub fn set_attribute(&self, short_addr: ShortAddr, endpoint: u8, cluster_id: u16, attr_id: u16, value: &[u8]) {
        if let Some(cluster) = self
            .state
            .lock()
            .node_mut(short_addr)
            .and_then(|n| n.cluster_mut(endpoint, cluster_id))
        {
            cluster.set(attr_id, value);
        }
    }

    /// Current device-side value of an attribute.
    pub fn attribute(&self, short_addr: ShortAddr, endpoint: u8, cluster_id: u16, attr_id: u16) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let cluster = state.node_mut(short_addr)?.cluster_mut(endpoint, cluster_id)?;
        cluster.attribute_mut(attr_id).map(|a| a.value.clone())
    }

    /// Queue an attribute report carrying the current value.
    pub fn report(&self, short_addr: ShortAddr, endpoint: u8, cluster_id: u16, attr_id: u16) {
        let mut state = self.state.lock();
        let Some(attr) = state
            .node_mut(short_addr)
            .and_then(|n| n.cluster_mut(endpoint, cluster_id))
            .and_then(|c| c.attribute_mut(attr_id))
            .cloned()
        else {
            return;
        };
        state.outbox.push_back(NetworkEvent::Response(RemoteResponse::AttributeReport {
            short_addr,
            endpoint,
            cluster_id,
            attr_id,
            data_type: attr.data_type,
            value: attr.value,
        }));
    }

    pub fn requests(&self) -> Vec<SimRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_to(&self, short_addr: ShortAddr) -> Vec<SimRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.short_addr() == short_addr)
            .cloned()
            .collect()
    }

    fn take_batch(&self) -> Vec<NetworkEvent> {
        let mut batch: Vec<NetworkEvent> = self.state.lock().outbox.drain(..).collect();
        if let Some(shuffle) = &self.shuffle {
            let mut shuffle = shuffle.lock();
            let Shuffle {
                rng,
                duplicate_probability,
            } = &mut *shuffle;
            let repeats: Vec<NetworkEvent> = batch
                .iter()
                .filter(|e| matches!(e, NetworkEvent::Response(_)) && rng.gen_bool(*duplicate_probability))
                .cloned()
                .collect();
            batch.extend(repeats);
            batch.shuffle(rng);
        }
        batch
    }

    /// Deliver everything queued so far to the bridge. Call on the Zigbee
    /// thread. Returns the number of events delivered.
    pub fn pump(&self, bridge: &Bridge) -> usize {
        let batch = self.take_batch();
        let delivered = batch.len();
        for event in batch {
            match event {
                NetworkEvent::Announce {
                    short_addr,
                    ieee_addr,
                } => {
                    if let Err(e) = bridge.on_device_announced(short_addr, ieee_addr) {
                        info!("[Sim] Announce of 0x{:04x} rejected: {}", short_addr, e);
                    }
                }
                NetworkEvent::Leave(ieee_addr) => bridge.on_leave_indication(ieee_addr),
                NetworkEvent::Response(response) => bridge.on_remote_response(response),
            }
        }
        delivered
    }

    /// Drive the Zigbee side of `bridge` until `stop` is set.
    pub fn run(&self, bridge: &Bridge, stop: &AtomicBool, tick: Duration) {
        while !stop.load(Ordering::Relaxed) {
            self.pump(bridge);
            bridge.run_remote_once(tick);
        }
    }
}

impl RemoteStack for SimulatedNetwork {
    fn request_ieee_addr(&self, short_addr: ShortAddr) {
        self.state
            .lock()
            .handle(SimRequest::IeeeAddr { short_addr }, |node| {
                Some(RemoteResponse::IeeeAddr {
                    status: zcl::status::SUCCESS,
                    short_addr,
                    ieee_addr: node.ieee_addr,
                })
            });
    }

    fn request_active_endpoints(&self, short_addr: ShortAddr) {
        self.state
            .lock()
            .handle(SimRequest::ActiveEndpoints { short_addr }, |node| {
                Some(RemoteResponse::ActiveEndpoints {
                    status: zcl::status::SUCCESS,
                    short_addr,
                    endpoints: node.endpoints.iter().map(|e| e.endpoint).collect(),
                })
            });
    }

    fn request_simple_descriptor(&self, short_addr: ShortAddr, endpoint: u8) {
        self.state.lock().handle(
            SimRequest::SimpleDescriptor {
                short_addr,
                endpoint,
            },
            |node| {
                let response = match node.endpoint(endpoint) {
                    Some(ep) => RemoteResponse::SimpleDescriptor {
                        status: zcl::status::SUCCESS,
                        short_addr,
                        descriptor: ep.descriptor(),
                    },
                    None => RemoteResponse::SimpleDescriptor {
                        status: zcl::status::NOT_FOUND,
                        short_addr,
                        descriptor: SimpleDescriptor {
                            endpoint,
                            profile_id: 0,
                            device_id: 0,
                            in_clusters: Vec::new(),
                            out_clusters: Vec::new(),
                        },
                    },
                };
                Some(response)
            },
        );
    }

    fn request_attribute_discovery(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        start_attr: u16,
    ) {
        self.state.lock().handle(
            SimRequest::AttributeDiscovery {
                short_addr,
                endpoint,
                cluster_id,
                start_attr,
            },
            |node| {
                let remaining: Vec<(u16, u8)> = node
                    .cluster_mut(endpoint, cluster_id)
                    .map(|c| {
                        c.attributes
                            .iter()
                            .filter(|a| a.attr_id >= start_attr)
                            .map(|a| (a.attr_id, a.data_type))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(RemoteResponse::AttributeDiscovery {
                    short_addr,
                    endpoint,
                    cluster_id,
                    complete: remaining.len() <= DISCOVERY_PAGE,
                    attributes: remaining.into_iter().take(DISCOVERY_PAGE).collect(),
                })
            },
        );
    }

    fn request_read_attribute(&self, short_addr: ShortAddr, endpoint: u8, cluster_id: u16, attr_id: u16) {
        self.state.lock().handle(
            SimRequest::Read {
                short_addr,
                endpoint,
                cluster_id,
                attr_id,
            },
            |node| {
                let attr = node
                    .cluster_mut(endpoint, cluster_id)
                    .and_then(|c| c.attribute_mut(attr_id))
                    .cloned();
                let (status, data_type, value) = match attr {
                    Some(attr) => (zcl::status::SUCCESS, attr.data_type, attr.value),
                    None => (zcl::status::UNSUPPORTED_ATTRIBUTE, zcl::data_type::NULL, Vec::new()),
                };
                Some(RemoteResponse::ReadAttribute {
                    short_addr,
                    endpoint,
                    cluster_id,
                    attr_id,
                    status,
                    data_type,
                    value,
                })
            },
        );
    }

    fn request_write_attribute(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        data_type: u8,
        value: &[u8],
    ) {
        self.state.lock().handle(
            SimRequest::Write {
                short_addr,
                endpoint,
                cluster_id,
                attr_id,
                value: value.to_vec(),
            },
            |node| {
                let status = match node
                    .cluster_mut(endpoint, cluster_id)
                    .and_then(|c| c.attribute_mut(attr_id))
                {
                    None => zcl::status::UNSUPPORTED_ATTRIBUTE,
                    Some(attr) if attr.read_only => zcl::status::READ_ONLY,
                    Some(attr) => {
                        attr.value = value.to_vec();
                        if data_type != zcl::data_type::NULL {
                            attr.data_type = data_type;
                        }
                        zcl::status::SUCCESS
                    }
                };
                Some(RemoteResponse::WriteAttribute {
                    short_addr,
                    endpoint,
                    cluster_id,
                    attr_id,
                    status,
                })
            },
        );
    }

    fn request_send_command(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        command_id: u8,
        payload: &[u8],
    ) {
        self.state.lock().handle(
            SimRequest::Command {
                short_addr,
                endpoint,
                cluster_id,
                command_id,
                payload: payload.to_vec(),
            },
            |node| {
                let status = node.execute(endpoint, cluster_id, command_id, payload);
                Some(RemoteResponse::Command {
                    short_addr,
                    endpoint,
                    cluster_id,
                    command_id,
                    status,
                })
            },
        );
    }

    fn request_bind(
        &self,
        short_addr: ShortAddr,
        _ieee_addr: IeeeAddr,
        endpoint: u8,
        cluster_id: u16,
        _dst_endpoint: u8,
    ) {
        self.state.lock().handle(
            SimRequest::Bind {
                short_addr,
                endpoint,
                cluster_id,
            },
            |node| {
                node.bindings.push((endpoint, cluster_id));
                Some(RemoteResponse::Bind {
                    short_addr,
                    endpoint,
                    cluster_id,
                    status: zcl::status::SUCCESS,
                })
            },
        );
    }

    fn request_configure_reporting(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        config: ReportingConfig,
    ) {
        self.state.lock().handle(
            SimRequest::ConfigureReporting {
                short_addr,
                endpoint,
                cluster_id,
                attr_id: config.attr_id,
            },
            |node| {
                node.reporting.push((endpoint, cluster_id, config));
                Some(RemoteResponse::ConfigureReporting {
                    short_addr,
                    endpoint,
                    cluster_id,
                    status: zcl::status::SUCCESS,
                })
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: ShortAddr = 0x2222;

    fn responses(network: &SimulatedNetwork) -> Vec<RemoteResponse> {
        network
            .take_batch()
            .into_iter()
            .filter_map(|e| match e {
                NetworkEvent::Response(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_queues_announce() {
        let network = SimulatedNetwork::new();
        network.join(SimulatedNode::on_off_light(SHORT, IeeeAddr::from_u64(7), true));
        assert_eq!(
            network.take_batch(),
            vec![NetworkEvent::Announce {
                short_addr: SHORT,
                ieee_addr: IeeeAddr::from_u64(7),
            }]
        );
    }

    #[test]
    fn test_reassigned_short_address_replaces_node() {
        let network = SimulatedNetwork::new();
        network.join(SimulatedNode::on_off_light(SHORT, IeeeAddr::from_u64(7), true));
        network.join(SimulatedNode::on_off_light(SHORT, IeeeAddr::from_u64(8), false));
        assert_eq!(
            network.attribute(SHORT, 1, zcl::cluster::ON_OFF, zcl::on_off::ATTR_ON_OFF),
            Some(vec![0x00])
        );
    }

    #[test]
    fn test_attribute_discovery_is_paged() {
        let network = SimulatedNetwork::new();
        let mut cluster = SimulatedCluster::new(zcl::cluster::BASIC);
        for id in 0..10u16 {
            cluster = cluster.with_attribute(SimulatedAttribute::new(id, zcl::data_type::U8, &[0]));
        }
        network.join(
            SimulatedNode::new(SHORT, IeeeAddr::from_u64(1))
                .with_endpoint(SimulatedEndpoint::new(1, 0).with_cluster(cluster)),
        );
        network.take_batch();

        network.request_attribute_discovery(SHORT, 1, zcl::cluster::BASIC, 0);
        network.request_attribute_discovery(SHORT, 1, zcl::cluster::BASIC, 8);
        let pages = responses(&network);
        let RemoteResponse::AttributeDiscovery {
            complete, attributes, ..
        } = &pages[0]
        else {
            panic!("expected discovery response");
        };
        assert!(!complete);
        assert_eq!(attributes.len(), 8);
        let RemoteResponse::AttributeDiscovery {
            complete, attributes, ..
        } = &pages[1]
        else {
            panic!("expected discovery response");
        };
        assert!(complete);
        assert_eq!(attributes, &vec![(8, zcl::data_type::U8), (9, zcl::data_type::U8)]);
    }

    #[test]
    fn test_writes_respect_read_only() {
        let network = SimulatedNetwork::new();
        network.join(SimulatedNode::on_off_light(SHORT, IeeeAddr::from_u64(1), false));
        network.take_batch();

        network.request_write_attribute(SHORT, 1, zcl::cluster::ON_OFF, 0, zcl::data_type::BOOL, &[1]);
        network.request_write_attribute(SHORT, 1, zcl::cluster::ON_OFF, 0x4001, zcl::data_type::U16, &[5, 0]);
        network.request_write_attribute(SHORT, 1, zcl::cluster::ON_OFF, 0x7777, zcl::data_type::U8, &[1]);
        let statuses: Vec<u8> = responses(&network)
            .into_iter()
            .filter_map(|r| match r {
                RemoteResponse::WriteAttribute { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                zcl::status::READ_ONLY,
                zcl::status::SUCCESS,
                zcl::status::UNSUPPORTED_ATTRIBUTE
            ]
        );
        assert_eq!(network.attribute(SHORT, 1, zcl::cluster::ON_OFF, 0x4001), Some(vec![5, 0]));
    }

    #[test]
    fn test_commands_change_state() {
        let network = SimulatedNetwork::new();
        network.join(SimulatedNode::dimmable_light(SHORT, IeeeAddr::from_u64(1), 10));
        network.take_batch();

        network.request_send_command(SHORT, 1, zcl::cluster::ON_OFF, zcl::on_off::CMD_TOGGLE, &[]);
        assert_eq!(network.attribute(SHORT, 1, zcl::cluster::ON_OFF, 0), Some(vec![1]));
        network.request_send_command(
            SHORT,
            1,
            zcl::cluster::LEVEL_CONTROL,
            zcl::level_control::CMD_MOVE_TO_LEVEL_WITH_ON_OFF,
            &[0, 0, 0],
        );
        assert_eq!(network.attribute(SHORT, 1, zcl::cluster::LEVEL_CONTROL, 0), Some(vec![0]));
        assert_eq!(network.attribute(SHORT, 1, zcl::cluster::ON_OFF, 0), Some(vec![0]));

        network.request_send_command(SHORT, 1, zcl::cluster::ON_OFF, 0x40, &[]);
        let last = responses(&network).pop();
        assert!(matches!(
            last,
            Some(RemoteResponse::Command {
                status: zcl::status::UNSUP_CLUSTER_COMMAND,
                ..
            })
        ));
    }

    #[test]
    fn test_silent_node_logs_but_never_answers() {
        let network = SimulatedNetwork::new();
        network.join(SimulatedNode::on_off_light(SHORT, IeeeAddr::from_u64(1), true).silent());
        network.take_batch();
        network.request_ieee_addr(SHORT);
        assert!(network.take_batch().is_empty());
        assert_eq!(network.requests(), vec![SimRequest::IeeeAddr { short_addr: SHORT }]);
    }

    #[test]
    fn test_shuffled_batches_are_reproducible() {
        let run = |seed| {
            let network = SimulatedNetwork::shuffled(seed);
            for short_addr in 1..=20 {
                network.join(SimulatedNode::on_off_light(short_addr, IeeeAddr::from_u64(short_addr as u64), true));
            }
            network.take_batch();
            for short_addr in 1..=20 {
                network.request_ieee_addr(short_addr);
            }
            responses(&network)
        };
        let first = run(42);
        assert!(first.len() >= 20);
        assert_eq!(first, run(42));
    }

    #[test]
    fn test_char_string_encoding() {
        assert_eq!(char_string("ab"), vec![2, b'a', b'b']);
        assert_eq!(char_string(""), vec![0]);
    }
}
