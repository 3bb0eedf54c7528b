//! The Zigbee ↔ Matter device bridge.
//!
//! [`Bridge`] is the one context shared by both stacks:
//!
//! - the Zigbee thread feeds it announcements, leaves and responses and runs
//!   [`Bridge::run_remote_once`] to push requests out;
//! - the Matter thread runs [`Bridge::serve_local_once`] to map and unmap
//!   devices, and calls the `handle_*` entry points when a controller reads,
//!   writes or invokes something on a bridged endpoint.
//!
//! Each device record has its own lock; no lock is ever held across a call
//! into either stack.

pub mod allocator;
pub mod catalog;
pub mod device_table;
pub mod discovery;
pub mod mailbox;
pub mod scheduler;
pub mod translator;

pub use catalog::{DeviceRecord, DeviceState};
pub use device_table::DeviceId;
pub use mailbox::BridgeMessage;
pub use translator::{BridgedCluster, LocalCommand, Translator};

use crate::config::{Config, ConfigError};
use crate::error::{BridgeError, Result};
use crate::matter::LocalStack;
use crate::matter::ids::{self, AttrId, ClusterId, EndptId};
use crate::zigbee::{RemoteStack, ShortAddr, zcl};
use allocator::EndpointAllocator;
use catalog::AttrState;
use device_table::DeviceTable;
use log::{debug, error, info, warn};
use mailbox::Mailbox;
use parking_lot::{Mutex, RwLock};
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Called with `(device, reachable)` whenever a device's reachability flips.
pub type ReachabilityCallback = Box<dyn Fn(DeviceId, bool) + Send + Sync>;

pub struct Bridge {
    config: Config,
    translator: Translator,
    devices: DeviceTable,
    scheduler: Scheduler,
    mailbox: Mailbox,
    allocator: Mutex<EndpointAllocator>,
    remote: Arc<dyn RemoteStack>,
    reachability_callbacks: RwLock<Vec<ReachabilityCallback>>,
}

impl Bridge {
    pub fn new(
        config: Config,
        remote: Arc<dyn RemoteStack>,
        local: Arc<dyn LocalStack>,
    ) -> std::result::Result<Self, ConfigError> {
        let translator = Translator::new(&config.clusters.resolve()?);
        info!(
            "[Bridge] Bridging {} clusters, {} dynamic endpoints",
            translator.enabled().len(),
            config.endpoints.dynamic_endpoint_count
        );
        Ok(Self {
            translator,
            devices: DeviceTable::new(config.bridge.max_devices),
            scheduler: Scheduler::new(),
            mailbox: Mailbox::new(),
            allocator: Mutex::new(EndpointAllocator::new(&config.endpoints, local)),
            remote,
            reachability_callbacks: RwLock::new(Vec::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    // ---------------------------------------------------------------------
    // Matter-side entry points
    // ---------------------------------------------------------------------

    /// Read a Matter attribute of a bridged device into `out`.
    ///
    /// The value is fetched from the device; if it does not answer within the
    /// read timeout the last cached value is served instead.
    pub fn handle_read_attribute(
        &self,
        device: DeviceId,
        cluster_id: ClusterId,
        attr_id: AttrId,
        out: &mut [u8],
    ) -> Result<usize> {
        self.devices.lock(device)?;
        if cluster_id == ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION
            && attr_id == ids::basic_info::REACHABLE
        {
            return copy_out(out, &[self.is_reachable(device) as u8]);
        }
        if !self.is_reachable(device) {
            return Err(BridgeError::Unreachable);
        }

        let (remote_cluster, remote_attr) = self.translator.remote_attribute(cluster_id, attr_id)?;
        let at = self.schedule_read(device, remote_cluster, remote_attr)?;
        let timeout = self.config.bridge.read_timeout();
        let fresh = self.devices.wait_until(device, Instant::now() + timeout, |r| {
            r.attribute(at).is_none_or(|a| !a.state.is_read_pending())
        })?;

        let record = self.devices.lock(device)?;
        let attr = record
            .attribute(at)
            .ok_or(BridgeError::UnknownAttribute(cluster_id, attr_id))?;
        // an abandoned read step leaves TIMEOUT behind
        let timed_out = !fresh || attr.zb_status == zcl::status::TIMEOUT;
        if !timed_out && attr.state != AttrState::GotValue {
            return Err(BridgeError::RemoteStatus(attr.zb_status));
        }
        if timed_out {
            if attr.value.is_empty() {
                return Err(BridgeError::Timeout(timeout.as_millis() as u64));
            }
            debug!(
                "[Bridge] Serving cached 0x{:04x}/0x{:04x} for {}",
                cluster_id, attr_id, device
            );
        }
        copy_out(out, &attr.value)
    }

    /// Write a Matter attribute through to the device.
    pub fn handle_write_attribute(
        &self,
        device: DeviceId,
        cluster_id: ClusterId,
        attr_id: AttrId,
        value: &[u8],
    ) -> Result<()> {
        self.devices.lock(device)?;
        if !self.is_reachable(device) {
            return Err(BridgeError::Unreachable);
        }
        if !self.translator.is_writable(cluster_id, attr_id) {
            return Err(BridgeError::ReadOnlyAttribute(cluster_id, attr_id));
        }
        let (remote_cluster, remote_attr) = self.translator.remote_attribute(cluster_id, attr_id)?;
        self.schedule_write(device, remote_cluster, remote_attr, value)
    }

    /// Remember a decoded command until [`Bridge::handle_send_command`].
    pub fn stage_command(&self, device: DeviceId, command: LocalCommand) -> Result<()> {
        self.devices.lock(device)?.staged_command = Some(command);
        Ok(())
    }

    /// Send the staged command and wait for the device to acknowledge it.
    ///
    /// On/Off commands on devices that also have Level Control are followed
    /// by a matching MoveToLevel.
    pub fn handle_send_command(&self, device: DeviceId) -> Result<()> {
        let (command, current_level, has_level) = {
            let mut record = self.devices.lock(device)?;
            let command = record
                .staged_command
                .take()
                .ok_or_else(|| BridgeError::NoStagedCommand(device.to_string()))?;
            (
                command,
                record.u8_value(
                    zcl::cluster::LEVEL_CONTROL,
                    zcl::level_control::ATTR_CURRENT_LEVEL,
                ),
                record.has_server_cluster(zcl::cluster::LEVEL_CONTROL),
            )
        };
        if !self.is_reachable(device) {
            return Err(BridgeError::Unreachable);
        }

        let remote = self.translator.encode_command(&command)?;
        self.schedule_command(device, remote.cluster_id, remote.command_id, &remote.payload)?;

        if has_level && let Some(follow_up) = self.translator.level_follow_up(&command, current_level) {
            let sent = self.translator.encode_command(&follow_up).and_then(|r| {
                self.schedule_command(device, r.cluster_id, r.command_id, &r.payload)
            });
            if let Err(e) = sent {
                warn!("[Bridge] Level follow-up for {} failed: {}", device, e);
            }
        }
        Ok(())
    }

    pub fn invoke_command(&self, device: DeviceId, command: LocalCommand) -> Result<()> {
        self.stage_command(device, command)?;
        self.handle_send_command(device)
    }

    pub fn register_reachability_change_callback(&self, callback: ReachabilityCallback) {
        self.reachability_callbacks.write().push(callback);
    }

    pub fn is_reachable(&self, device: DeviceId) -> bool {
        self.allocator.lock().is_reachable(device)
    }

    pub fn device_for_endpoint(&self, endpoint_id: EndptId) -> Option<DeviceId> {
        self.allocator.lock().device_for_endpoint(endpoint_id)
    }

    pub fn endpoint_for_device(&self, device: DeviceId) -> Option<EndptId> {
        let allocator = self.allocator.lock();
        let index = allocator.slot_for_device(device)?;
        allocator.slot(index)?.endpoint_id
    }

    pub fn device_by_short(&self, short_addr: ShortAddr) -> Option<DeviceId> {
        self.devices.find_by_short(short_addr)
    }

    pub fn device_state(&self, device: DeviceId) -> Result<DeviceState> {
        Ok(self.devices.lock(device)?.state)
    }

    /// Copy of everything known about a device.
    pub fn device_record(&self, device: DeviceId) -> Result<DeviceRecord> {
        self.devices.snapshot(device)
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        self.devices.live_devices()
    }

    /// Post a device whose endpoint registration failed to the Matter side
    /// again.
    pub fn retry_mapping(&self, device: DeviceId) -> Result<()> {
        {
            let mut record = self.devices.lock(device)?;
            if !record.mapping_failed {
                return Ok(());
            }
            record.mapping_failed = false;
            record.announced_to_bridge = false;
        }
        info!("[Bridge] Retrying endpoint mapping of {}", device);
        self.scheduler.enqueue(device);
        Ok(())
    }

    /// Forget every device and clear every dynamic endpoint.
    pub fn factory_reset(&self) -> Result<()> {
        warn!("[Bridge] Factory reset");
        for id in self.devices.live_devices() {
            if let Err(e) = self.devices.release(id) {
                debug!("[Bridge] {} already gone: {}", id, e);
            }
        }
        self.mailbox
            .post(BridgeMessage::FactoryReset, self.config.bridge.handoff_timeout())
    }

    // ---------------------------------------------------------------------
    // Matter thread
    // ---------------------------------------------------------------------

    /// Handle at most one message from the Zigbee side. Returns whether one
    /// was handled.
    pub fn serve_local_once(&self, timeout: Duration) -> bool {
        let Some(message) = self.mailbox.receive(timeout) else {
            return false;
        };
        debug!("[Matter] Handling {}", message);
        match message {
            BridgeMessage::AddDevice(id) => self.map_device(id),
            BridgeMessage::RemoveDevice(id) => {
                if let Some(index) = self.allocator.lock().free(id) {
                    info!("[Matter] {} unmapped from slot {}", id, index);
                }
            }
            BridgeMessage::FactoryReset => self.allocator.lock().free_all(),
        }
        self.mailbox.finish();
        true
    }

    fn map_device(&self, id: DeviceId) {
        let record = match self.devices.snapshot(id) {
            Ok(record) if record.state == DeviceState::AnnounceCompleted => record,
            Ok(record) => {
                debug!("[Matter] {} is {}, not mapping", id, record.state);
                return;
            }
            Err(e) => {
                debug!("[Matter] {} vanished before mapping: {}", id, e);
                return;
            }
        };
        let clusters = allocator::cluster_list(&record, &self.translator);
        let name = record.display_name();
        let has_on_off = record.has_server_cluster(zcl::cluster::ON_OFF);
        if let Some(ep) = record.endpoints.first() {
            info!(
                "[Matter] Mapping {} ({}, {})",
                name,
                translator::device_type_name(ep.device_id),
                id
            );
        }

        let allocated = self
            .allocator
            .lock()
            .allocate(id, &clusters, &name, has_on_off);
        match allocated {
            Ok(index) => {
                let attached = self.devices.lock(id).map(|mut r| {
                    r.mapped_slot = Some(index);
                    r.name = name;
                    r.mapping_failed = false;
                    r.advance(DeviceState::ReadAttrsCompleted);
                });
                if attached.is_err() {
                    // released while we were registering it
                    self.allocator.lock().free(id);
                    return;
                }
                self.devices.notify(id);
                self.notify_reachability(id, true);
                self.scheduler.enqueue(id);
            }
            Err(e) => {
                error!("[Matter] Could not map {}: {}", id, e);
                if let Ok(mut record) = self.devices.lock(id) {
                    record.mapping_failed = true;
                }
                self.devices.notify(id);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Zigbee thread
    // ---------------------------------------------------------------------

    /// Post a fully discovered device to the Matter side and wait until it
    /// has been mapped, failed to map, or the hand-off timed out.
    pub(crate) fn hand_off(&self, id: DeviceId) -> Result<()> {
        let timeout = self.config.bridge.handoff_timeout();
        let deadline = Instant::now() + timeout;
        if let Err(e) = self.mailbox.post(BridgeMessage::AddDevice(id), timeout) {
            warn!("[Bridge] Could not hand {} to the Matter side: {}", id, e);
            if let Ok(mut record) = self.devices.lock(id) {
                record.mapping_failed = true;
            }
            return Err(e);
        }
        let settled = self.devices.wait_until(id, deadline, |r| {
            r.state != DeviceState::AnnounceCompleted || r.mapping_failed
        })?;
        if !settled {
            warn!("[Bridge] Matter side did not pick up {} within {:?}", id, timeout);
        }
        Ok(())
    }

    pub(crate) fn mark_reachable(&self, id: DeviceId) {
        let changed = {
            let mut allocator = self.allocator.lock();
            allocator
                .slot_for_device(id)
                .is_some_and(|index| allocator.mark_reachable(index))
        };
        if changed {
            info!("[Bridge] {} reachable again", id);
            self.notify_reachability(id, true);
        }
    }

    pub(crate) fn mark_unreachable(&self, id: DeviceId) {
        let changed = {
            let mut allocator = self.allocator.lock();
            allocator
                .slot_for_device(id)
                .is_some_and(|index| allocator.mark_unreachable(index))
        };
        if changed {
            warn!("[Bridge] {} unreachable", id);
            self.notify_reachability(id, false);
        }
    }

    fn notify_reachability(&self, id: DeviceId, reachable: bool) {
        for callback in self.reachability_callbacks.read().iter() {
            callback(id, reachable);
        }
    }
}

fn copy_out(out: &mut [u8], value: &[u8]) -> Result<usize> {
    let dst = out
        .get_mut(..value.len())
        .ok_or(BridgeError::CapacityExceeded("read buffer"))?;
    dst.copy_from_slice(value);
    Ok(value.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::zigbee::IeeeAddr;
    use crate::zigbee::simulator::{
        SimRequest, SimulatedAttribute, SimulatedCluster, SimulatedEndpoint, SimulatedNetwork,
        SimulatedNode,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LIGHT: ShortAddr = 0x1234;

    fn light_ieee() -> IeeeAddr {
        "00:11:22:33:44:55:66:77".parse().unwrap()
    }

    /// Endpoint 1 with a single On/Off cluster holding OnOff = 1.
    fn minimal_light() -> SimulatedNode {
        SimulatedNode::new(LIGHT, light_ieee()).with_endpoint(
            SimulatedEndpoint::new(1, 0x0100).with_cluster(
                SimulatedCluster::new(zcl::cluster::ON_OFF).with_attribute(SimulatedAttribute::new(
                    zcl::on_off::ATTR_ON_OFF,
                    zcl::data_type::BOOL,
                    &[0x01],
                )),
            ),
        )
    }

    fn completed(harness: &Harness, short_addr: ShortAddr) -> DeviceId {
        harness
            .wait_for_state(short_addr, DeviceState::is_completed)
            .unwrap_or_else(|| panic!("device 0x{:04x} never completed", short_addr))
    }

    #[test]
    fn test_end_to_end_on_off_light() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);

        let record = harness.bridge.device_record(id).unwrap();
        assert_eq!(record.ieee_addr, light_ieee());
        assert_eq!(record.state, DeviceState::Completed);
        assert!(record.mapped_slot.is_some());

        let endpoint = harness.bridge.endpoint_for_device(id).unwrap();
        assert_eq!(harness.bridge.device_for_endpoint(endpoint), Some(id));
        let registered = harness.registry.find(endpoint).unwrap();
        assert_eq!(
            registered.clusters,
            vec![
                ids::cluster::DESCRIPTOR,
                ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
                ids::cluster::ON_OFF,
            ]
        );

        let mut out = [0u8; 8];
        let len = harness
            .bridge
            .handle_read_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_OFF, &mut out)
            .unwrap();
        assert_eq!(&out[..len], &[0x01]);
    }

    #[test]
    fn test_discovery_request_order() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        completed(&harness, LIGHT);

        let requests = harness.network.requests_to(LIGHT);
        let position = |pred: fn(&SimRequest) -> bool| requests.iter().position(pred).unwrap();
        let ieee = position(|r| matches!(r, SimRequest::IeeeAddr { .. }));
        let active = position(|r| matches!(r, SimRequest::ActiveEndpoints { .. }));
        let simple = position(|r| matches!(r, SimRequest::SimpleDescriptor { .. }));
        let disc = position(|r| matches!(r, SimRequest::AttributeDiscovery { .. }));
        let read = position(|r| matches!(r, SimRequest::Read { .. }));
        let bind = position(|r| matches!(r, SimRequest::Bind { .. }));
        let report = position(|r| matches!(r, SimRequest::ConfigureReporting { .. }));
        assert!(ieee < active && active < simple && simple < disc && disc < read);
        assert!(read < bind && bind < report);
    }

    #[test]
    fn test_read_of_unknown_handle() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);
        harness.network.leave(light_ieee());
        assert!(harness.wait_until(|| harness.bridge.device_by_short(LIGHT).is_none()));

        let mut out = [0u8; 4];
        assert!(matches!(
            harness
                .bridge
                .handle_read_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_OFF, &mut out),
            Err(BridgeError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_reachable_is_answered_locally() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);
        harness.network.set_silent(LIGHT, true);
        let before = harness.network.requests_to(LIGHT).len();

        let mut out = [0u8; 1];
        let len = harness
            .bridge
            .handle_read_attribute(
                id,
                ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
                ids::basic_info::REACHABLE,
                &mut out,
            )
            .unwrap();
        assert_eq!(&out[..len], &[1]);
        assert_eq!(harness.network.requests_to(LIGHT).len(), before);
    }

    #[test]
    fn test_read_into_short_buffer() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);
        let mut out = [0u8; 0];
        assert_eq!(
            harness
                .bridge
                .handle_read_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_OFF, &mut out),
            Err(BridgeError::CapacityExceeded("read buffer"))
        );
    }

    #[test]
    fn test_read_timeout_serves_cached_value() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);
        harness.network.set_silent(LIGHT, true);

        let mut out = [0u8; 4];
        let len = harness
            .bridge
            .handle_read_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_OFF, &mut out)
            .unwrap();
        assert_eq!(&out[..len], &[0x01]);
        // reads never flip reachability
        assert!(harness.bridge.is_reachable(id));
    }

    #[test]
    fn test_second_command_is_busy() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);
        harness.network.set_silent(LIGHT, true);

        let first = {
            let bridge = harness.bridge.clone();
            std::thread::spawn(move || bridge.invoke_command(id, LocalCommand::On))
        };
        assert!(harness.wait_until(|| {
            harness
                .network
                .requests_to(LIGHT)
                .iter()
                .any(|r| matches!(r, SimRequest::Command { .. }))
        }));
        assert_eq!(
            harness.bridge.invoke_command(id, LocalCommand::Off),
            Err(BridgeError::Busy(ids::cluster::ON_OFF))
        );
        assert!(matches!(first.join().unwrap(), Err(BridgeError::Timeout(_))));

        let commands = harness
            .network
            .requests_to(LIGHT)
            .into_iter()
            .filter(|r| matches!(r, SimRequest::Command { .. }))
            .count();
        assert_eq!(commands, 1);
    }

    #[test]
    fn test_write_timeout_marks_unreachable() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(SimulatedNode::on_off_light(LIGHT, light_ieee(), true));
        let id = completed(&harness, LIGHT);

        let flips = Arc::new(Mutex::new(Vec::new()));
        {
            let flips = flips.clone();
            harness
                .bridge
                .register_reachability_change_callback(Box::new(move |device, reachable| {
                    flips.lock().push((device, reachable));
                }));
        }

        harness.network.set_silent(LIGHT, true);
        assert!(matches!(
            harness.bridge.handle_write_attribute(
                id,
                ids::cluster::ON_OFF,
                ids::on_off::ON_TIME,
                &[0x10, 0x00]
            ),
            Err(BridgeError::Timeout(_))
        ));
        assert!(!harness.bridge.is_reachable(id));
        assert_eq!(flips.lock().as_slice(), &[(id, false)]);
        assert_eq!(
            harness.bridge.invoke_command(id, LocalCommand::On),
            Err(BridgeError::Unreachable)
        );

        // any later answer from the device brings it back
        harness.network.set_silent(LIGHT, false);
        harness
            .network
            .report(LIGHT, 1, zcl::cluster::ON_OFF, zcl::on_off::ATTR_ON_OFF);
        assert!(harness.wait_until(|| harness.bridge.is_reachable(id)));
        assert_eq!(flips.lock().last(), Some(&(id, true)));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(SimulatedNode::on_off_light(LIGHT, light_ieee(), false));
        let id = completed(&harness, LIGHT);

        harness
            .bridge
            .handle_write_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_TIME, &[0x2C, 0x01])
            .unwrap();
        let mut out = [0u8; 4];
        let len = harness
            .bridge
            .handle_read_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_TIME, &mut out)
            .unwrap();
        assert_eq!(&out[..len], &[0x2C, 0x01]);
    }

    #[test]
    fn test_write_of_undiscovered_attribute_is_not_dispatched() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);

        // minimal_light never reports OnTime, so its type is unknown
        let on_time = harness
            .bridge
            .translator()
            .translate_attribute(ids::cluster::ON_OFF, ids::on_off::ON_TIME);
        assert_eq!(
            harness.bridge.handle_write_attribute(
                id,
                ids::cluster::ON_OFF,
                ids::on_off::ON_TIME,
                &[0x10, 0x00]
            ),
            Err(BridgeError::UnknownAttribute(
                zcl::cluster::ON_OFF as u32,
                on_time as u32
            ))
        );
        assert!(harness.bridge.is_reachable(id));
        assert!(
            !harness
                .network
                .requests_to(LIGHT)
                .iter()
                .any(|r| matches!(r, SimRequest::Write { .. }))
        );
    }

    #[test]
    fn test_read_only_write_is_not_dispatched() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);

        assert_eq!(
            harness
                .bridge
                .handle_write_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_OFF, &[0]),
            Err(BridgeError::ReadOnlyAttribute(ids::cluster::ON_OFF, ids::on_off::ON_OFF))
        );
        assert_eq!(
            harness.bridge.handle_write_attribute(
                id,
                ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
                ids::basic_info::UNIQUE_ID,
                b"x"
            ),
            Err(BridgeError::TranslationUnsupported(
                ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
                ids::basic_info::UNIQUE_ID
            ))
        );
        assert!(
            !harness
                .network
                .requests_to(LIGHT)
                .iter()
                .any(|r| matches!(r, SimRequest::Write { .. }))
        );
    }

    #[test]
    fn test_on_is_followed_by_level() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(SimulatedNode::dimmable_light(LIGHT, light_ieee(), 0));
        let id = completed(&harness, LIGHT);

        harness.bridge.invoke_command(id, LocalCommand::On).unwrap();
        assert!(harness.wait_until(|| {
            harness.network.attribute(
                LIGHT,
                1,
                zcl::cluster::LEVEL_CONTROL,
                zcl::level_control::ATTR_CURRENT_LEVEL,
            ) == Some(vec![254])
        }));
        assert_eq!(
            harness
                .network
                .attribute(LIGHT, 1, zcl::cluster::ON_OFF, zcl::on_off::ATTR_ON_OFF),
            Some(vec![1])
        );

        let commands: Vec<(u16, u8)> = harness
            .network
            .requests_to(LIGHT)
            .into_iter()
            .filter_map(|r| match r {
                SimRequest::Command {
                    cluster_id,
                    command_id,
                    ..
                } => Some((cluster_id, command_id)),
                _ => None,
            })
            .collect();
        assert_eq!(
            commands,
            vec![
                (zcl::cluster::ON_OFF, zcl::on_off::CMD_ON),
                (
                    zcl::cluster::LEVEL_CONTROL,
                    zcl::level_control::CMD_MOVE_TO_LEVEL
                ),
            ]
        );
    }

    #[test]
    fn test_send_without_staged_command() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);
        assert!(matches!(
            harness.bridge.handle_send_command(id),
            Err(BridgeError::NoStagedCommand(_))
        ));
    }

    #[test]
    fn test_leave_frees_slot_for_new_device() {
        let mut config = Harness::fast_config();
        config.endpoints.dynamic_endpoint_count = 1;
        let harness = Harness::start(config);

        harness.network.join(minimal_light());
        let first = completed(&harness, LIGHT);
        let first_endpoint = harness.bridge.endpoint_for_device(first).unwrap();

        harness.network.leave(light_ieee());
        assert!(harness.wait_until(|| harness.registry.registered().is_empty()));

        let other = 0x5678;
        harness
            .network
            .join(SimulatedNode::on_off_light(other, IeeeAddr::from_u64(0xAB), true));
        let second = completed(&harness, other);
        let record = harness.bridge.device_record(second).unwrap();
        assert_eq!(record.mapped_slot, Some(0));
        assert_ne!(harness.bridge.endpoint_for_device(second), Some(first_endpoint));
    }

    /// Live records whose short address is `short_addr`.
    fn holders(harness: &Harness, short_addr: ShortAddr) -> Vec<DeviceId> {
        harness
            .bridge
            .devices()
            .into_iter()
            .filter(|&id| {
                harness
                    .bridge
                    .device_record(id)
                    .is_ok_and(|r| r.short_addr == short_addr)
            })
            .collect()
    }

    #[test]
    fn test_reannounce_with_new_short_address() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);

        let moved = 0x9ABC;
        let mut node = minimal_light();
        node.short_addr = moved;
        harness.network.join(node);
        assert!(harness.wait_until(|| harness.bridge.device_by_short(moved) == Some(id)));

        assert!(holders(&harness, LIGHT).is_empty());
        assert_eq!(harness.bridge.devices(), vec![id]);
        let mut out = [0u8; 8];
        let len = harness
            .bridge
            .handle_read_attribute(id, ids::cluster::ON_OFF, ids::on_off::ON_OFF, &mut out)
            .unwrap();
        assert_eq!(&out[..len], &[0x01]);
    }

    #[test]
    fn test_reannounce_onto_taken_short_address() {
        let harness = Harness::start(Harness::fast_config());
        let other = 0x5678;
        let other_ieee = IeeeAddr::from_u64(0xAB);
        harness.network.join(minimal_light());
        harness
            .network
            .join(SimulatedNode::on_off_light(other, other_ieee, false));
        let light = completed(&harness, LIGHT);
        let rejoined = completed(&harness, other);

        // the light dropped off without a leave and its address was reassigned
        harness
            .network
            .join(SimulatedNode::on_off_light(LIGHT, other_ieee, false));
        assert!(harness.wait_until(|| harness.bridge.device_record(light).is_err()));
        assert!(harness.wait_until(|| harness.registry.registered().len() == 1));

        assert_eq!(holders(&harness, LIGHT), vec![rejoined]);
        assert_eq!(harness.bridge.device_by_short(LIGHT), Some(rejoined));
        assert_eq!(harness.bridge.devices(), vec![rejoined]);

        let mut out = [0u8; 8];
        let len = harness
            .bridge
            .handle_read_attribute(rejoined, ids::cluster::ON_OFF, ids::on_off::ON_OFF, &mut out)
            .unwrap();
        assert_eq!(&out[..len], &[0x00]);
    }

    #[test]
    fn test_full_table_then_retry_mapping() {
        let mut config = Harness::fast_config();
        config.endpoints.dynamic_endpoint_count = 1;
        let harness = Harness::start(config);

        harness.network.join(minimal_light());
        completed(&harness, LIGHT);

        let other = 0x5678;
        harness
            .network
            .join(SimulatedNode::on_off_light(other, IeeeAddr::from_u64(0xAB), true));
        let second = harness
            .wait_for(other, |r| r.mapping_failed)
            .expect("mapping should fail while the table is full");
        assert_eq!(
            harness.bridge.device_state(second),
            Ok(DeviceState::AnnounceCompleted)
        );

        harness.network.leave(light_ieee());
        assert!(harness.wait_until(|| harness.registry.registered().is_empty()));
        harness.bridge.retry_mapping(second).unwrap();
        completed(&harness, other);
    }

    #[test]
    fn test_attribute_report_reaches_matter() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        let id = completed(&harness, LIGHT);
        let endpoint = harness.bridge.endpoint_for_device(id).unwrap();
        harness.registry.take_changes();

        harness.network.set_attribute(
            LIGHT,
            1,
            zcl::cluster::ON_OFF,
            zcl::on_off::ATTR_ON_OFF,
            &[0x00],
        );
        harness
            .network
            .report(LIGHT, 1, zcl::cluster::ON_OFF, zcl::on_off::ATTR_ON_OFF);
        assert!(harness.wait_until(|| {
            harness.registry.take_changes().iter().any(|c| {
                c.endpoint_id == endpoint
                    && c.cluster_id == ids::cluster::ON_OFF
                    && c.attr_id == ids::on_off::ON_OFF
            })
        }));
        let value = harness
            .bridge
            .device_record(id)
            .unwrap()
            .u8_value(zcl::cluster::ON_OFF, zcl::on_off::ATTR_ON_OFF);
        assert_eq!(value, Some(0));
    }

    #[test]
    fn test_device_named_from_basic_cluster() {
        let harness = Harness::start(Harness::fast_config());
        harness
            .network
            .join(SimulatedNode::on_off_light(LIGHT, light_ieee(), true));
        let id = completed(&harness, LIGHT);
        let endpoint = harness.bridge.endpoint_for_device(id).unwrap();
        assert_eq!(harness.registry.find(endpoint).unwrap().name, "Simulated-OnOffLight@1234");

        let mut out = [0u8; 32];
        let len = harness
            .bridge
            .handle_read_attribute(
                id,
                ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
                ids::basic_info::VENDOR_NAME,
                &mut out,
            )
            .unwrap();
        assert_eq!(&out[..len], b"\x09Simulated");
    }

    #[test]
    fn test_silent_device_is_given_up() {
        let mut config = Harness::fast_config();
        config.discovery.max_retries = 2;
        let harness = Harness::start(config);
        harness.network.join(minimal_light().silent());

        let ieee_requests = || {
            harness
                .network
                .requests_to(LIGHT)
                .into_iter()
                .filter(|r| matches!(r, SimRequest::IeeeAddr { .. }))
                .count()
        };
        assert!(harness.wait_until(|| {
            ieee_requests() == 3 && harness.bridge.device_by_short(LIGHT).is_none()
        }));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ieee_requests(), 3);
        assert!(harness.registry.registered().is_empty());
    }

    #[test]
    fn test_authorization_gates_announce() {
        let mut config = Harness::fast_config();
        config.discovery.require_authorization = true;
        let harness = Harness::start(config);
        harness.network.join(minimal_light());

        let id = harness
            .wait_for(LIGHT, |r| r.state == DeviceState::AuthorizationDiscovery)
            .expect("device should wait for authorization");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            harness.bridge.device_state(id),
            Ok(DeviceState::AuthorizationDiscovery)
        );

        harness.bridge.on_device_authorized(light_ieee(), 1, 0);
        completed(&harness, LIGHT);
        let record = harness.bridge.device_record(id).unwrap();
        assert_eq!(record.authorization.auth_type, 1);
    }

    #[test]
    fn test_factory_reset_clears_everything() {
        let harness = Harness::start(Harness::fast_config());
        harness.network.join(minimal_light());
        completed(&harness, LIGHT);

        harness.bridge.factory_reset().unwrap();
        assert!(harness.wait_until(|| harness.registry.registered().is_empty()));
        assert!(harness.bridge.devices().is_empty());
    }

    #[test]
    fn test_state_edges_under_random_orderings() {
        for seed in 0..6u64 {
            let harness =
                Harness::with_network(Harness::fast_config(), SimulatedNetwork::shuffled(seed));
            let shorts = [0x1001, 0x1002, 0x1003];
            harness
                .network
                .join(SimulatedNode::on_off_light(shorts[0], IeeeAddr::from_u64(1), true));
            harness
                .network
                .join(SimulatedNode::dimmable_light(shorts[1], IeeeAddr::from_u64(2), 80));
            harness
                .network
                .join(SimulatedNode::temperature_sensor(shorts[2], IeeeAddr::from_u64(3), 2150));

            for short_addr in shorts {
                let id = completed(&harness, short_addr);
                let history = harness.bridge.device_record(id).unwrap().state_history;
                assert_eq!(history.first(), Some(&DeviceState::IeeeAddrDiscovery));
                let mut previous = DeviceState::NoDevice;
                for state in history {
                    assert!(
                        previous.can_advance_to(state),
                        "seed {}: illegal edge {} -> {}",
                        seed,
                        previous,
                        state
                    );
                    previous = state;
                }
            }
            let sensor = harness.bridge.device_by_short(shorts[2]).unwrap();
            assert_eq!(
                harness.bridge.device_state(sensor),
                Ok(DeviceState::CompletedNoToggle)
            );
        }
    }

    #[test]
    fn test_callbacks_see_every_mapping() {
        let harness = Harness::start(Harness::fast_config());
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            harness
                .bridge
                .register_reachability_change_callback(Box::new(move |_, reachable| {
                    if reachable {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }));
        }
        harness.network.join(minimal_light());
        completed(&harness, LIGHT);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
