//! Request scheduling towards the Zigbee stack.
//!
//! Callers on the Matter side never talk to the Zigbee stack directly. They
//! record what they want (a read, a write or a command) on the device record
//! and enqueue the device; the Zigbee thread then drains the queue through
//! [`Bridge::dispatch`] and issues the actual requests.

use super::Bridge;
use super::catalog::{
    AttrRef, AttrState, AttrValue, CommandPayload, CommandRequest, PendingWrite, attr_value,
};
use super::device_table::DeviceId;
use super::discovery::{self, InFlight, Plan};
use crate::error::{BridgeError, Result};
use crate::zigbee::{IeeeAddr, RemoteStack, ReportingConfig, ShortAddr, zcl};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// FIFO of devices with work for the Zigbee thread.
pub struct Scheduler {
    queue: Mutex<VecDeque<DeviceId>>,
    ready: Condvar,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Queue `id` for dispatch. A device already queued is not queued twice.
    pub fn enqueue(&self, id: DeviceId) {
        let mut queue = self.queue.lock();
        if !queue.contains(&id) {
            queue.push_back(id);
        }
        self.ready.notify_one();
    }

    /// Pop the next device, waiting up to `timeout` for one to show up.
    pub fn next(&self, timeout: Duration) -> Option<DeviceId> {
        let mut queue = self.queue.lock();
        if queue.is_empty() && !timeout.is_zero() {
            let deadline = Instant::now() + timeout;
            while queue.is_empty() {
                if self.ready.wait_until(&mut queue, deadline).timed_out() {
                    break;
                }
            }
        }
        queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A request resolved against the device record, ready to hand to the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    IeeeAddr,
    ActiveEndpoints,
    SimpleDescriptor {
        endpoint: u8,
    },
    AttributeDiscovery {
        endpoint: u8,
        cluster_id: u16,
        start_attr: u16,
    },
    Read {
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
    },
    Write {
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        data_type: u8,
        value: AttrValue,
    },
    Command {
        endpoint: u8,
        cluster_id: u16,
        command_id: u8,
        payload: CommandPayload,
    },
    Bind {
        endpoint: u8,
        cluster_id: u16,
    },
    Reporting {
        endpoint: u8,
        cluster_id: u16,
        config: ReportingConfig,
    },
}

impl Request {
    pub(crate) fn send(
        &self,
        remote: &dyn RemoteStack,
        short_addr: ShortAddr,
        ieee_addr: IeeeAddr,
        local_endpoint: u8,
    ) {
        debug!("[Zigbee] -> 0x{:04x}: {:?}", short_addr, self);
        match self {
            Request::IeeeAddr => remote.request_ieee_addr(short_addr),
            Request::ActiveEndpoints => remote.request_active_endpoints(short_addr),
            Request::SimpleDescriptor { endpoint } => {
                remote.request_simple_descriptor(short_addr, *endpoint)
            }
            Request::AttributeDiscovery {
                endpoint,
                cluster_id,
                start_attr,
            } => remote.request_attribute_discovery(short_addr, *endpoint, *cluster_id, *start_attr),
            Request::Read {
                endpoint,
                cluster_id,
                attr_id,
            } => remote.request_read_attribute(short_addr, *endpoint, *cluster_id, *attr_id),
            Request::Write {
                endpoint,
                cluster_id,
                attr_id,
                data_type,
                value,
            } => remote.request_write_attribute(
                short_addr,
                *endpoint,
                *cluster_id,
                *attr_id,
                *data_type,
                value,
            ),
            Request::Command {
                endpoint,
                cluster_id,
                command_id,
                payload,
            } => remote.request_send_command(short_addr, *endpoint, *cluster_id, *command_id, payload),
            Request::Bind {
                endpoint,
                cluster_id,
            } => remote.request_bind(short_addr, ieee_addr, *endpoint, *cluster_id, local_endpoint),
            Request::Reporting {
                endpoint,
                cluster_id,
                config,
            } => remote.request_configure_reporting(short_addr, *endpoint, *cluster_id, *config),
        }
    }
}

impl Bridge {
    /// Issue everything the device is waiting on: the next discovery step if
    /// none is in flight, plus unsent writes and commands.
    ///
    /// Runs on the Zigbee thread. The record lock is released before any
    /// request reaches the stack.
    pub(crate) fn dispatch(&self, id: DeviceId) -> Result<()> {
        let mut requests = Vec::new();
        let mut handoff = false;
        let (short_addr, ieee_addr) = {
            let mut record = self.devices.lock(id)?;
            if record.in_flight.is_none() {
                match discovery::plan(&mut record) {
                    Plan::Send(step) => {
                        if let Some(request) = step.request(&record, &self.config.discovery) {
                            requests.push(request);
                        }
                        record.in_flight = Some(InFlight::new(step, Instant::now()));
                    }
                    Plan::Handoff => {
                        record.announced_to_bridge = true;
                        handoff = true;
                    }
                    Plan::Idle => {}
                }
            }

            for endpoint in record.endpoints.iter_mut() {
                let endpoint_id = endpoint.endpoint_id;
                for cluster in endpoint.clusters.iter_mut() {
                    if let Some(command) = cluster.pending_command.as_mut()
                        && !command.sent
                    {
                        command.sent = true;
                        requests.push(Request::Command {
                            endpoint: endpoint_id,
                            cluster_id: cluster.cluster_id,
                            command_id: command.command_id,
                            payload: command.payload.clone(),
                        });
                    }
                    for attr in cluster.attributes.iter_mut() {
                        if let Some(write) = attr.pending_write.as_mut()
                            && !write.sent
                        {
                            write.sent = true;
                            requests.push(Request::Write {
                                endpoint: endpoint_id,
                                cluster_id: cluster.cluster_id,
                                attr_id: attr.attr_id,
                                data_type: write.data_type,
                                value: write.value.clone(),
                            });
                        }
                    }
                }
            }
            (record.short_addr, record.ieee_addr)
        };

        for request in &requests {
            request.send(
                self.remote.as_ref(),
                short_addr,
                ieee_addr,
                self.config.bridge.local_endpoint,
            );
        }
        if handoff {
            self.hand_off(id)?;
        }
        Ok(())
    }

    /// One turn of the Zigbee thread: dispatch every queued device, then
    /// retry or abandon discovery steps that went unanswered.
    ///
    /// Returns the number of devices dispatched.
    pub fn run_remote_once(&self, wait: Duration) -> usize {
        let mut dispatched = 0;
        let mut wait = wait;
        while let Some(id) = self.scheduler.next(wait) {
            wait = Duration::ZERO;
            dispatched += 1;
            if let Err(e) = self.dispatch(id) {
                debug!("[Bridge] Dropping work for {}: {}", id, e);
            }
        }
        self.expire_stale(Instant::now());
        dispatched
    }

    /// Queue a read of a remote attribute, appending it to the catalog if it
    /// has not been discovered. Only one read per device is in flight; later
    /// reads wait their turn.
    pub fn schedule_read(&self, device: DeviceId, cluster_id: u16, attr_id: u16) -> Result<AttrRef> {
        let at = {
            let mut record = self.devices.lock(device)?;
            let at = record.upsert_attribute(cluster_id, attr_id, zcl::data_type::NULL)?;
            if let Some(attr) = record.attribute_mut(at)
                && attr.state != AttrState::RequestedValueRead
            {
                attr.state = AttrState::ScheduledValueRead;
            }
            at
        };
        self.scheduler.enqueue(device);
        Ok(at)
    }

    /// Write a remote attribute and block until the device answers.
    ///
    /// On timeout the device is marked unreachable.
    pub fn schedule_write(
        &self,
        device: DeviceId,
        cluster_id: u16,
        attr_id: u16,
        value: &[u8],
    ) -> Result<()> {
        let value = attr_value(value)?;
        let at = {
            let mut record = self.devices.lock(device)?;
            // the wire format needs the type discovery reported
            let unknown = BridgeError::UnknownAttribute(cluster_id as u32, attr_id as u32);
            let at = record.find_attribute(cluster_id, attr_id).ok_or(unknown.clone())?;
            let attr = record.attribute_mut(at).ok_or(unknown.clone())?;
            if attr.data_type == zcl::data_type::NULL {
                return Err(unknown);
            }
            if attr.pending_write.is_some() {
                return Err(BridgeError::Busy(cluster_id as u32));
            }
            attr.pending_write = Some(PendingWrite {
                data_type: attr.data_type,
                value,
                sent: false,
            });
            at
        };
        self.scheduler.enqueue(device);

        let timeout = self.config.bridge.write_timeout();
        let done = self.devices.wait_until(device, Instant::now() + timeout, |r| {
            r.attribute(at).is_none_or(|a| a.pending_write.is_none())
        })?;
        if !done {
            if let Ok(mut record) = self.devices.lock(device)
                && let Some(attr) = record.attribute_mut(at)
            {
                attr.pending_write = None;
            }
            warn!(
                "[Bridge] Write of 0x{:04x}/0x{:04x} on {} timed out",
                cluster_id, attr_id, device
            );
            self.mark_unreachable(device);
            return Err(BridgeError::Timeout(timeout.as_millis() as u64));
        }

        let status = self
            .devices
            .lock(device)?
            .attribute(at)
            .map_or(zcl::status::FAILURE, |a| a.zb_status);
        match status {
            zcl::status::SUCCESS => Ok(()),
            status => Err(BridgeError::RemoteStatus(status)),
        }
    }

    /// Send a cluster command and block until the device acknowledges it.
    ///
    /// Fails with `Busy` while another command is outstanding on the same
    /// cluster. After an acknowledgement the caller is held for the settle
    /// delay so that follow-up reads observe the new state.
    pub fn schedule_command(
        &self,
        device: DeviceId,
        cluster_id: u16,
        command_id: u8,
        payload: &[u8],
    ) -> Result<()> {
        let payload = CommandPayload::from_slice(payload)
            .map_err(|_| BridgeError::CapacityExceeded("command payload"))?;
        let at = {
            let mut record = self.devices.lock(device)?;
            let at = record
                .find_cluster(cluster_id)
                .ok_or(BridgeError::UnknownCluster(cluster_id as u32))?;
            let cluster = record
                .cluster_mut(at)
                .ok_or(BridgeError::UnknownCluster(cluster_id as u32))?;
            if cluster.pending_command.is_some() {
                return Err(BridgeError::Busy(cluster_id as u32));
            }
            cluster.pending_command = Some(CommandRequest {
                command_id,
                payload,
                sent: false,
            });
            cluster.last_command_status = None;
            at
        };
        self.scheduler.enqueue(device);

        let timeout = self.config.bridge.command_timeout();
        let done = self.devices.wait_until(device, Instant::now() + timeout, |r| {
            r.cluster(at).is_none_or(|c| c.pending_command.is_none())
        })?;
        if !done {
            if let Ok(mut record) = self.devices.lock(device)
                && let Some(cluster) = record.cluster_mut(at)
            {
                cluster.pending_command = None;
            }
            warn!(
                "[Bridge] Command 0x{:02x} on cluster 0x{:04x} of {} timed out",
                command_id, cluster_id, device
            );
            self.mark_unreachable(device);
            return Err(BridgeError::Timeout(timeout.as_millis() as u64));
        }

        let status = self
            .devices
            .lock(device)?
            .cluster(at)
            .and_then(|c| c.last_command_status)
            .unwrap_or(zcl::status::FAILURE);
        if status != zcl::status::SUCCESS {
            return Err(BridgeError::RemoteStatus(status));
        }
        thread::sleep(self.config.bridge.settle());
        Ok(())
    }
}
