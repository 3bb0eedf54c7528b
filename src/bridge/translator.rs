//! Zigbee ↔ Matter cluster, attribute and command translation.
//!
//! Most bridged clusters share their numbering between the two data models.
//! The exceptions are the device information cluster (Matter
//! BridgedDeviceBasicInformation served from ZCL Basic) and a few clusters
//! that Matter renumbered.

use super::catalog::CommandPayload;
use crate::error::{BridgeError, Result};
use crate::matter::ids::{self, AttrId, ClusterId, CmdId};
use crate::zigbee::zcl;
use strum::IntoEnumIterator;

/// Remote attribute id returned when a Matter attribute has no ZCL source.
pub const UNSUPPORTED_ATTRIBUTE: u16 = 0xFF;

/// Clusters the bridge knows how to expose.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
pub enum BridgedCluster {
    BasicInformation,
    Identify,
    Groups,
    Scenes,
    OnOff,
    LevelControl,
    BinaryInput,
    PowerSource,
    DoorLock,
    WindowCovering,
    Thermostat,
    FanControl,
    ColorControl,
    IlluminanceMeasurement,
    TemperatureMeasurement,
    PressureMeasurement,
    FlowMeasurement,
    RelativeHumidity,
    OccupancySensing,
    BooleanState,
}

/// Classification of a cluster id reported by a Zigbee device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCluster {
    Bridged(BridgedCluster),
    Unsupported(u16),
}

impl BridgedCluster {
    pub fn all() -> Vec<BridgedCluster> {
        Self::iter().collect()
    }

    pub const fn zigbee_id(self) -> u16 {
        match self {
            BridgedCluster::BasicInformation => zcl::cluster::BASIC,
            BridgedCluster::Identify => zcl::cluster::IDENTIFY,
            BridgedCluster::Groups => zcl::cluster::GROUPS,
            BridgedCluster::Scenes => zcl::cluster::SCENES,
            BridgedCluster::OnOff => zcl::cluster::ON_OFF,
            BridgedCluster::LevelControl => zcl::cluster::LEVEL_CONTROL,
            BridgedCluster::BinaryInput => zcl::cluster::BINARY_INPUT,
            BridgedCluster::PowerSource => zcl::cluster::POWER_CONFIG,
            BridgedCluster::DoorLock => zcl::cluster::DOOR_LOCK,
            BridgedCluster::WindowCovering => zcl::cluster::WINDOW_COVERING,
            BridgedCluster::Thermostat => zcl::cluster::THERMOSTAT,
            BridgedCluster::FanControl => zcl::cluster::FAN_CONTROL,
            BridgedCluster::ColorControl => zcl::cluster::COLOR_CONTROL,
            BridgedCluster::IlluminanceMeasurement => zcl::cluster::ILLUMINANCE_MEASUREMENT,
            BridgedCluster::TemperatureMeasurement => zcl::cluster::TEMPERATURE_MEASUREMENT,
            BridgedCluster::PressureMeasurement => zcl::cluster::PRESSURE_MEASUREMENT,
            BridgedCluster::FlowMeasurement => zcl::cluster::FLOW_MEASUREMENT,
            BridgedCluster::RelativeHumidity => zcl::cluster::RELATIVE_HUMIDITY,
            BridgedCluster::OccupancySensing => zcl::cluster::OCCUPANCY_SENSING,
            BridgedCluster::BooleanState => zcl::cluster::IAS_ZONE,
        }
    }

    pub const fn matter_id(self) -> ClusterId {
        match self {
            BridgedCluster::BasicInformation => ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION,
            BridgedCluster::Identify => ids::cluster::IDENTIFY,
            BridgedCluster::Groups => ids::cluster::GROUPS,
            BridgedCluster::Scenes => ids::cluster::SCENES,
            BridgedCluster::OnOff => ids::cluster::ON_OFF,
            BridgedCluster::LevelControl => ids::cluster::LEVEL_CONTROL,
            BridgedCluster::BinaryInput => ids::cluster::BINARY_INPUT_BASIC,
            BridgedCluster::PowerSource => ids::cluster::POWER_SOURCE,
            BridgedCluster::DoorLock => ids::cluster::DOOR_LOCK,
            BridgedCluster::WindowCovering => ids::cluster::WINDOW_COVERING,
            BridgedCluster::Thermostat => ids::cluster::THERMOSTAT,
            BridgedCluster::FanControl => ids::cluster::FAN_CONTROL,
            BridgedCluster::ColorControl => ids::cluster::COLOR_CONTROL,
            BridgedCluster::IlluminanceMeasurement => ids::cluster::ILLUMINANCE_MEASUREMENT,
            BridgedCluster::TemperatureMeasurement => ids::cluster::TEMPERATURE_MEASUREMENT,
            BridgedCluster::PressureMeasurement => ids::cluster::PRESSURE_MEASUREMENT,
            BridgedCluster::FlowMeasurement => ids::cluster::FLOW_MEASUREMENT,
            BridgedCluster::RelativeHumidity => ids::cluster::RELATIVE_HUMIDITY_MEASUREMENT,
            BridgedCluster::OccupancySensing => ids::cluster::OCCUPANCY_SENSING,
            BridgedCluster::BooleanState => ids::cluster::BOOLEAN_STATE,
        }
    }

    pub fn from_zigbee(cluster_id: u16) -> RemoteCluster {
        Self::iter()
            .find(|c| c.zigbee_id() == cluster_id)
            .map_or(RemoteCluster::Unsupported(cluster_id), RemoteCluster::Bridged)
    }

    pub fn from_matter(cluster_id: ClusterId) -> Option<BridgedCluster> {
        Self::iter().find(|c| c.matter_id() == cluster_id)
    }
}

/// A command as decoded by the Matter side, staged on a device before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Off,
    On,
    Toggle,
    MoveToLevel {
        level: u8,
        transition_time: u16,
        options_mask: u8,
        options_override: u8,
    },
    MoveToLevelWithOnOff {
        level: u8,
        transition_time: u16,
        options_mask: u8,
        options_override: u8,
    },
    Identify {
        identify_time: u16,
    },
    AddGroup {
        group_id: u16,
        name: String,
    },
    RemoveGroup {
        group_id: u16,
    },
    /// Anything the bridge has no encoder for.
    Other {
        cluster_id: ClusterId,
        command_id: CmdId,
    },
}

impl LocalCommand {
    pub fn cluster_id(&self) -> ClusterId {
        match self {
            LocalCommand::Off | LocalCommand::On | LocalCommand::Toggle => ids::cluster::ON_OFF,
            LocalCommand::MoveToLevel { .. } | LocalCommand::MoveToLevelWithOnOff { .. } => {
                ids::cluster::LEVEL_CONTROL
            }
            LocalCommand::Identify { .. } => ids::cluster::IDENTIFY,
            LocalCommand::AddGroup { .. } | LocalCommand::RemoveGroup { .. } => ids::cluster::GROUPS,
            LocalCommand::Other { cluster_id, .. } => *cluster_id,
        }
    }

    pub fn command_id(&self) -> CmdId {
        match self {
            LocalCommand::Off => ids::on_off::CMD_OFF,
            LocalCommand::On => ids::on_off::CMD_ON,
            LocalCommand::Toggle => ids::on_off::CMD_TOGGLE,
            LocalCommand::MoveToLevel { .. } => ids::level_control::CMD_MOVE_TO_LEVEL,
            LocalCommand::MoveToLevelWithOnOff { .. } => {
                ids::level_control::CMD_MOVE_TO_LEVEL_WITH_ON_OFF
            }
            LocalCommand::Identify { .. } => ids::identify::CMD_IDENTIFY,
            LocalCommand::AddGroup { .. } => ids::groups::CMD_ADD_GROUP,
            LocalCommand::RemoveGroup { .. } => ids::groups::CMD_REMOVE_GROUP,
            LocalCommand::Other { command_id, .. } => *command_id,
        }
    }

    fn is_on_off(&self) -> bool {
        matches!(self, LocalCommand::Off | LocalCommand::On | LocalCommand::Toggle)
    }
}

/// A ZCL command frame ready for [`crate::zigbee::RemoteStack::request_send_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub cluster_id: u16,
    pub command_id: u8,
    pub payload: CommandPayload,
}

/// Stateless translation tables, restricted to the clusters the bridge was
/// started with.
#[derive(Debug, Clone)]
pub struct Translator {
    enabled: Vec<BridgedCluster>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(&BridgedCluster::all())
    }
}

impl Translator {
    pub fn new(enabled: &[BridgedCluster]) -> Self {
        let mut clusters: Vec<BridgedCluster> = Vec::with_capacity(enabled.len());
        for cluster in enabled {
            if !clusters.contains(cluster) {
                clusters.push(*cluster);
            }
        }
        Self { enabled: clusters }
    }

    pub fn enabled(&self) -> &[BridgedCluster] {
        &self.enabled
    }

    fn is_enabled(&self, cluster: BridgedCluster) -> bool {
        self.enabled.contains(&cluster)
    }

    /// Matter cluster exposed for a Zigbee cluster, if it is bridged.
    pub fn local_cluster_for(&self, remote_cluster: u16) -> Option<ClusterId> {
        match BridgedCluster::from_zigbee(remote_cluster) {
            RemoteCluster::Bridged(c) if self.is_enabled(c) => Some(c.matter_id()),
            RemoteCluster::Bridged(_) | RemoteCluster::Unsupported(_) => None,
        }
    }

    /// Zigbee cluster serving a Matter cluster, if it is bridged.
    pub fn remote_cluster_for(&self, local_cluster: ClusterId) -> Option<u16> {
        BridgedCluster::from_matter(local_cluster)
            .filter(|c| self.is_enabled(*c))
            .map(|c| c.zigbee_id())
    }

    /// Zigbee attribute id for a Matter attribute.
    ///
    /// Returns [`UNSUPPORTED_ATTRIBUTE`] when the Matter attribute has no
    /// counterpart on the device.
    pub fn translate_attribute(&self, local_cluster: ClusterId, local_attr: AttrId) -> u16 {
        if local_cluster == ids::cluster::BRIDGED_DEVICE_BASIC_INFORMATION {
            return basic_info_attribute(local_attr);
        }
        u16::try_from(local_attr).unwrap_or(UNSUPPORTED_ATTRIBUTE)
    }

    /// Matter attribute id for a Zigbee attribute, the inverse of
    /// [`Translator::translate_attribute`].
    pub fn local_attribute_for(&self, remote_cluster: u16, remote_attr: u16) -> Option<AttrId> {
        if remote_cluster == zcl::cluster::BASIC {
            return BASIC_INFO_MAP
                .iter()
                .find(|(_, zcl_attr)| *zcl_attr == remote_attr)
                .map(|(local, _)| *local);
        }
        Some(remote_attr as AttrId)
    }

    /// Resolve a Matter (cluster, attribute) pair into its Zigbee pair.
    pub fn remote_attribute(
        &self,
        local_cluster: ClusterId,
        local_attr: AttrId,
    ) -> Result<(u16, u16)> {
        let cluster = self
            .remote_cluster_for(local_cluster)
            .ok_or(BridgeError::UnknownCluster(local_cluster))?;
        match self.translate_attribute(local_cluster, local_attr) {
            UNSUPPORTED_ATTRIBUTE => Err(BridgeError::TranslationUnsupported(
                local_cluster,
                local_attr,
            )),
            attr => Ok((cluster, attr)),
        }
    }

    /// Static writability, independent of what the device reports.
    pub fn is_writable(&self, local_cluster: ClusterId, local_attr: AttrId) -> bool {
        match local_cluster {
            ids::cluster::ON_OFF => !matches!(
                local_attr,
                ids::on_off::ON_OFF | ids::on_off::GLOBAL_SCENE_CONTROL
            ),
            ids::cluster::LEVEL_CONTROL => !matches!(
                local_attr,
                ids::level_control::CURRENT_LEVEL
                    | ids::level_control::REMAINING_TIME
                    | ids::level_control::MIN_LEVEL
                    | ids::level_control::MAX_LEVEL
                    | ids::level_control::CURRENT_FREQUENCY
                    | ids::level_control::MIN_FREQUENCY
                    | ids::level_control::MAX_FREQUENCY
            ),
            _ => true,
        }
    }

    /// Encode a Matter command into its ZCL frame.
    pub fn encode_command(&self, command: &LocalCommand) -> Result<RemoteCommand> {
        let unsupported = || {
            BridgeError::TranslationUnsupported(command.cluster_id(), command.command_id())
        };
        let cluster_id = self
            .remote_cluster_for(command.cluster_id())
            .ok_or_else(unsupported)?;

        let mut payload = CommandPayload::new();
        let command_id = match command {
            LocalCommand::Off => zcl::on_off::CMD_OFF,
            LocalCommand::On => zcl::on_off::CMD_ON,
            LocalCommand::Toggle => zcl::on_off::CMD_TOGGLE,
            LocalCommand::MoveToLevel {
                level,
                transition_time,
                options_mask,
                options_override,
            }
            | LocalCommand::MoveToLevelWithOnOff {
                level,
                transition_time,
                options_mask,
                options_override,
            } => {
                let [tt_lo, tt_hi] = transition_time.to_le_bytes();
                push_all(
                    &mut payload,
                    &[*level, tt_lo, tt_hi, *options_mask, *options_override],
                )?;
                if matches!(command, LocalCommand::MoveToLevel { .. }) {
                    zcl::level_control::CMD_MOVE_TO_LEVEL
                } else {
                    zcl::level_control::CMD_MOVE_TO_LEVEL_WITH_ON_OFF
                }
            }
            LocalCommand::Identify { identify_time } => {
                push_all(&mut payload, &identify_time.to_le_bytes())?;
                zcl::identify::CMD_IDENTIFY
            }
            LocalCommand::AddGroup { group_id, name } => {
                push_all(&mut payload, &group_id.to_le_bytes())?;
                push_all(&mut payload, name.as_bytes())?;
                zcl::groups::CMD_ADD_GROUP
            }
            LocalCommand::RemoveGroup { group_id } => {
                push_all(&mut payload, &group_id.to_le_bytes())?;
                zcl::groups::CMD_REMOVE_GROUP
            }
            LocalCommand::Other { .. } => return Err(unsupported()),
        };

        Ok(RemoteCommand {
            cluster_id,
            command_id,
            payload,
        })
    }

    /// Level Control command that mirrors an On/Off command on devices that
    /// track brightness separately from the on/off state.
    ///
    /// `current_level` is the cached CurrentLevel, consulted for Toggle.
    pub fn level_follow_up(
        &self,
        command: &LocalCommand,
        current_level: Option<u8>,
    ) -> Option<LocalCommand> {
        if !command.is_on_off() || !self.is_enabled(BridgedCluster::LevelControl) {
            return None;
        }
        let level = match command {
            LocalCommand::On => 254,
            LocalCommand::Off => 0,
            _ => {
                if current_level.unwrap_or(0) <= 1 {
                    254
                } else {
                    1
                }
            }
        };
        Some(LocalCommand::MoveToLevel {
            level,
            transition_time: 0,
            options_mask: 0,
            options_override: 0,
        })
    }
}

fn push_all(payload: &mut CommandPayload, bytes: &[u8]) -> Result<()> {
    payload
        .extend_from_slice(bytes)
        .map_err(|_| BridgeError::CapacityExceeded("command payload"))
}

const BASIC_INFO_MAP: [(AttrId, u16); 12] = [
    (ids::basic_info::DATA_MODEL_REVISION, zcl::basic_attr::ZCL_VERSION),
    (ids::basic_info::VENDOR_NAME, zcl::basic_attr::MANUFACTURER_NAME),
    (ids::basic_info::PRODUCT_ID, zcl::basic_attr::PRODUCT_CODE),
    (ids::basic_info::NODE_LABEL, zcl::basic_attr::MODEL_IDENTIFIER),
    (ids::basic_info::LOCATION, zcl::basic_attr::LOCATION_DESCRIPTION),
    (ids::basic_info::HARDWARE_VERSION, zcl::basic_attr::HW_VERSION),
    (ids::basic_info::SOFTWARE_VERSION, zcl::basic_attr::SW_BUILD_ID),
    (ids::basic_info::MANUFACTURING_DATE, zcl::basic_attr::DATE_CODE),
    (ids::basic_info::PART_NUMBER, zcl::basic_attr::MANUFACTURER_VERSION_DETAILS),
    (ids::basic_info::PRODUCT_URL, zcl::basic_attr::PRODUCT_URL),
    (ids::basic_info::PRODUCT_LABEL, zcl::basic_attr::PRODUCT_LABEL),
    (ids::basic_info::SERIAL_NUMBER, zcl::basic_attr::SERIAL_NUMBER),
];

fn basic_info_attribute(local_attr: AttrId) -> u16 {
    BASIC_INFO_MAP
        .iter()
        .find(|(local, _)| *local == local_attr)
        .map_or(UNSUPPORTED_ATTRIBUTE, |(_, remote)| *remote)
}

/// Human readable name of a Zigbee Home Automation device id.
pub fn device_type_name(device_id: u16) -> &'static str {
    match device_id {
        0x0000 => "On/Off Switch",
        0x0001 => "Level Control Switch",
        0x0002 => "On/Off Output",
        0x0003 => "Level Controllable Output",
        0x0004 => "Scene Selector",
        0x0005 => "Configuration Tool",
        0x0006 => "Remote Control",
        0x0007 => "Combined Interface",
        0x0008 => "Range Extender",
        0x0009 => "Mains Power Outlet",
        0x0100 => "On/Off Light",
        0x0101 => "Dimmable Light",
        0x0102 => "Color Dimmable Light",
        0x0103 => "On/Off Light Switch",
        0x0104 => "Dimmer Switch",
        0x0105 => "Color Dimmer Switch",
        0x0106 => "Light Sensor",
        0x0107 => "Occupancy Sensor",
        0x0200 => "Shade",
        0x0201 => "Shade Controller",
        0x0300 => "Heating/Cooling Unit",
        0x0301 => "Thermostat",
        0x0302 => "Temperature Sensor",
        0x0303 => "Pump",
        0x0304 => "Pump Controller",
        0x0305 => "Pressure Sensor",
        0x0306 => "Flow Sensor",
        0x0400 => "IAS Control and Indicating Equipment",
        0x0401 => "IAS Ancillary Control Equipment",
        0x0402 => "IAS Zone",
        0x0403 => "IAS Warning Device",
        _ => "Undefined Device",
    }
}
