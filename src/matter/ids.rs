//! Matter identifiers for the clusters a bridged endpoint can expose.

pub type EndptId = u16;
pub type ClusterId = u32;
pub type AttrId = u32;
pub type CmdId = u32;

pub mod cluster {
    use super::ClusterId;

    pub const IDENTIFY: ClusterId = 0x0003;
    pub const GROUPS: ClusterId = 0x0004;
    pub const SCENES: ClusterId = 0x0005;
    pub const ON_OFF: ClusterId = 0x0006;
    pub const LEVEL_CONTROL: ClusterId = 0x0008;
    pub const BINARY_INPUT_BASIC: ClusterId = 0x000F;
    pub const DESCRIPTOR: ClusterId = 0x001D;
    pub const POWER_SOURCE: ClusterId = 0x002F;
    pub const BRIDGED_DEVICE_BASIC_INFORMATION: ClusterId = 0x0039;
    pub const BOOLEAN_STATE: ClusterId = 0x0045;
    pub const DOOR_LOCK: ClusterId = 0x0101;
    pub const WINDOW_COVERING: ClusterId = 0x0102;
    pub const THERMOSTAT: ClusterId = 0x0201;
    pub const FAN_CONTROL: ClusterId = 0x0202;
    pub const COLOR_CONTROL: ClusterId = 0x0300;
    pub const ILLUMINANCE_MEASUREMENT: ClusterId = 0x0400;
    pub const TEMPERATURE_MEASUREMENT: ClusterId = 0x0402;
    pub const PRESSURE_MEASUREMENT: ClusterId = 0x0403;
    pub const FLOW_MEASUREMENT: ClusterId = 0x0404;
    pub const RELATIVE_HUMIDITY_MEASUREMENT: ClusterId = 0x0405;
    pub const OCCUPANCY_SENSING: ClusterId = 0x0406;
}

/// BridgedDeviceBasicInformation attributes (numbered as in BasicInformation).
pub mod basic_info {
    use super::AttrId;

    pub const DATA_MODEL_REVISION: AttrId = 0x0000;
    pub const VENDOR_NAME: AttrId = 0x0001;
    pub const VENDOR_ID: AttrId = 0x0002;
    pub const PRODUCT_NAME: AttrId = 0x0003;
    pub const PRODUCT_ID: AttrId = 0x0004;
    pub const NODE_LABEL: AttrId = 0x0005;
    pub const LOCATION: AttrId = 0x0006;
    pub const HARDWARE_VERSION: AttrId = 0x0007;
    pub const HARDWARE_VERSION_STRING: AttrId = 0x0008;
    pub const SOFTWARE_VERSION: AttrId = 0x0009;
    pub const SOFTWARE_VERSION_STRING: AttrId = 0x000A;
    pub const MANUFACTURING_DATE: AttrId = 0x000B;
    pub const PART_NUMBER: AttrId = 0x000C;
    pub const PRODUCT_URL: AttrId = 0x000D;
    pub const PRODUCT_LABEL: AttrId = 0x000E;
    pub const SERIAL_NUMBER: AttrId = 0x000F;
    pub const LOCAL_CONFIG_DISABLED: AttrId = 0x0010;
    pub const REACHABLE: AttrId = 0x0011;
    pub const UNIQUE_ID: AttrId = 0x0012;
}

pub mod on_off {
    use super::{AttrId, CmdId};

    pub const ON_OFF: AttrId = 0x0000;
    pub const GLOBAL_SCENE_CONTROL: AttrId = 0x4000;
    pub const ON_TIME: AttrId = 0x4001;
    pub const OFF_WAIT_TIME: AttrId = 0x4002;
    pub const START_UP_ON_OFF: AttrId = 0x4003;

    pub const CMD_OFF: CmdId = 0x00;
    pub const CMD_ON: CmdId = 0x01;
    pub const CMD_TOGGLE: CmdId = 0x02;
}

pub mod level_control {
    use super::{AttrId, CmdId};

    pub const CURRENT_LEVEL: AttrId = 0x0000;
    pub const REMAINING_TIME: AttrId = 0x0001;
    pub const MIN_LEVEL: AttrId = 0x0002;
    pub const MAX_LEVEL: AttrId = 0x0003;
    pub const CURRENT_FREQUENCY: AttrId = 0x0004;
    pub const MIN_FREQUENCY: AttrId = 0x0005;
    pub const MAX_FREQUENCY: AttrId = 0x0006;
    pub const OPTIONS: AttrId = 0x000F;
    pub const ON_LEVEL: AttrId = 0x0011;

    pub const CMD_MOVE_TO_LEVEL: CmdId = 0x00;
    pub const CMD_MOVE_TO_LEVEL_WITH_ON_OFF: CmdId = 0x04;
}

pub mod identify {
    use super::{AttrId, CmdId};

    pub const IDENTIFY_TIME: AttrId = 0x0000;

    pub const CMD_IDENTIFY: CmdId = 0x00;
}

pub mod groups {
    use super::CmdId;

    pub const CMD_ADD_GROUP: CmdId = 0x00;
    pub const CMD_REMOVE_GROUP: CmdId = 0x03;
}

/// Device type used for every bridged endpoint's descriptor.
pub const DEVICE_TYPE_BRIDGED_NODE: u32 = 0x0013;
