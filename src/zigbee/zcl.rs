//! ZCL identifiers used by the bridge.
//!
//! Only the subset the bridge translates, binds or reads during discovery is
//! listed here. Numbering follows the Zigbee Cluster Library.

pub const PROFILE_HOME_AUTOMATION: u16 = 0x0104;

pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const DEVICE_TEMP_CONFIG: u16 = 0x0002;
    pub const IDENTIFY: u16 = 0x0003;
    pub const GROUPS: u16 = 0x0004;
    pub const SCENES: u16 = 0x0005;
    pub const ON_OFF: u16 = 0x0006;
    pub const ON_OFF_SWITCH_CONFIG: u16 = 0x0007;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const ALARMS: u16 = 0x0009;
    pub const TIME: u16 = 0x000A;
    pub const RSSI_LOCATION: u16 = 0x000B;
    pub const ANALOG_INPUT: u16 = 0x000C;
    pub const ANALOG_OUTPUT: u16 = 0x000D;
    pub const ANALOG_VALUE: u16 = 0x000E;
    pub const BINARY_INPUT: u16 = 0x000F;
    pub const BINARY_OUTPUT: u16 = 0x0010;
    pub const BINARY_VALUE: u16 = 0x0011;
    pub const MULTI_INPUT: u16 = 0x0012;
    pub const MULTI_OUTPUT: u16 = 0x0013;
    pub const MULTI_VALUE: u16 = 0x0014;
    pub const COMMISSIONING: u16 = 0x0015;
    pub const OTA_UPGRADE: u16 = 0x0019;
    pub const POLL_CONTROL: u16 = 0x0020;
    pub const GREEN_POWER: u16 = 0x0021;
    pub const KEEP_ALIVE: u16 = 0x0025;
    pub const DOOR_LOCK: u16 = 0x0101;
    pub const WINDOW_COVERING: u16 = 0x0102;
    pub const THERMOSTAT: u16 = 0x0201;
    pub const FAN_CONTROL: u16 = 0x0202;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const PRESSURE_MEASUREMENT: u16 = 0x0403;
    pub const FLOW_MEASUREMENT: u16 = 0x0404;
    pub const RELATIVE_HUMIDITY: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;
    pub const IAS_ZONE: u16 = 0x0500;
}

pub mod basic_attr {
    pub const ZCL_VERSION: u16 = 0x0000;
    pub const APPLICATION_VERSION: u16 = 0x0001;
    pub const STACK_VERSION: u16 = 0x0002;
    pub const HW_VERSION: u16 = 0x0003;
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const DATE_CODE: u16 = 0x0006;
    pub const POWER_SOURCE: u16 = 0x0007;
    pub const LOCATION_DESCRIPTION: u16 = 0x0010;
    pub const PRODUCT_CODE: u16 = 0x000A;
    pub const PRODUCT_URL: u16 = 0x000B;
    pub const MANUFACTURER_VERSION_DETAILS: u16 = 0x000C;
    pub const SERIAL_NUMBER: u16 = 0x000D;
    pub const PRODUCT_LABEL: u16 = 0x000E;
    pub const SW_BUILD_ID: u16 = 0x4000;
}

pub mod on_off {
    pub const ATTR_ON_OFF: u16 = 0x0000;
    pub const ATTR_GLOBAL_SCENE_CONTROL: u16 = 0x4000;

    pub const CMD_OFF: u8 = 0x00;
    pub const CMD_ON: u8 = 0x01;
    pub const CMD_TOGGLE: u8 = 0x02;
}

pub mod level_control {
    pub const ATTR_CURRENT_LEVEL: u16 = 0x0000;

    pub const CMD_MOVE_TO_LEVEL: u8 = 0x00;
    pub const CMD_MOVE_TO_LEVEL_WITH_ON_OFF: u8 = 0x04;
}

pub mod identify {
    pub const ATTR_IDENTIFY_TIME: u16 = 0x0000;

    pub const CMD_IDENTIFY: u8 = 0x00;
}

pub mod groups {
    pub const CMD_ADD_GROUP: u8 = 0x00;
    pub const CMD_REMOVE_GROUP: u8 = 0x03;
}

/// ZCL status codes returned in read/write/default responses.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const FAILURE: u8 = 0x01;
    pub const UNSUP_CLUSTER_COMMAND: u8 = 0x81;
    pub const UNSUPPORTED_ATTRIBUTE: u8 = 0x86;
    pub const INVALID_VALUE: u8 = 0x87;
    pub const READ_ONLY: u8 = 0x88;
    pub const NOT_FOUND: u8 = 0x8B;
    pub const TIMEOUT: u8 = 0x94;
}

/// ZCL attribute data type tags.
pub mod data_type {
    pub const NULL: u8 = 0x00;
    pub const BOOL: u8 = 0x10;
    pub const BITMAP8: u8 = 0x18;
    pub const BITMAP16: u8 = 0x19;
    pub const U8: u8 = 0x20;
    pub const U16: u8 = 0x21;
    pub const U32: u8 = 0x23;
    pub const S8: u8 = 0x28;
    pub const S16: u8 = 0x29;
    pub const S32: u8 = 0x2B;
    pub const ENUM8: u8 = 0x30;
    pub const ENUM16: u8 = 0x31;
    pub const CHAR_STRING: u8 = 0x42;
}

/// Encoded size of a value of `data_type`, given its raw bytes.
///
/// Strings carry a one byte length prefix. Unknown types fall back to the
/// length of the supplied buffer.
pub fn value_size(data_type: u8, raw: &[u8]) -> usize {
    match data_type {
        data_type::NULL => 0,
        data_type::BOOL
        | data_type::BITMAP8
        | data_type::U8
        | data_type::S8
        | data_type::ENUM8 => 1,
        data_type::BITMAP16 | data_type::U16 | data_type::S16 | data_type::ENUM16 => 2,
        data_type::U32 | data_type::S32 => 4,
        data_type::CHAR_STRING => raw.first().map_or(0, |len| *len as usize + 1).min(raw.len()),
        _ => raw.len(),
    }
}
