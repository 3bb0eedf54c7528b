//! Boundary to the Zigbee stack.
//!
//! The radio, MAC and network layers live outside this crate. The bridge
//! talks to them through [`RemoteStack`] (outbound requests) and receives
//! completions as [`RemoteResponse`] values on the Zigbee thread.

pub mod simulator;
pub mod zcl;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 16-bit network (short) address.
pub type ShortAddr = u16;

/// 64-bit extended (EUI-64) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IeeeAddr(pub [u8; 8]);

impl IeeeAddr {
    pub const UNSET: IeeeAddr = IeeeAddr([0; 8]);

    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }
}

impl fmt::Display for IeeeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for IeeeAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 8];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| format!("IEEE address too short: {}", s))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|e| format!("invalid IEEE address byte '{}': {}", part, e))?;
        }
        if parts.next().is_some() {
            return Err(format!("IEEE address too long: {}", s));
        }
        Ok(Self(bytes))
    }
}

/// Simple descriptor of one remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub in_clusters: Vec<u16>,
    pub out_clusters: Vec<u16>,
}

/// Attribute reporting parameters for [`RemoteStack::request_configure_reporting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingConfig {
    pub attr_id: u16,
    pub data_type: u8,
    pub min_interval_s: u16,
    pub max_interval_s: u16,
}

/// Outbound primitives offered by the Zigbee stack.
///
/// Every call is asynchronous: it queues a frame and returns. Completion is
/// delivered later through [`crate::bridge::Bridge::on_remote_response`] on
/// the Zigbee thread. Implementations must not call back into the bridge from
/// inside these methods.
pub trait RemoteStack: Send + Sync + 'static {
    fn request_ieee_addr(&self, short_addr: ShortAddr);

    fn request_active_endpoints(&self, short_addr: ShortAddr);

    fn request_simple_descriptor(&self, short_addr: ShortAddr, endpoint: u8);

    fn request_attribute_discovery(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        start_attr: u16,
    );

    fn request_read_attribute(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
    );

    fn request_write_attribute(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        data_type: u8,
        value: &[u8],
    );

    fn request_send_command(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        command_id: u8,
        payload: &[u8],
    );

    /// Bind `cluster_id` on the device's `endpoint` to `dst_endpoint` on the
    /// coordinator.
    fn request_bind(
        &self,
        short_addr: ShortAddr,
        ieee_addr: IeeeAddr,
        endpoint: u8,
        cluster_id: u16,
        dst_endpoint: u8,
    );

    fn request_configure_reporting(
        &self,
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        config: ReportingConfig,
    );
}

/// Completions and unsolicited frames coming up from the Zigbee stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResponse {
    IeeeAddr {
        status: u8,
        short_addr: ShortAddr,
        ieee_addr: IeeeAddr,
    },
    ActiveEndpoints {
        status: u8,
        short_addr: ShortAddr,
        endpoints: Vec<u8>,
    },
    SimpleDescriptor {
        status: u8,
        short_addr: ShortAddr,
        descriptor: SimpleDescriptor,
    },
    AttributeDiscovery {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        complete: bool,
        attributes: Vec<(u16, u8)>,
    },
    ReadAttribute {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        status: u8,
        data_type: u8,
        value: Vec<u8>,
    },
    WriteAttribute {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        status: u8,
    },
    /// Default response, or a cluster specific response, to a command.
    Command {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        command_id: u8,
        status: u8,
    },
    Bind {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        status: u8,
    },
    ConfigureReporting {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        status: u8,
    },
    AttributeReport {
        short_addr: ShortAddr,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        data_type: u8,
        value: Vec<u8>,
    },
}

impl RemoteResponse {
    pub fn short_addr(&self) -> ShortAddr {
        match self {
            RemoteResponse::IeeeAddr { short_addr, .. }
            | RemoteResponse::ActiveEndpoints { short_addr, .. }
            | RemoteResponse::SimpleDescriptor { short_addr, .. }
            | RemoteResponse::AttributeDiscovery { short_addr, .. }
            | RemoteResponse::ReadAttribute { short_addr, .. }
            | RemoteResponse::WriteAttribute { short_addr, .. }
            | RemoteResponse::Command { short_addr, .. }
            | RemoteResponse::Bind { short_addr, .. }
            | RemoteResponse::ConfigureReporting { short_addr, .. }
            | RemoteResponse::AttributeReport { short_addr, .. } => *short_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ieee_display_and_parse() {
        let addr: IeeeAddr = "00:11:22:33:44:55:66:77".parse().unwrap();
        assert_eq!(addr, IeeeAddr::from_u64(0x0011_2233_4455_6677));
        assert_eq!(addr.to_string(), "00:11:22:33:44:55:66:77");
    }

    #[test]
    fn test_ieee_parse_rejects_bad_input() {
        assert!("00:11".parse::<IeeeAddr>().is_err());
        assert!("00:11:22:33:44:55:66:77:88".parse::<IeeeAddr>().is_err());
        assert!("zz:11:22:33:44:55:66:77".parse::<IeeeAddr>().is_err());
    }

    #[test]
    fn test_ieee_unset() {
        assert!(IeeeAddr::default().is_unset());
        assert!(!IeeeAddr::from_u64(1).is_unset());
    }
}
