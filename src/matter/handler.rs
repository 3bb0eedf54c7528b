//! Matter-facing entry point for bridged endpoints.
//!
//! The data model addresses devices by endpoint id and expects
//! `rs_matter` errors. [`BridgedEndpointHandler`] resolves the endpoint to
//! its device, forwards to the [`Bridge`] and converts the result.

use super::ids::{AttrId, ClusterId, EndptId};
use crate::bridge::{Bridge, DeviceId, LocalCommand};
use crate::error::BridgeError;
use log::debug;
use rs_matter::error::{Error, ErrorCode};
use std::sync::Arc;

/// Interaction model status for a bridge error.
pub fn error_code(error: &BridgeError) -> ErrorCode {
    match error {
        BridgeError::CapacityExceeded(_) => ErrorCode::ResourceExhausted,
        BridgeError::UnknownDevice(_) | BridgeError::UnknownCluster(_) => ErrorCode::NotFound,
        BridgeError::UnknownAttribute(..) | BridgeError::TranslationUnsupported(..) => {
            ErrorCode::AttributeNotFound
        }
        BridgeError::ReadOnlyAttribute(..) => ErrorCode::UnsupportedAccess,
        BridgeError::NoStagedCommand(_) => ErrorCode::InvalidCommand,
        BridgeError::Busy(_) => ErrorCode::InvalidAction,
        BridgeError::Timeout(_)
        | BridgeError::Unreachable
        | BridgeError::RemoteStatus(_)
        | BridgeError::EndpointExists(_)
        | BridgeError::RegistrationFailed(_) => ErrorCode::Failure,
    }
}

impl From<BridgeError> for Error {
    fn from(error: BridgeError) -> Self {
        Error::new(error_code(&error))
    }
}

pub struct BridgedEndpointHandler {
    bridge: Arc<Bridge>,
}

impl BridgedEndpointHandler {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    fn device(&self, endpoint_id: EndptId) -> Result<DeviceId, Error> {
        self.bridge
            .device_for_endpoint(endpoint_id)
            .ok_or_else(|| Error::new(ErrorCode::NotFound))
    }

    /// Read an attribute into `out`, returning the number of bytes written.
    pub fn read(
        &self,
        endpoint_id: EndptId,
        cluster_id: ClusterId,
        attr_id: AttrId,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let device = self.device(endpoint_id)?;
        self.bridge
            .handle_read_attribute(device, cluster_id, attr_id, out)
            .map_err(|e| {
                debug!(
                    "[Matter] Read {}/0x{:04x}/0x{:04x} failed: {}",
                    endpoint_id, cluster_id, attr_id, e
                );
                e.into()
            })
    }

    pub fn write(
        &self,
        endpoint_id: EndptId,
        cluster_id: ClusterId,
        attr_id: AttrId,
        value: &[u8],
    ) -> Result<(), Error> {
        let device = self.device(endpoint_id)?;
        self.bridge
            .handle_write_attribute(device, cluster_id, attr_id, value)
            .map_err(|e| {
                debug!(
                    "[Matter] Write {}/0x{:04x}/0x{:04x} failed: {}",
                    endpoint_id, cluster_id, attr_id, e
                );
                e.into()
            })
    }

    pub fn invoke(&self, endpoint_id: EndptId, command: LocalCommand) -> Result<(), Error> {
        let device = self.device(endpoint_id)?;
        let cluster_id = command.cluster_id();
        let command_id = command.command_id();
        self.bridge.invoke_command(device, command).map_err(|e| {
            debug!(
                "[Matter] Command 0x{:02x} on {}/0x{:04x} failed: {}",
                command_id, endpoint_id, cluster_id, e
            );
            match e {
                BridgeError::TranslationUnsupported(..) => Error::new(ErrorCode::CommandNotFound),
                other => other.into(),
            }
        })
    }
}
