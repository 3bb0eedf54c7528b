use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown cluster 0x{0:04X}")]
    UnknownCluster(u32),

    #[error("Unknown attribute 0x{1:04X} on cluster 0x{0:04X}")]
    UnknownAttribute(u32, u32),

    #[error("Request already pending on cluster 0x{0:04X}")]
    Busy(u32),

    #[error("Remote device did not respond within {0} ms")]
    Timeout(u64),

    #[error("Device is unreachable")]
    Unreachable,

    #[error("No translation for cluster 0x{0:04X} attribute/command 0x{1:04X}")]
    TranslationUnsupported(u32, u32),

    #[error("Attribute 0x{1:04X} on cluster 0x{0:04X} is read-only")]
    ReadOnlyAttribute(u32, u32),

    #[error("Remote device answered with status 0x{0:02X}")]
    RemoteStatus(u8),

    #[error("Endpoint id {0} already registered")]
    EndpointExists(u16),

    #[error("Endpoint registration failed: {0}")]
    RegistrationFailed(String),

    #[error("No command staged for {0}")]
    NoStagedCommand(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
