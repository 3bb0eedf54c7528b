//! Boundary to the Matter stack.
//!
//! Bridged devices appear as dynamic endpoints under an aggregator. The
//! bridge registers and clears them through [`LocalStack`] and signals value
//! changes so subscriptions get refreshed.

pub mod handler;
pub mod ids;
pub mod registry;

use crate::error::Result;
use ids::{AttrId, ClusterId, EndptId};

pub use handler::BridgedEndpointHandler;
pub use registry::InMemoryRegistry;

/// Everything the Matter stack needs to publish one bridged endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRegistration {
    /// Index into the dynamic endpoint table.
    pub index: usize,
    pub endpoint_id: EndptId,
    pub parent_endpoint_id: EndptId,
    pub device_type: u32,
    pub clusters: Vec<ClusterId>,
    /// Initial data version of each cluster, same order as `clusters`.
    pub data_versions: Vec<(ClusterId, u32)>,
    pub name: String,
}

/// Operations the bridge needs from the Matter stack.
pub trait LocalStack: Send + Sync + 'static {
    /// Publish an endpoint in table slot `registration.index`.
    ///
    /// Fails with [`crate::error::BridgeError::EndpointExists`] if the
    /// endpoint id is already taken.
    fn set_dynamic_endpoint(&self, registration: &EndpointRegistration) -> Result<()>;

    /// Remove the endpoint in slot `index`, returning its id.
    fn clear_dynamic_endpoint(&self, index: usize) -> Option<EndptId>;

    /// An attribute value changed; subscribers should be told.
    fn report_attribute_change(&self, endpoint_id: EndptId, cluster_id: ClusterId, attr_id: AttrId);
}
