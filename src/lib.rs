//! Zigbee to Matter device bridge.
//!
//! Discovers devices on a Zigbee network, catalogs their endpoints, clusters
//! and attributes, and publishes each one as a bridged Matter endpoint.
//! Reads, writes and commands from Matter controllers are translated and
//! forwarded to the Zigbee device.

#![recursion_limit = "256"]

pub mod bridge;
pub mod config;
pub mod error;
pub mod instance_lock;
pub mod matter;
pub mod zigbee;

#[cfg(test)]
mod testing;
