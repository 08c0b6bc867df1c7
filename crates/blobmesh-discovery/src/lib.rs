//! Blobmesh Discovery Library
//!
//! Cluster membership discovery for brokers sharing a blob storage container

pub mod config;
pub mod daemon;
pub mod discovery;
pub mod observability;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, DiscoveryConfig};
pub use discovery::{Deregistration, DiscoveryController, DiscoveryResult, DiscoveryState, Outcome};
