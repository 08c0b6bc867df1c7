//! Discovery Protocol
//!
//! Membership discovery over a shared blob container, one cycle per host tick:
//! 1. Registering: write or refresh this node's record with a fresh expiry
//! 2. Enumerating: list the cluster prefix, read and decode every record, keep the live ones
//! 3. Housekeeping (optional): delete records that expired long ago
//!
//! On orderly shutdown the node deletes its own record; otherwise it ages out.

mod controller;
mod enumeration;
mod housekeeping;
mod registration;

pub use controller::{DiscoveryController, DiscoveryResult, DiscoveryState, Outcome};
pub use enumeration::{ExpiredRecord, PeerEnumerator, PeerSnapshot};
pub use housekeeping::Reaper;
pub use registration::{Deregistration, LocalNode, Registration, RegistrationError, SelfRegistration};
