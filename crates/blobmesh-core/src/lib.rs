//! Core shared types and utilities for blobmesh
//!
//! This crate contains the membership record model, its storage codec, the
//! storage key layout and the clock abstraction used by the discovery crate.

pub mod clock;
pub mod codec;
pub mod keys;
mod models;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{decode, encode, DecodeError, FORMAT_VERSION};
pub use keys::KeySpace;
pub use models::{AddressError, MembershipRecord, NodeAddress};
