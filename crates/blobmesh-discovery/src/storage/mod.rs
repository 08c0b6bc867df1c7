//! Object Store Access
//!
//! - `client`: the raw blob client seam and its `object_store` adapter
//! - `gateway`: timeout, retry with backoff and error triage on top of a client
//! - `error`: storage error taxonomy

mod client;
mod error;
mod gateway;

pub use client::{BlobClient, ClientError, FaultKind, ListPage, ObjectStoreClient, StoreConfig};
pub use error::{StorageError, StorageOp};
pub use gateway::{RetryPolicy, StorageGateway};
