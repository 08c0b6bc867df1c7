//! Raw Blob Client
//!
//! [`BlobClient`] is the seam between discovery and the storage service: plain
//! create/read/delete/list of objects in one container. Implementations only
//! report what went wrong ([`FaultKind`]); deciding whether that is worth a
//! retry is the gateway's job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// What the storage service reported, before any retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    NotFound,
    Unauthorized,
    InvalidKey,
    Unsupported,
    Unavailable,
    ConnectionReset,
    TimedOut,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ClientError {
    pub kind: FaultKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<object_store::Error> for ClientError {
    fn from(err: object_store::Error) -> Self {
        let kind = match &err {
            object_store::Error::NotFound { .. } => FaultKind::NotFound,
            object_store::Error::InvalidPath { .. } => FaultKind::InvalidKey,
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => FaultKind::Unauthorized,
            object_store::Error::NotSupported { .. } => FaultKind::Unsupported,
            // Generic covers HTTP 5xx and socket errors after the SDK's own retries
            _ => FaultKind::Unavailable,
        };
        ClientError::new(kind, err.to_string())
    }
}

impl From<object_store::path::Error> for ClientError {
    fn from(err: object_store::path::Error) -> Self {
        ClientError::new(FaultKind::InvalidKey, err.to_string())
    }
}

/// Keys are parsed, never percent-encoded, so a listed location reads back as
/// the exact key that was written.
fn object_path(key: &str) -> Result<Path, ClientError> {
    Ok(Path::parse(key)?)
}

/// One page of a listing. `next_token` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Raw object operations against one container.
#[async_trait]
pub trait BlobClient: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ClientError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ClientError>;

    /// List keys under `prefix`, resuming from `token` when given.
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage, ClientError>;

    async fn delete(&self, key: &str) -> Result<(), ClientError>;

    /// Verify the container is reachable.
    async fn check_container(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Storage backend selection for [`ObjectStoreClient::connect`].
#[derive(Clone)]
pub enum StoreConfig {
    /// Process-local store; only useful for single-process clusters and tests.
    Memory,
    /// Directory on a filesystem shared by all nodes.
    Local { root: PathBuf },
    /// Azure Blob Storage container.
    Azure {
        account: String,
        access_key: String,
        container: String,
        use_emulator: bool,
    },
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::Memory => f.write_str("Memory"),
            StoreConfig::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            StoreConfig::Azure {
                account,
                container,
                use_emulator,
                ..
            } => f
                .debug_struct("Azure")
                .field("account", account)
                .field("access_key", &"<redacted>")
                .field("container", container)
                .field("use_emulator", use_emulator)
                .finish(),
        }
    }
}

/// [`BlobClient`] backed by any `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// In-memory client, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Build a client for the configured backend.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            StoreConfig::Memory => Arc::new(InMemory::new()),
            StoreConfig::Local { root } => {
                std::fs::create_dir_all(root).with_context(|| {
                    format!("Failed to create store directory {}", root.display())
                })?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(root)
                        .context("Failed to open local object store")?,
                )
            }
            StoreConfig::Azure {
                account,
                access_key,
                container,
                use_emulator,
            } => Arc::new(
                MicrosoftAzureBuilder::new()
                    .with_account(account)
                    .with_access_key(access_key)
                    .with_container_name(container)
                    .with_use_emulator(*use_emulator)
                    .build()
                    .context("Failed to build Azure blob client")?,
            ),
        };
        debug!(backend = ?config, "Object store client created");
        Ok(Self::new(store))
    }
}

#[async_trait]
impl BlobClient for ObjectStoreClient {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ClientError> {
        self.store
            .put(&object_path(key)?, PutPayload::from(body))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ClientError> {
        let result = self.store.get(&object_path(key)?).await?;
        Ok(result.bytes().await?.to_vec())
    }

    // object_store follows continuation tokens inside its stream and fails the
    // stream if any page fails, so the whole listing is a single page here.
    async fn list_page(&self, prefix: &str, _token: Option<&str>) -> Result<ListPage, ClientError> {
        let prefix = object_path(prefix)?;
        let keys = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect::<Vec<_>>()
            .await?;
        Ok(ListPage {
            keys,
            next_token: None,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ClientError> {
        self.store.delete(&object_path(key)?).await?;
        Ok(())
    }

    async fn check_container(&self) -> Result<(), ClientError> {
        self.store.list_with_delimiter(None).await?;
        Ok(())
    }
}
