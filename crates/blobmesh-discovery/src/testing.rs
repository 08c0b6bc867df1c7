//! Test Doubles
//!
//! [`FaultyClient`] wraps a real [`BlobClient`] and injects scripted faults:
//! queued failures per operation, failures pinned to a key or a listing page,
//! and calls that never return. It also paginates listings so gateway
//! pagination can be exercised against the in-memory store.

use crate::storage::{BlobClient, ClientError, FaultKind, ListPage, ObjectStoreClient, StorageOp};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

enum Fault {
    Fail(FaultKind),
    Hang,
}

#[derive(Default)]
struct FaultState {
    queued: HashMap<StorageOp, VecDeque<FaultKind>>,
    hanging_ops: HashSet<StorageOp>,
    hanging_keys: HashSet<String>,
    key_faults: HashMap<String, FaultKind>,
    page_faults: HashMap<usize, FaultKind>,
    calls: HashMap<StorageOp, u32>,
}

/// Fault-injecting [`BlobClient`] wrapper.
pub struct FaultyClient {
    inner: Arc<dyn BlobClient>,
    page_size: Option<usize>,
    state: Mutex<FaultState>,
}

impl FaultyClient {
    pub fn new(inner: Arc<dyn BlobClient>) -> Self {
        Self {
            inner,
            page_size: None,
            state: Mutex::new(FaultState::default()),
        }
    }

    /// Wrap a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(ObjectStoreClient::in_memory()))
    }

    /// Serve listings in pages of `page_size` keys.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Fail the next `times` calls of `op` with `kind`.
    pub fn fail_next(&self, op: StorageOp, kind: FaultKind, times: usize) {
        let mut state = self.lock();
        let queue = state.queued.entry(op).or_default();
        queue.extend(std::iter::repeat(kind).take(times));
    }

    /// Fail every get/put/delete on `key` with `kind`.
    pub fn fail_key(&self, key: &str, kind: FaultKind) {
        self.lock().key_faults.insert(key.to_string(), kind);
    }

    /// Fail every request for listing page `index` (zero-based).
    pub fn fail_list_page(&self, index: usize, kind: FaultKind) {
        self.lock().page_faults.insert(index, kind);
    }

    /// Make every call of `op` hang forever.
    pub fn hang(&self, op: StorageOp) {
        self.lock().hanging_ops.insert(op);
    }

    /// Make every get/put/delete on `key` hang forever.
    pub fn hang_key(&self, key: &str) {
        self.lock().hanging_keys.insert(key.to_string());
    }

    /// Drop every scripted fault. Call counters are kept.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.queued.clear();
        state.hanging_ops.clear();
        state.hanging_keys.clear();
        state.key_faults.clear();
        state.page_faults.clear();
    }

    /// Number of calls of `op` seen so far, faulted or not.
    pub fn calls(&self, op: StorageOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Write straight to the wrapped store, bypassing faults and counters.
    pub async fn seed(&self, key: &str, body: &[u8]) -> Result<(), ClientError> {
        self.inner.put(key, body.to_vec()).await
    }

    fn lock(&self) -> MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, op: StorageOp, key: Option<&str>, page: Option<usize>) -> Option<Fault> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;

        if state.hanging_ops.contains(&op) {
            return Some(Fault::Hang);
        }
        if let Some(key) = key {
            if state.hanging_keys.contains(key) {
                return Some(Fault::Hang);
            }
            if let Some(kind) = state.key_faults.get(key) {
                return Some(Fault::Fail(*kind));
            }
        }
        if let Some(kind) = page.and_then(|p| state.page_faults.get(&p)) {
            return Some(Fault::Fail(*kind));
        }
        state
            .queued
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .map(Fault::Fail)
    }

    async fn inject(&self, op: StorageOp, key: Option<&str>, page: Option<usize>) -> Result<(), ClientError> {
        match self.enter(op, key, page) {
            None => Ok(()),
            Some(Fault::Fail(kind)) => Err(ClientError::new(kind, format!("injected {op} fault"))),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl BlobClient for FaultyClient {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ClientError> {
        self.inject(StorageOp::Put, Some(key), None).await?;
        self.inner.put(key, body).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ClientError> {
        self.inject(StorageOp::Get, Some(key), None).await?;
        self.inner.get(key).await
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage, ClientError> {
        let Some(page_size) = self.page_size else {
            self.inject(StorageOp::List, None, Some(0)).await?;
            return self.inner.list_page(prefix, token).await;
        };

        let offset = token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        self.inject(StorageOp::List, None, Some(offset / page_size)).await?;

        let mut keys = self.inner.list_page(prefix, None).await?.keys;
        keys.sort();
        let end = (offset + page_size).min(keys.len());
        let next_token = (end < keys.len()).then(|| end.to_string());
        Ok(ListPage {
            keys: keys.get(offset..end).map(<[String]>::to_vec).unwrap_or_default(),
            next_token,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ClientError> {
        self.inject(StorageOp::Delete, Some(key), None).await?;
        self.inner.delete(key).await
    }

    async fn check_container(&self) -> Result<(), ClientError> {
        self.inject(StorageOp::Check, None, None).await?;
        self.inner.check_container().await
    }
}
