//! Object Store Gateway
//!
//! Every raw client call goes through [`StorageGateway::call`], which bounds
//! the attempt with a timeout, triages the outcome and retries transient
//! failures with exponential backoff until the attempt budget is spent.
//! `classify` is the only place that decides retryable versus fatal.

use super::client::{BlobClient, ClientError, FaultKind};
use super::error::{StorageError, StorageOp};
use crate::observability::metrics;
use backoff::{future::retry_notify, ExponentialBackoff};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Timeout and retry settings applied to each gateway operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Bound on a single attempt
    pub request_timeout: Duration,
    /// Total attempts, first try included
    pub attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            attempts: 3,
            backoff_initial: Duration::from_millis(200),
            backoff_max: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.backoff_initial,
            current_interval: self.backoff_initial,
            max_interval: self.backoff_max,
            multiplier: self.backoff_multiplier,
            // The attempt budget ends retries, not elapsed time
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Resilient put/get/list/delete over a [`BlobClient`].
#[derive(Clone)]
pub struct StorageGateway {
    client: Arc<dyn BlobClient>,
    policy: RetryPolicy,
}

impl StorageGateway {
    pub fn new(client: Arc<dyn BlobClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.call(StorageOp::Put, key, || self.client.put(key, body.clone()))
            .await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.call(StorageOp::Get, key, || self.client.get(key)).await
    }

    /// List every key under `prefix`, following pagination to the end.
    ///
    /// A page that fails after retries fails the whole listing; callers never
    /// see a truncated key set as success.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .call(StorageOp::List, prefix, || {
                    self.client.list_page(prefix, token.as_deref())
                })
                .await?;
            pages += 1;
            keys.extend(page.keys);

            match page.next_token {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(StorageError::Fatal {
                        op: StorageOp::List,
                        key: prefix.to_string(),
                        reason: format!("pagination token '{next}' did not advance"),
                    });
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        trace!(prefix = %prefix, pages = pages, key_count = keys.len(), "Listing complete");
        Ok(keys)
    }

    /// Delete `key`. A missing object is reported as [`StorageError::NotFound`].
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.call(StorageOp::Delete, key, || self.client.delete(key))
            .await
    }

    pub async fn check_container(&self) -> Result<(), StorageError> {
        self.call(StorageOp::Check, "", || self.client.check_container())
            .await
    }

    async fn call<T, F, Fut>(&self, op: StorageOp, key: &str, mut attempt_fn: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let request_timeout = self.policy.request_timeout;
        let budget = self.policy.attempts.max(1);
        let mut attempt = 0u32;

        let result = retry_notify(
            self.policy.backoff(),
            || {
                attempt += 1;
                let current = attempt;
                let fut = attempt_fn();
                async move {
                    let err = match tokio::time::timeout(request_timeout, fut).await {
                        Ok(Ok(value)) => return Ok(value),
                        Ok(Err(e)) => classify(op, key, current, e),
                        Err(_) => StorageError::Transient {
                            op,
                            key: key.to_string(),
                            attempts: current,
                            reason: format!("timed out after {request_timeout:?}"),
                        },
                    };

                    match err {
                        StorageError::Transient { .. } if current < budget => {
                            Err(backoff::Error::transient(err))
                        }
                        _ => Err(backoff::Error::permanent(err)),
                    }
                }
            },
            |err: StorageError, wait: Duration| {
                metrics::record_storage_retry(op);
                warn!(
                    op = %op,
                    key = %key,
                    error = %err,
                    retry_in_ms = wait.as_millis() as u64,
                    "Storage call failed, retrying"
                );
            },
        )
        .await;

        if let Err(e) = &result {
            metrics::record_storage_error(op, e.kind());
            debug!(op = %op, key = %key, error = %e, "Storage call gave up");
        }
        result
    }
}

/// Decide whether a raw client fault is worth retrying.
fn classify(op: StorageOp, key: &str, attempts: u32, err: ClientError) -> StorageError {
    let key = key.to_string();
    match err.kind {
        FaultKind::NotFound => StorageError::NotFound { op, key },
        FaultKind::Unauthorized | FaultKind::InvalidKey | FaultKind::Unsupported => {
            StorageError::Fatal {
                op,
                key,
                reason: err.message,
            }
        }
        FaultKind::Unavailable | FaultKind::ConnectionReset | FaultKind::TimedOut => {
            StorageError::Transient {
                op,
                key,
                attempts,
                reason: err.message,
            }
        }
    }
}
