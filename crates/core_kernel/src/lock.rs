//! Advisory locking
//!
//! Operations that mutate a customer's aggregate state (invoice numbering,
//! applied-tax recomputation, draft refresh) serialize on a named lock with a
//! bounded wait. The abstraction is a named mutex with a timeout so the same
//! billing logic runs on top of an in-process lock table or a database
//! advisory lock.
//!
//! ```rust,ignore
//! let _guard = locks.acquire(&LockKey::customer(customer_id), Duration::from_secs(5)).await?;
//! // critical section, released when `_guard` drops
//! ```

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::identifiers::{CustomerId, OrganizationId};

/// Errors raised while acquiring a lock
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// The lock could not be acquired within the allowed wait.
    /// Retriable: the caller is expected to reschedule.
    #[error("Timed out after {waited_ms}ms waiting for lock {key}")]
    Timeout { key: String, waited_ms: u64 },

    /// The lock backend failed
    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}

/// Name of a lock
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Serializes every mutation of one customer's billing state
    pub fn customer(customer_id: CustomerId) -> Self {
        Self(format!("customer:{customer_id}"))
    }

    /// Serializes the organization-wide invoice sequence of one month
    pub fn organization_numbering(organization_id: OrganizationId, year_month: &str) -> Self {
        Self(format!("numbering:{organization_id}:{year_month}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Holds a lock until dropped
pub struct LockGuard {
    key: LockKey,
    _handle: Box<dyn Any + Send>,
}

impl LockGuard {
    /// Wraps a backend-specific handle whose drop releases the lock
    pub fn new<H>(key: LockKey, handle: H) -> Self
    where
        H: Any + Send,
    {
        Self {
            key,
            _handle: Box::new(handle),
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// A named mutex with bounded wait
#[async_trait]
pub trait LockManager: Send + Sync + 'static {
    /// Acquires `key`, waiting at most `timeout`
    async fn acquire(&self, key: &LockKey, timeout: Duration) -> Result<LockGuard, LockError>;
}

/// In-process lock table
///
/// Suitable for single-process deployments, previews and tests. Each key maps
/// to its own async mutex. The table only holds weak handles: a key lives as
/// long as a guard or a waiter holds its mutex, and dead keys are pruned on
/// the next acquisition.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    table: Mutex<HashMap<LockKey, Weak<Mutex<()>>>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently in the table
    pub async fn tracked_keys(&self) -> usize {
        self.table.lock().await.len()
    }

    async fn mutex_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        let mut table = self.table.lock().await;
        if let Some(mutex) = table.get(key).and_then(Weak::upgrade) {
            return mutex;
        }
        table.retain(|_, handle| handle.strong_count() > 0);
        let mutex = Arc::new(Mutex::new(()));
        table.insert(key.clone(), Arc::downgrade(&mutex));
        mutex
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn acquire(&self, key: &LockKey, timeout: Duration) -> Result<LockGuard, LockError> {
        let mutex = self.mutex_for(key).await;

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(lock = %key, "Lock acquired");
                Ok(LockGuard::new(key.clone(), guard))
            }
            Err(_) => Err(LockError::Timeout {
                key: key.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let locks = LocalLockManager::new();
        let key = LockKey::new("customer:1");

        let guard = locks.acquire(&key, Duration::from_millis(50)).await.unwrap();
        let second = locks.acquire(&key, Duration::from_millis(20)).await;
        assert!(matches!(second, Err(LockError::Timeout { .. })));

        drop(guard);
        assert!(locks.acquire(&key, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = LocalLockManager::new();
        let _a = locks.acquire(&LockKey::new("a"), Duration::from_millis(20)).await.unwrap();
        assert!(locks.acquire(&LockKey::new("b"), Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_released_keys_are_pruned() {
        let locks = LocalLockManager::new();
        for customer in 0..100 {
            let key = LockKey::new(format!("customer:{customer}"));
            drop(locks.acquire(&key, Duration::from_millis(20)).await.unwrap());
        }
        assert_eq!(locks.tracked_keys().await, 1);

        let held = locks.acquire(&LockKey::new("held"), Duration::from_millis(20)).await.unwrap();
        drop(locks.acquire(&LockKey::new("other"), Duration::from_millis(20)).await.unwrap());
        assert_eq!(locks.tracked_keys().await, 2);
        assert_eq!(held.key().as_str(), "held");
    }

    #[tokio::test]
    async fn test_waiter_keeps_key_alive() {
        let locks = Arc::new(LocalLockManager::new());
        let key = LockKey::new("customer:1");
        let guard = locks.acquire(&key, Duration::from_millis(20)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move { locks.acquire(&key, Duration::from_secs(1)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }
}
