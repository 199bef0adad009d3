//! Postgres advisory locks
//!
//! Session-level advisory locks keyed by `hashtextextended(name, 0)`. A held
//! lock pins its pooled connection; the guard unlocks on drop before the
//! connection goes back to the pool.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tokio::time::Instant;
use tracing::{debug, warn};

use core_kernel::{LockError, LockGuard, LockKey, LockManager};

use crate::pool::DatabasePool;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `LockManager` backed by `pg_try_advisory_lock`
#[derive(Debug, Clone)]
pub struct PgAdvisoryLockManager {
    pool: DatabasePool,
    poll_interval: Duration,
}

impl PgAdvisoryLockManager {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the pause between two acquisition attempts
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl LockManager for PgAdvisoryLockManager {
    async fn acquire(&self, key: &LockKey, timeout: Duration) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + timeout;
        let timed_out = || LockError::Timeout {
            key: key.to_string(),
            waited_ms: timeout.as_millis() as u64,
        };

        let mut conn = tokio::time::timeout_at(deadline, self.pool.acquire())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| LockError::Backend(e.to_string()))?;

        loop {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                .bind(key.as_str())
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| LockError::Backend(e.to_string()))?;

            if acquired {
                debug!(lock = %key, "Advisory lock acquired");
                let held = HeldAdvisoryLock {
                    key: key.clone(),
                    conn: Some(conn),
                };
                return Ok(LockGuard::new(key.clone(), held));
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(timed_out());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Connection holding an advisory lock
struct HeldAdvisoryLock {
    key: LockKey,
    conn: Option<PoolConnection<Postgres>>,
}

impl Drop for HeldAdvisoryLock {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let key = self.key.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let released = sqlx::query_scalar::<_, bool>(
                        "SELECT pg_advisory_unlock(hashtextextended($1, 0))",
                    )
                    .bind(key.as_str())
                    .fetch_one(&mut *conn)
                    .await;

                    match released {
                        Ok(true) => debug!(lock = %key, "Advisory lock released"),
                        Ok(false) => warn!(lock = %key, "Advisory lock was not held at release"),
                        Err(e) => {
                            warn!(lock = %key, error = %e, "Advisory unlock failed, closing connection");
                            // Closing the session releases every lock it holds
                            drop(conn.detach());
                        }
                    }
                });
            }
            Err(_) => {
                warn!(lock = %key, "No runtime at release, closing connection");
                drop(conn.detach());
            }
        }
    }
}
