//! Bounded session pool
//!
//! A semaphore bounds the number of leased sessions. Returned sessions
//! wait in an idle list and are retired once older than the idle timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::backend::Backend;
use super::error::BackendResult;
use crate::config::ServiceConfig;
use crate::error::{ErmError, ErmResult};

/// Opens new backend sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> BackendResult<Box<dyn Backend>>;
}

struct Idle {
    session: Box<dyn Backend>,
    since: Instant,
}

type IdleList = Arc<Mutex<Vec<Idle>>>;

/// Session pool for one catalog
pub struct Pool {
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    idle: IdleList,
    idle_timeout: Duration,
}

impl Pool {
    pub fn new(connector: Arc<dyn Connector>, size: usize, idle_timeout: Duration) -> Self {
        Pool {
            connector,
            permits: Arc::new(Semaphore::new(size.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
            idle_timeout,
        }
    }

    pub fn from_config(connector: Arc<dyn Connector>, config: &ServiceConfig) -> Self {
        Self::new(connector, config.pool_size, config.pool_idle_timeout())
    }

    /// Lease a session, waiting for a free slot
    pub async fn acquire(&self) -> ErmResult<Lease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ErmError::Retryable("session pool closed".to_string()))?;
        let reused = {
            let mut idle = self.idle.lock();
            let before = idle.len();
            let timeout = self.idle_timeout;
            idle.retain(|i| i.since.elapsed() < timeout);
            if idle.len() < before {
                tracing::debug!(retired = before - idle.len(), "retired idle sessions");
            }
            idle.pop()
        };
        let session = match reused {
            Some(i) => i.session,
            None => self.connector.connect().await?,
        };
        Ok(Lease {
            session: Some(session),
            idle: self.idle.clone(),
            reusable: true,
            _permit: permit,
        })
    }

    /// Sessions waiting in the idle list
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Slots free for leasing
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A leased session, returned to the pool on drop
///
/// A lease dropped while a transaction is open discards its session
/// instead, which aborts the transaction on the server.
pub struct Lease {
    session: Option<Box<dyn Backend>>,
    idle: IdleList,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn session(&mut self) -> ErmResult<&mut (dyn Backend + 'static)> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| ErmError::Backend("session already released".to_string()))
    }

    /// Mark whether the session may be handed out again
    pub(crate) fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if self.reusable {
                self.idle.lock().push(Idle {
                    session,
                    since: Instant::now(),
                });
            } else {
                tracing::debug!("discarding session with open transaction");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptedBackend;

    #[tokio::test]
    async fn test_lease_returns_to_idle() {
        let script = ScriptedBackend::new();
        let pool = Pool::new(Arc::new(script.clone()), 2, Duration::from_secs(60));
        {
            let _a = pool.acquire().await.unwrap();
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.idle_count(), 1);
        let _b = pool.acquire().await.unwrap();
        assert_eq!(script.connects(), 1);
    }

    #[tokio::test]
    async fn test_unreusable_lease_is_discarded() {
        let script = ScriptedBackend::new();
        let pool = Pool::new(Arc::new(script.clone()), 1, Duration::from_secs(60));
        {
            let mut lease = pool.acquire().await.unwrap();
            lease.set_reusable(false);
        }
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_retires() {
        let script = ScriptedBackend::new();
        let pool = Pool::new(Arc::new(script.clone()), 1, Duration::from_millis(10));
        drop(pool.acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(pool.acquire().await.unwrap());
        assert_eq!(script.connects(), 2);
    }
}
