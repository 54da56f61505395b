//! Named-key locks
//!
//! Locks are TTL leases held by an opaque holder token. [`acquire_all`] takes a set of
//! keys within a bounded timeout; the returned [`LockGuard`] must be released explicitly.

mod memory;
mod postgres;

pub use memory::MemoryLockService;
pub use postgres::PgLockService;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LockTiming;
use crate::context::RequestContext;
use crate::error::{CmdbError, Result};

/// TTL lease service
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take `key` for `holder` unless another holder owns an unexpired lease.
    /// Re-acquiring a key already held by `holder` refreshes the lease.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Release `key` if `holder` owns it
    async fn release(&self, key: &str, holder: &str) -> Result<()>;
}

/// A set of held locks
#[must_use = "locks must be released"]
pub struct LockGuard {
    service: Arc<dyn LockService>,
    holder: String,
    keys: Vec<String>,
    request_id: String,
}

impl LockGuard {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Release every held key. Failures are logged and swallowed; the lease TTL
    /// frees anything left behind.
    pub async fn release(self) {
        release_keys(self.service.as_ref(), &self.holder, &self.keys, &self.request_id).await;
    }
}

async fn release_keys(service: &dyn LockService, holder: &str, keys: &[String], rid: &str) {
    for key in keys.iter().rev() {
        if let Err(e) = service.release(key, holder).await {
            warn!(rid = %rid, key = %key, error = %e, "failed to release lock");
        }
    }
}

/// Acquire every key, in sorted order, within `timing.timeout`
///
/// Fails with [`CmdbError::OperationInProgress`] when any key stays held elsewhere past
/// the timeout; keys taken so far are released first.
pub async fn acquire_all(
    service: &Arc<dyn LockService>,
    keys: impl IntoIterator<Item = String>,
    timing: &LockTiming,
    ctx: &RequestContext,
) -> Result<LockGuard> {
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort();
    keys.dedup();

    let holder = uuid::Uuid::new_v4().to_string();
    let deadline = Instant::now() + timing.timeout;
    let mut held: Vec<String> = Vec::with_capacity(keys.len());

    for key in keys {
        loop {
            let acquired = match service.try_acquire(&key, &holder, timing.ttl).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    release_keys(service.as_ref(), &holder, &held, &ctx.request_id).await;
                    return Err(e);
                }
            };
            if acquired {
                debug!(rid = %ctx.request_id, key = %key, "lock acquired");
                held.push(key);
                break;
            }
            if Instant::now() >= deadline {
                release_keys(service.as_ref(), &holder, &held, &ctx.request_id).await;
                return Err(CmdbError::OperationInProgress(key));
            }
            tokio::time::sleep(timing.retry_interval).await;
        }
    }

    Ok(LockGuard {
        service: Arc::clone(service),
        holder,
        keys: held,
        request_id: ctx.request_id.clone(),
    })
}
