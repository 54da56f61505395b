//! In-process lease table

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::LockService;
use crate::error::Result;

#[derive(Debug)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

/// Lock service for a single process
#[derive(Debug, Default)]
pub struct MemoryLockService {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(key)
            && lease.holder != holder
            && lease.expires_at > now
        {
            return Ok(false);
        }
        leases.insert(
            key.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<()> {
        let mut leases = self.leases.lock();
        if leases.get(key).is_some_and(|l| l.holder == holder) {
            leases.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_until_released() {
        let locks = MemoryLockService::new();
        let ttl = Duration::from_secs(10);
        assert!(locks.try_acquire("k", "a", ttl).await.unwrap());
        assert!(!locks.try_acquire("k", "b", ttl).await.unwrap());
        // same holder refreshes
        assert!(locks.try_acquire("k", "a", ttl).await.unwrap());

        // releasing with the wrong holder is a no-op
        locks.release("k", "b").await.unwrap();
        assert!(!locks.try_acquire("k", "b", ttl).await.unwrap());

        locks.release("k", "a").await.unwrap();
        assert!(locks.try_acquire("k", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let locks = MemoryLockService::new();
        assert!(locks.try_acquire("k", "a", Duration::from_millis(1)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(locks.try_acquire("k", "b", Duration::from_secs(10)).await.unwrap());
    }
}
