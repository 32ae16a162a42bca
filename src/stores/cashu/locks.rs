//! Per-mint operation locks
//!
//! Serializes the read-network-write section of every ledger mutation
//! against one mint. Different mints proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::utils::normalize_mint_url;

/// Guard that releases the mint lock when dropped (RAII pattern)
pub struct MintOperationGuard {
    mint_url: String,
    _guard: OwnedMutexGuard<()>,
}

impl MintOperationGuard {
    pub fn mint_url(&self) -> &str {
        &self.mint_url
    }
}

impl Drop for MintOperationGuard {
    fn drop(&mut self) {
        log::debug!("Released operation lock for mint: {}", self.mint_url);
    }
}

/// Async mutex per normalized mint URL
#[derive(Default)]
pub struct MintLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl MintLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, mint_url: &str) -> (String, Arc<AsyncMutex<()>>) {
        let key = normalize_mint_url(mint_url);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        (key, lock)
    }

    /// Wait for exclusive access to a mint
    pub async fn acquire(&self, mint_url: &str) -> MintOperationGuard {
        let (key, lock) = self.lock_for(mint_url);
        let guard = lock.lock_owned().await;
        log::debug!("Acquired operation lock for mint: {}", key);
        MintOperationGuard {
            mint_url: key,
            _guard: guard,
        }
    }

    /// Take the lock only if no operation is running on the mint
    pub fn try_acquire(&self, mint_url: &str) -> Option<MintOperationGuard> {
        let (key, lock) = self.lock_for(mint_url);
        match lock.try_lock_owned() {
            Ok(guard) => Some(MintOperationGuard {
                mint_url: key,
                _guard: guard,
            }),
            Err(_) => {
                log::warn!("Operation already in progress for mint: {}", key);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_mint_is_exclusive() {
        let locks = MintLocks::new();
        let guard = locks.acquire("https://a.example/").await;
        assert_eq!(guard.mint_url(), "https://a.example");
        assert!(locks.try_acquire("a.example").is_none());
        drop(guard);
        assert!(locks.try_acquire("https://a.example").is_some());
    }

    #[tokio::test]
    async fn test_different_mints_independent() {
        let locks = MintLocks::new();
        let _a = locks.acquire("https://a.example").await;
        assert!(locks.try_acquire("https://b.example").is_some());
    }

    #[tokio::test]
    async fn test_waiters_run_in_turn() {
        let locks = Arc::new(MintLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.acquire("https://a.example").await;
        let waiter = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("https://a.example").await;
                order.lock().unwrap().push("second");
            })
        };
        tokio::task::yield_now().await;
        order.lock().unwrap().push("first");
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
