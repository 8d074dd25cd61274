// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-account mutual exclusion.
//!
//! At most one transaction (or one summary batch) per account is between
//! build and a terminal status at any time. Distinct accounts never contend.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{EngineError, EngineResult};
use crate::models::AccountKey;

type LockMap = Arc<Mutex<HashMap<AccountKey, Arc<AsyncMutex<()>>>>>;

fn lock_map(map: &LockMap) -> MutexGuard<'_, HashMap<AccountKey, Arc<AsyncMutex<()>>>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Registry of per-account locks. An account's entry lives only while a
/// lease or a waiter refers to it.
pub struct AccountLocks {
    locks: LockMap,
    timeout: Duration,
}

/// Held for the lifetime of an in-flight transaction.
///
/// Dropping the lease (terminal status, or dropping the transaction) frees
/// the account.
pub struct AccountLease {
    key: AccountKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl AccountLease {
    pub fn key(&self) -> &AccountKey {
        &self.key
    }
}

impl fmt::Debug for AccountLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountLease").field("key", &self.key).finish()
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = lock_map(&self.locks);
        // Only the map refers to the slot: nobody holds or waits for it.
        if locks
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            locks.remove(&self.key);
        }
        tracing::debug!(account = %self.key, "Account lease released");
    }
}

impl AccountLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    fn slot(&self, key: &AccountKey) -> Arc<AsyncMutex<()>> {
        lock_map(&self.locks)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait up to the configured timeout for the account.
    pub async fn acquire(&self, key: &AccountKey) -> EngineResult<AccountLease> {
        let slot = self.slot(key);
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => {
                tracing::debug!(account = %key, "Account lease acquired");
                Ok(AccountLease {
                    key: key.clone(),
                    guard: Some(guard),
                    locks: self.locks.clone(),
                })
            }
            Err(_) => {
                tracing::warn!(account = %key, timeout = ?self.timeout, "Account busy");
                Err(EngineError::AccountBusy(key.to_string()))
            }
        }
    }

    /// Whether a lease on the account is currently held.
    pub fn is_held(&self, key: &AccountKey) -> bool {
        lock_map(&self.locks)
            .get(key)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of accounts with a live lock entry.
    pub fn tracked(&self) -> usize {
        lock_map(&self.locks).len()
    }
}
