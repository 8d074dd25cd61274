// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache of per-address balances.
//!
//! Keyed by `(address, asset)`. The resolver refreshes an entry on every
//! successful chain read and falls back to it when an address cannot be
//! reached, so a partial result still carries the best-known value.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use alloy::primitives::U256;
use lru::LruCache;

/// Asset component of the key for native balances.
const NATIVE_ASSET: &str = "native";

/// Cached entry: balance + insertion timestamp.
struct CacheEntry {
    balance: U256,
    inserted_at: Instant,
}

/// In-process LRU cache for address balances.
pub struct BalanceCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl BalanceCache {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// - `capacity`: Max number of (address, asset) pairs to cache.
    /// - `ttl`: Time-to-live for each cache entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    fn key(address: &str, contract: Option<&str>) -> String {
        format!(
            "{}|{}",
            address.to_lowercase(),
            contract.map(str::to_lowercase).as_deref().unwrap_or(NATIVE_ASSET)
        )
    }

    /// Get the cached balance.
    ///
    /// Returns `None` if not cached or expired.
    pub fn get(&self, address: &str, contract: Option<&str>) -> Option<U256> {
        let key = Self::key(address, contract);
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.balance);
            }
            cache.pop(&key);
        }
        None
    }

    /// Store a freshly read balance.
    pub fn put(&self, address: &str, contract: Option<&str>, balance: U256) {
        let key = Self::key(address, contract);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CacheEntry {
                    balance,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drop the cached balance for one asset of an address.
    pub fn invalidate(&self, address: &str, contract: Option<&str>) {
        let key = Self::key(address, contract);
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
