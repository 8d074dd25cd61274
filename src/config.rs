// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Engine settings are loaded from the environment at startup. Unset or
//! unparseable values fall back to the defaults below.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SETTLEMENT_SUBMIT_TIMEOUT_SECS` | Upper bound on broadcasting one leg | `30` |
//! | `SETTLEMENT_LOCK_TIMEOUT_SECS` | How long a build waits for a busy account | `10` |
//! | `SETTLEMENT_BALANCE_CACHE_CAPACITY` | Max cached (address, asset) balances | `4096` |
//! | `SETTLEMENT_BALANCE_CACHE_TTL_SECS` | Lifetime of a cached balance | `300` |
//! | `SETTLEMENT_LEDGER_PATH` | redb file for submitted transactions | unset (no ledger) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::LogFormat;

/// Environment variable for the broadcast timeout, in seconds.
pub const SUBMIT_TIMEOUT_ENV: &str = "SETTLEMENT_SUBMIT_TIMEOUT_SECS";

/// Environment variable for the account lock wait, in seconds.
pub const LOCK_TIMEOUT_ENV: &str = "SETTLEMENT_LOCK_TIMEOUT_SECS";

/// Environment variable for the balance cache capacity.
pub const BALANCE_CACHE_CAPACITY_ENV: &str = "SETTLEMENT_BALANCE_CACHE_CAPACITY";

/// Environment variable for the balance cache TTL, in seconds.
pub const BALANCE_CACHE_TTL_ENV: &str = "SETTLEMENT_BALANCE_CACHE_TTL_SECS";

/// Environment variable for the submitted-transaction ledger file.
///
/// When unset, submissions are not persisted locally.
pub const LEDGER_PATH_ENV: &str = "SETTLEMENT_LEDGER_PATH";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BALANCE_CACHE_CAPACITY: usize = 4096;
const DEFAULT_BALANCE_CACHE_TTL: Duration = Duration::from_secs(300);

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single broadcast. On expiry the transaction stays
    /// `verified` and may be resubmitted.
    pub submit_timeout: Duration,
    /// How long a build waits for another in-flight transaction on the same
    /// account before failing with `AccountBusy`.
    pub lock_timeout: Duration,
    pub balance_cache_capacity: usize,
    pub balance_cache_ttl: Duration,
    pub ledger_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            balance_cache_capacity: DEFAULT_BALANCE_CACHE_CAPACITY,
            balance_cache_ttl: DEFAULT_BALANCE_CACHE_TTL,
            ledger_path: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl EngineConfig {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            submit_timeout: secs(SUBMIT_TIMEOUT_ENV, defaults.submit_timeout),
            lock_timeout: secs(LOCK_TIMEOUT_ENV, defaults.lock_timeout),
            balance_cache_capacity: lookup(BALANCE_CACHE_CAPACITY_ENV)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|c| *c > 0)
                .unwrap_or(defaults.balance_cache_capacity),
            balance_cache_ttl: secs(BALANCE_CACHE_TTL_ENV, defaults.balance_cache_ttl),
            ledger_path: lookup(LEDGER_PATH_ENV)
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            log_format: lookup(LOG_FORMAT_ENV)
                .map(|v| LogFormat::from_str_lossy(&v))
                .unwrap_or(defaults.log_format),
        }
    }
}
