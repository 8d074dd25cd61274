// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Local Storage
//!
//! - [`BalanceCache`]: in-process LRU of per-address balances, used as the
//!   best-known value when an address cannot be reached.
//! - [`TxLedger`]: redb file recording every submitted transaction, keyed by a
//!   local id derived from the chain transaction id.

pub mod balance_cache;
pub mod tx_ledger;

pub use balance_cache::BalanceCache;
pub use tx_ledger::{LedgerError, LedgerResult, TxLedger};
