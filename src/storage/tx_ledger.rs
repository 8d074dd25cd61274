// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger of submitted transactions backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `submitted`: wx_id → serialized SubmittedTransaction
//! - `account_tx_index`: composite key (wallet/account|!timestamp|wx_id) → wx_id
//! - `chain_tx_map`: lowercase chain tx id (every leg) → wx_id

use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::models::{LedgerStatus, SubmittedTransaction};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: wx_id → serialized SubmittedTransaction (JSON bytes).
const SUBMITTED: TableDefinition<&str, &[u8]> = TableDefinition::new("submitted");

/// Index: composite key → wx_id.
/// Key format: `wallet/account|!timestamp_be|wx_id` for descending-time range scans.
const ACCOUNT_TX_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("account_tx_index");

/// Map: lowercase chain tx id → wx_id.
const CHAIN_TX_MAP: TableDefinition<&str, &str> = TableDefinition::new("chain_tx_map");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

fn account_prefix(wallet_id: &str, account_id: &str) -> Vec<u8> {
    let mut prefix = format!("{wallet_id}/{account_id}").into_bytes();
    prefix.push(b'|');
    prefix
}

/// Build a composite key for the account index.
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
fn make_index_key(wallet_id: &str, account_id: &str, timestamp: i64, wx_id: &str) -> Vec<u8> {
    let mut key = account_prefix(wallet_id, account_id);
    key.extend_from_slice(&(!timestamp as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(wx_id.as_bytes());
    key
}

/// Upper bound for a range scan over one account.
fn make_prefix_end(wallet_id: &str, account_id: &str) -> Vec<u8> {
    let mut end = account_prefix(wallet_id, account_id);
    end.extend_from_slice(&[0xFF; 20]);
    end
}

// =============================================================================
// TxLedger
// =============================================================================

/// Embedded ledger of submitted transactions.
pub struct TxLedger {
    db: Database,
}

impl TxLedger {
    /// Open (or create) the ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SUBMITTED)?;
            let _ = write_txn.open_table(ACCOUNT_TX_INDEX)?;
            let _ = write_txn.open_table(CHAIN_TX_MAP)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Insert a submitted transaction with its index entries.
    pub fn record(&self, tx: &SubmittedTransaction) -> LedgerResult<()> {
        let json = serde_json::to_vec(tx)?;
        let key = make_index_key(
            &tx.wallet_id,
            &tx.account_id,
            tx.submitted_at.timestamp_micros(),
            &tx.wx_id,
        );

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SUBMITTED)?;
            table.insert(tx.wx_id.as_str(), json.as_slice())?;

            let mut index = write_txn.open_table(ACCOUNT_TX_INDEX)?;
            index.insert(key.as_slice(), tx.wx_id.as_str())?;

            let mut map = write_txn.open_table(CHAIN_TX_MAP)?;
            for tx_id in std::iter::once(&tx.tx_id).chain(tx.leg_tx_ids.iter()) {
                map.insert(tx_id.to_lowercase().as_str(), tx.wx_id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up a record by its local id.
    pub fn get(&self, wx_id: &str) -> LedgerResult<Option<SubmittedTransaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUBMITTED)?;
        match table.get(wx_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a record by any of its chain transaction ids.
    pub fn find_by_tx_id(&self, tx_id: &str) -> LedgerResult<Option<SubmittedTransaction>> {
        let wx_id = {
            let read_txn = self.db.begin_read()?;
            let map = read_txn.open_table(CHAIN_TX_MAP)?;
            match map.get(tx_id.to_lowercase().as_str())? {
                Some(value) => value.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get(&wx_id)
    }

    /// Records of one account, newest first.
    pub fn list_by_account(
        &self,
        wallet_id: &str,
        account_id: &str,
        limit: usize,
    ) -> LedgerResult<Vec<SubmittedTransaction>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ACCOUNT_TX_INDEX)?;
        let table = read_txn.open_table(SUBMITTED)?;

        let start = account_prefix(wallet_id, account_id);
        let end = make_prefix_end(wallet_id, account_id);

        let mut results = Vec::with_capacity(limit.min(64));
        for entry in index.range(start.as_slice()..end.as_slice())? {
            if results.len() >= limit {
                break;
            }
            let (_, wx_id) = entry?;
            if let Some(value) = table.get(wx_id.value())? {
                results.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(results)
    }

    /// Update the on-chain status of a record.
    pub fn update_status(
        &self,
        wx_id: &str,
        status: LedgerStatus,
        block_number: Option<u64>,
    ) -> LedgerResult<SubmittedTransaction> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(SUBMITTED)?;
            let mut record: SubmittedTransaction = match table.get(wx_id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(LedgerError::NotFound(wx_id.to_string())),
            };

            record.status = status;
            record.block_number = block_number.or(record.block_number);
            record.updated_at = Utc::now();

            let json = serde_json::to_vec(&record)?;
            table.insert(wx_id, json.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(updated)
    }
}
